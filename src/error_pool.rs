use std::cell::RefCell;
use std::rc::Rc;

/// Append-only error collector shared between pipeline stages.
///
/// Clones share one underlying list, so a loader and the VM it feeds can
/// report into the same pool. Hosts usually surface only [`top_error`],
/// the earliest failure.
///
/// [`top_error`]: ErrorPool::top_error
#[derive(Debug, Clone, Default)]
pub struct ErrorPool {
    errors: Rc<RefCell<Vec<String>>>,
}

impl ErrorPool {
    pub fn new() -> Self {
        ErrorPool::default()
    }

    pub fn add(&self, message: impl Into<String>) {
        self.errors.borrow_mut().push(message.into());
    }

    pub fn has_error(&self) -> bool {
        !self.errors.borrow().is_empty()
    }

    pub fn top_error(&self) -> Option<String> {
        self.errors.borrow().first().cloned()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.borrow().clone()
    }

    pub fn clear(&self) {
        self.errors.borrow_mut().clear();
    }
}
