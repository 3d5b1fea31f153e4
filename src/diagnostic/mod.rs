pub mod ansi;
pub mod json;

use crate::bytecode;
use crate::vm::Vm;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// An instruction position: function name plus index into its code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub function: String,
    pub pc: usize,
}

/// One disassembled instruction shown around the failing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLine {
    pub pc: usize,
    pub text: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: Option<Location>,
    pub listing: Vec<ListingLine>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
}

/// Instructions shown before the failing one.
const LISTING_BEFORE: usize = 2;

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            location: None,
            listing: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic { severity: Severity::Warning, ..Diagnostic::error(message) }
    }

    pub fn at(mut self, function: impl Into<String>, pc: usize) -> Self {
        self.location = Some(Location { function: function.into(), pc });
        self
    }

    /// Disassemble the code around the location's pc.
    pub fn with_listing(mut self, code: &[u32]) -> Self {
        let Some(loc) = &self.location else { return self };
        let start = loc.pc.saturating_sub(LISTING_BEFORE);
        let end = (loc.pc + 1).min(code.len());
        self.listing = (start..end)
            .map(|pc| ListingLine { pc, text: bytecode::disassemble(code[pc]), is_primary: pc == loc.pc })
            .collect();
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// The runtime error a halted VM is holding, pinned to the instruction
    /// that raised it.
    pub fn from_vm(vm: &Vm) -> Option<Self> {
        let message = vm.runtime_error()?;
        let mut d = Diagnostic::error(message);
        if let Some(f) = vm.current_function() {
            d = d.at(f.name.clone(), vm.pc().saturating_sub(1)).with_listing(&f.code);
        }
        if vm.call_stack_depth() > 1 {
            d = d.with_note(format!("call depth {}", vm.call_stack_depth()));
        }
        if message.starts_with("Undefined Identifier") {
            d = d.with_suggestion("assign the variable before reading it, or check its spelling");
        }
        Some(d)
    }
}

impl From<&crate::vm::VmError> for Diagnostic {
    fn from(e: &crate::vm::VmError) -> Self {
        Diagnostic::error(e.to_string())
    }
}

impl From<&crate::program::LoadError> for Diagnostic {
    fn from(e: &crate::program::LoadError) -> Self {
        use crate::program::LoadError;
        match e {
            LoadError::Encode { func, index, source } => Diagnostic::error(source.to_string())
                .at(func.clone(), *index)
                .with_note("while assembling the program"),
            LoadError::Json(_) => {
                Diagnostic::error(e.to_string()).with_suggestion("the program file must be a JSON object with a \"functions\" array")
            }
            _ => Diagnostic::error(e.to_string()),
        }
    }
}
