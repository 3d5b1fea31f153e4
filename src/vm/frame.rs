use crate::value::Value;

/// Record for one active frame: where to resume the caller, and the
/// frame's own variable maps.
///
/// The call stack holds exactly one of these per active frame; slot 0 is
/// the entry frame, whose return fields are unused.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallInfo {
    pub return_pc: usize,
    pub return_base: usize,
    pub return_func: usize,
    /// Caller register (relative to `return_base`) that receives the result.
    pub result_reg: Option<u8>,
    /// Live variable map over this frame's registers, created on first use.
    pub local_var_map: Value,
    /// Closure environment of the funcref this frame was called through.
    pub outer_var_map: Value,
}

impl CallInfo {
    pub fn entry() -> Self {
        CallInfo {
            return_pc: 0,
            return_base: 0,
            return_func: 0,
            result_reg: None,
            local_var_map: Value::NULL,
            outer_var_map: Value::NULL,
        }
    }

    pub fn new(return_pc: usize, return_base: usize, return_func: usize, result_reg: Option<u8>, outer: Value) -> Self {
        CallInfo { return_pc, return_base, return_func, result_reg, local_var_map: Value::NULL, outer_var_map: outer }
    }
}

/// Method-call context waiting for the next call to consume it.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PendingContext {
    pub(crate) active: bool,
    pub(crate) self_value: Value,
    pub(crate) super_value: Value,
}

impl PendingContext {
    pub(crate) fn set(&mut self, self_value: Value, super_value: Value) {
        *self = PendingContext { active: true, self_value, super_value };
    }

    /// Rebind self only; a super found by a preceding method lookup stays.
    pub(crate) fn set_self(&mut self, self_value: Value) {
        self.active = true;
        self.self_value = self_value;
    }

    pub(crate) fn take(&mut self) -> Option<(Value, Value)> {
        let taken = self.active.then_some((self.self_value, self.super_value));
        *self = PendingContext::default();
        taken
    }
}
