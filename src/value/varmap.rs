//! Variable maps over the register arena.
//!
//! A frame's local variable map starts out *live*: it owns no storage for
//! named registers, and every read or write of a name bound in the frame's
//! window goes straight to the register. When the frame returns the VM
//! calls [`Heap::varmap_gather`], which copies the bound registers into
//! ordinary map storage and drops the window. From then on the map is
//! *captured* and behaves like any other map, so closures that hold it
//! keep working after their defining frame is gone.

use super::heap::Object;
use super::{Heap, Value};

/// Shared register file: one value slot and one name slot per register.
/// A register counts as a bound variable while its name slot is non-null.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    pub values: Vec<Value>,
    pub names: Vec<Value>,
}

impl RegisterFile {
    pub fn new(size: usize) -> Self {
        RegisterFile { values: vec![Value::NULL; size], names: vec![Value::NULL; size] }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.fill(Value::NULL);
        self.names.fill(Value::NULL);
    }
}

/// Absolute register range `[first, last]` a live variable map overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegisterWindow {
    pub(crate) first: usize,
    pub(crate) last: usize,
}

impl RegisterWindow {
    pub(crate) fn bound_registers(self, regs: &RegisterFile) -> impl Iterator<Item = usize> + '_ {
        let end = (self.last + 1).min(regs.len());
        (self.first.min(end)..end).filter(|&r| !regs.names[r].is_null())
    }
}

impl Heap {
    /// New live variable map over `count` registers starting at `base`.
    /// A zero-sized frame gets a plain map, since there is nothing to overlay.
    pub fn make_varmap(&mut self, base: usize, count: usize) -> Value {
        if count == 0 {
            return self.make_map(4);
        }
        self.make_map_with_window(RegisterWindow { first: base, last: base + count - 1 })
    }

    pub fn is_live_varmap(&self, map: Value) -> bool {
        self.map_obj(map).is_some_and(|m| m.window.is_some())
    }

    /// Register in `window` currently bound to the name `key`.
    pub(crate) fn window_find(&self, window: RegisterWindow, key: Value) -> Option<usize> {
        if !key.is_string() {
            return None;
        }
        window
            .bound_registers(&self.registers)
            .find(|&r| self.string_eq(self.registers.names[r], key))
    }

    /// Copy every bound register into map storage and detach the map from
    /// the register arena. No-op for maps that are already captured.
    pub fn varmap_gather(&mut self, map: Value) {
        let Some(window) = self.map_obj(map).and_then(|m| m.window) else { return };
        let bound: Vec<(Value, Value)> = window
            .bound_registers(&self.registers)
            .map(|r| (self.registers.names[r], self.registers.values[r]))
            .collect();
        let keyed: Vec<_> = bound.into_iter().map(|(name, value)| (self.key_of(name), name, value)).collect();
        if let Some(Object::Map(m)) = self.object_mut(map) {
            for (k, name, value) in keyed {
                m.entries.insert(k, (name, value));
            }
            m.window = None;
        }
    }
}
