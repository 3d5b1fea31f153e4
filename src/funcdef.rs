use crate::bytecode::{self, Field, Opcode, Role};
use crate::intrinsic::NativeFn;
use crate::value::{format, Heap, Value, SELF_NAME, SUPER_NAME};

/// One compiled function: code, constant pool, parameters and frame size.
///
/// Register 0 holds the return value; parameter `i` lives in register
/// `i + 1`. Intrinsics carry a `native` callback and no code.
#[derive(Debug, Clone, Default)]
pub struct FuncDef {
    pub name: String,
    pub code: Vec<u32>,
    pub constants: Vec<Value>,
    pub max_regs: u16,
    pub param_names: Vec<Value>,
    pub param_defaults: Vec<Value>,
    pub native: Option<NativeFn>,
}

impl FuncDef {
    pub fn new(name: impl Into<String>) -> Self {
        FuncDef { name: name.into(), max_regs: 1, ..FuncDef::default() }
    }

    /// The empty-named def stands for "no function".
    pub fn is_present(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }

    pub fn param_count(&self) -> usize {
        self.param_names.len()
    }

    pub fn add_param(&mut self, name: Value, default: Value) {
        self.param_names.push(name);
        self.param_defaults.push(default);
        self.reserve_register(self.param_names.len());
    }

    /// Index of `value` in the constant pool, appending it if absent.
    pub fn add_constant(&mut self, heap: &Heap, value: Value) -> usize {
        let existing = self.constants.iter().position(|c| {
            c.identical(value) || (c.is_string() && value.is_string() && heap.string_eq(*c, value))
        });
        existing.unwrap_or_else(|| {
            self.constants.push(value);
            self.constants.len() - 1
        })
    }

    pub fn emit(&mut self, word: u32) -> usize {
        self.code.push(word);
        self.code.len() - 1
    }

    /// Grow the frame so register `reg` is inside it.
    pub fn reserve_register(&mut self, reg: usize) {
        let needed = (reg + 1).min(u16::MAX as usize) as u16;
        self.max_regs = self.max_regs.max(needed);
    }

    /// Grow the frame to cover every register the code touches.
    pub fn reserve_code_registers(&mut self) {
        self.reserve_register(self.param_count());
        let mut highest = 0usize;
        for &word in &self.code {
            let Some(op) = Opcode::from_u8(bytecode::op(word)) else { continue };
            for operand in op.operands() {
                let is_register = operand.role == Role::Register
                    || (op == Opcode::FUNCREF_iA_iBC && operand.field == Field::A);
                if is_register {
                    highest = highest.max(operand.field.extract(word) as usize);
                }
            }
            if op == Opcode::SLICE_rA_rB_rC {
                highest = highest.max(bytecode::c(word) as usize + 1);
            }
        }
        self.reserve_register(highest);
    }

    /// Register of the parameter named `self`, if declared.
    pub fn self_reg(&self) -> Option<usize> {
        self.param_names.iter().position(|n| n.identical(SELF_NAME)).map(|i| i + 1)
    }

    pub fn super_reg(&self) -> Option<usize> {
        self.param_names.iter().position(|n| n.identical(SUPER_NAME)).map(|i| i + 1)
    }

    /// `name(a, b=10)`
    pub fn signature(&self, heap: &Heap) -> String {
        let params: Vec<String> = self
            .param_names
            .iter()
            .zip(&self.param_defaults)
            .map(|(name, default)| {
                let name = format::display(heap, *name);
                if default.is_null() { name } else { format!("{name}={}", format::repr(heap, *default)) }
            })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}
