//! Native functions callable from bytecode.
//!
//! An [`Intrinsic`] is declared with a builder and turned into an ordinary
//! [`FuncDef`] carrying a native callback, so scripts reach built-ins
//! through the same funcref machinery as compiled functions.

pub mod builtins;

use std::fmt;
use std::rc::Rc;

use crate::funcdef::FuncDef;
use crate::program::Const;
use crate::value::{format, Heap, Value};
use crate::vm::{VmError, VmResult};

type Callback = dyn Fn(&mut IntrinsicCall<'_>) -> VmResult<Value>;

/// Shareable native callback.
#[derive(Clone)]
pub struct NativeFn(Rc<Callback>);

impl NativeFn {
    pub fn new(f: impl Fn(&mut IntrinsicCall<'_>) -> VmResult<Value> + 'static) -> Self {
        NativeFn(Rc::new(f))
    }

    pub fn call(&self, cx: &mut IntrinsicCall<'_>) -> VmResult<Value> {
        (self.0)(cx)
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NativeFn")
    }
}

// ── Host I/O ─────────────────────────────────────────────────────────

pub type PrintSink = Box<dyn FnMut(&str)>;
pub type InputSource = Box<dyn FnMut(&str) -> std::io::Result<String>>;

/// Where `print` output goes and where `input` reads from.
pub struct HostIo {
    pub(crate) print: PrintSink,
    pub(crate) input: InputSource,
}

impl Default for HostIo {
    fn default() -> Self {
        HostIo { print: Box::new(|line| println!("{line}")), input: Box::new(read_stdin_line) }
    }
}

fn read_stdin_line(prompt: &str) -> std::io::Result<String> {
    use std::io::Write;
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

// ── Call context ─────────────────────────────────────────────────────

/// Everything a native callback may touch during one call.
pub struct IntrinsicCall<'a> {
    pub heap: &'a mut Heap,
    io: &'a mut HostIo,
    args_start: usize,
    arg_count: usize,
}

impl<'a> IntrinsicCall<'a> {
    pub(crate) fn new(heap: &'a mut Heap, io: &'a mut HostIo, args_start: usize, arg_count: usize) -> Self {
        IntrinsicCall { heap, io, args_start, arg_count }
    }

    pub fn arg_count(&self) -> usize {
        self.arg_count
    }

    /// Argument `i` (0-based), or null past the end.
    pub fn arg(&self, i: usize) -> Value {
        if i >= self.arg_count {
            return Value::NULL;
        }
        self.heap.registers.values.get(self.args_start + i).copied().unwrap_or(Value::NULL)
    }

    pub fn display(&self, v: Value) -> String {
        format::display(self.heap, v)
    }

    pub fn print(&mut self, line: &str) {
        (self.io.print)(line);
    }

    pub fn input(&mut self, prompt: &str) -> VmResult<String> {
        (self.io.input)(prompt).map_err(|e| VmError::Io(e.to_string()))
    }
}

// ── Builder ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Intrinsic {
    name: String,
    params: Vec<(String, Const)>,
    code: Option<NativeFn>,
}

impl Intrinsic {
    pub fn new(name: impl Into<String>) -> Self {
        Intrinsic { name: name.into(), params: Vec::new(), code: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter defaulting to null.
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push((name.into(), Const::Null));
        self
    }

    pub fn param_default(mut self, name: impl Into<String>, default: impl Into<Const>) -> Self {
        self.params.push((name.into(), default.into()));
        self
    }

    pub fn code(mut self, f: impl Fn(&mut IntrinsicCall<'_>) -> VmResult<Value> + 'static) -> Self {
        self.code = Some(NativeFn::new(f));
        self
    }

    /// Function-table entry: one register per parameter plus the result.
    pub fn build_funcdef(&self, heap: &mut Heap) -> FuncDef {
        let mut def = FuncDef::new(self.name.clone());
        for (name, default) in &self.params {
            let name = heap.make_string(name);
            let default = default.to_value(heap);
            def.add_param(name, default);
        }
        def.max_regs = self.params.len() as u16 + 1;
        def.native = Some(self.code.clone().unwrap_or_else(|| NativeFn::new(|_| Ok(Value::NULL))));
        def
    }
}
