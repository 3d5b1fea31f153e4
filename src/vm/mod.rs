mod dispatch;
pub mod frame;

use tracing::{debug, error};

pub use frame::CallInfo;
use frame::PendingContext;

use crate::bytecode;
use crate::error_pool::ErrorPool;
use crate::funcdef::FuncDef;
use crate::intrinsic::builtins::core_intrinsics;
use crate::intrinsic::{HostIo, Intrinsic};
use crate::value::{format, Heap, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("Undefined Identifier: '{name}' is unknown in this context")]
    UndefinedIdentifier { name: String },
    #[error("Key Not Found: '{key}' not found in map")]
    KeyNotFound { key: String },
    #[error("Index Error: {kind} index {index} out of range")]
    IndexOutOfRange { kind: &'static str, index: i64 },
    #[error("Index Error: {kind} index must be a number, not {found}")]
    NonNumericIndex { kind: &'static str, found: &'static str },
    #[error("Can't index into {what}")]
    CantIndex { what: String },
    #[error("Can't set indexed value in {what}")]
    CantSetIndex { what: String },
    #[error("Can't slice {what}")]
    CantSlice { what: String },
    #[error("Attempt to modify a frozen list")]
    FrozenList,
    #[error("Attempt to modify a frozen map")]
    FrozenMap,
    #[error("Too many arguments: got {got}, expected {expected}")]
    TooManyArguments { got: usize, expected: usize },
    #[error("Invalid function index: {index}")]
    InvalidFunctionIndex { index: i64 },
    #[error("Not a function reference: {what}")]
    NotCallable { what: String },
    #[error("Call stack overflow")]
    CallStackOverflow,
    #[error("Stack overflow")]
    StackOverflow,
    #[error("ARGBLK: CALL instruction out of range")]
    ArgBlockOutOfRange,
    #[error("ARGBLK must be followed by CALL")]
    ArgBlockWithoutCall,
    #[error("Expected ARG opcode in ARGBLK")]
    ExpectedArg,
    #[error("Internal error: ARG without ARGBLK")]
    ArgWithoutBlock,
    #[error("String too long")]
    StringTooLong,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Unknown intrinsic: '{name}'")]
    UnknownIntrinsic { name: String },
    #[error("unknown opcode: {op}")]
    UnknownOpcode { op: u8 },
    #[error("constant index {index} out of range")]
    BadConstant { index: usize },
    #[error("PC out of bounds")]
    PcOutOfBounds,
    #[error("No @main function found")]
    NoMain,
    #[error("Entry function has no code")]
    EmptyEntry,
    #[error("{0}")]
    Native(String),
}

pub type VmResult<T> = Result<T, VmError>;

pub const ENTRY_NAME: &str = "@main";

// ── Configuration ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Registers in the shared arena.
    pub stack_size: usize,
    /// Maximum number of simultaneously active frames.
    pub call_stack_size: usize,
    /// Allocations between collections.
    pub gc_threshold: usize,
    /// Registered after the core set; a same-named entry replaces a core one.
    pub extra_intrinsics: Vec<Intrinsic>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig { stack_size: 1024, call_stack_size: 256, gc_threshold: 4096, extra_intrinsics: Vec::new() }
    }
}

impl VmConfig {
    pub fn with_stack_size(mut self, n: usize) -> Self {
        self.stack_size = n;
        self
    }

    pub fn with_call_stack_size(mut self, n: usize) -> Self {
        self.call_stack_size = n;
        self
    }

    pub fn with_gc_threshold(mut self, n: usize) -> Self {
        self.gc_threshold = n;
        self
    }

    pub fn with_intrinsic(mut self, intrinsic: Intrinsic) -> Self {
        self.extra_intrinsics.push(intrinsic);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Reset,
    Running,
    Suspended,
    Halted,
}

// ── VM ───────────────────────────────────────────────────────────────

/// Register-based bytecode interpreter.
///
/// Execution state (`pc`, `base`, current function) lives on the struct,
/// so [`Vm::run`] can stop after any instruction and pick up again on the
/// next call.
pub struct Vm {
    config: VmConfig,
    heap: Heap,
    functions: Vec<FuncDef>,
    call_stack: Vec<CallInfo>,
    /// Map of intrinsic name to funcref.
    intrinsics: Value,
    entry: usize,
    func: usize,
    pc: usize,
    base: usize,
    pending: PendingContext,
    state: VmState,
    loaded: bool,
    errors: ErrorPool,
    runtime_error: Option<String>,
    io: HostIo,
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        let heap = Heap::new(config.stack_size);
        Vm {
            call_stack: Vec::with_capacity(config.call_stack_size),
            config,
            heap,
            functions: Vec::new(),
            intrinsics: Value::NULL,
            entry: 0,
            func: 0,
            pc: 0,
            base: 0,
            pending: PendingContext::default(),
            state: VmState::Reset,
            loaded: false,
            errors: ErrorPool::new(),
            runtime_error: None,
            io: HostIo::default(),
        }
    }

    /// Report into a pool shared with other stages instead of a private one.
    pub fn with_error_pool(mut self, pool: ErrorPool) -> Self {
        self.errors = pool;
        self
    }

    /// Load a function table, locate `@main` and register intrinsics.
    /// Failures are also recorded in the error pool.
    pub fn reset(&mut self, functions: Vec<FuncDef>) -> VmResult<()> {
        self.heap.registers.clear();
        self.call_stack.clear();
        self.pending = PendingContext::default();
        self.runtime_error = None;
        self.loaded = false;
        self.state = VmState::Reset;
        self.pc = 0;
        self.base = 0;
        self.functions = functions;

        let Some(entry) = self.functions.iter().position(|f| f.name == ENTRY_NAME) else {
            return self.fail_reset(VmError::NoMain);
        };
        if self.functions[entry].code.is_empty() {
            return self.fail_reset(VmError::EmptyEntry);
        }
        for f in self.functions.iter_mut().filter(|f| !f.is_native()) {
            f.reserve_code_registers();
        }
        if self.functions[entry].max_regs as usize > self.heap.registers.len() {
            return self.fail_reset(VmError::StackOverflow);
        }

        let intrinsics: Vec<Intrinsic> = core_intrinsics().into_iter().chain(self.config.extra_intrinsics.iter().cloned()).collect();
        self.intrinsics = self.heap.make_map(intrinsics.len());
        for intrinsic in &intrinsics {
            let def = intrinsic.build_funcdef(&mut self.heap);
            let name = self.heap.make_string(intrinsic.name());
            let funcref = self.heap.make_funcref(self.functions.len() as i32, Value::NULL);
            self.heap.map_set(self.intrinsics, name, funcref)?;
            self.functions.push(def);
        }

        self.entry = entry;
        self.func = entry;
        self.call_stack.push(CallInfo::entry());
        self.loaded = true;
        debug!(entry = ENTRY_NAME, functions = self.functions.len(), intrinsics = intrinsics.len(), "vm reset");
        Ok(())
    }

    fn fail_reset(&mut self, err: VmError) -> VmResult<()> {
        self.raise(err.clone());
        Err(err)
    }

    /// Execute up to `max_cycles` instructions (0 = no limit).
    ///
    /// Returns the entry function's result once it returns, or null when
    /// the budget ran out, the VM is not runnable, or a runtime error
    /// halted it.
    pub fn run(&mut self, max_cycles: u32) -> Value {
        if !self.loaded || self.state == VmState::Halted {
            return Value::NULL;
        }
        self.state = VmState::Running;
        let mut remaining = max_cycles;
        loop {
            if max_cycles != 0 {
                if remaining == 0 {
                    self.state = VmState::Suspended;
                    return Value::NULL;
                }
                remaining -= 1;
            }
            match self.step() {
                Ok(None) => {}
                Ok(Some(result)) => {
                    self.state = VmState::Halted;
                    return result;
                }
                Err(err) => {
                    self.raise(err);
                    return Value::NULL;
                }
            }
            if self.heap.allocated_since_gc() >= self.config.gc_threshold {
                self.collect_garbage();
            }
        }
    }

    /// The single path every fatal error goes through.
    fn raise(&mut self, err: VmError) {
        let message = err.to_string();
        error!(function = %self.function_name(self.func), pc = self.pc.saturating_sub(1), "{message}");
        self.errors.add(format!("Runtime Error: {message}"));
        self.runtime_error = Some(message);
        self.state = VmState::Halted;
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn runtime_error(&self) -> Option<&str> {
        self.runtime_error.as_deref()
    }

    /// `Runtime Error: {msg} [{function} line {pc}]`, if an error occurred.
    pub fn report_runtime_error(&self) -> Option<String> {
        let msg = self.runtime_error.as_ref()?;
        Some(format!("Runtime Error: {msg} [{} line {}]", self.function_name(self.func), self.pc.saturating_sub(1)))
    }

    pub fn errors(&self) -> &ErrorPool {
        &self.errors
    }

    // ── Garbage collection ──

    /// Every heap value reachable from VM state outside the register arena.
    fn roots(&self) -> Vec<Value> {
        let mut roots = vec![self.intrinsics, self.pending.self_value, self.pending.super_value];
        for f in &self.functions {
            roots.extend(f.constants.iter().copied());
            roots.extend(f.param_names.iter().copied());
            roots.extend(f.param_defaults.iter().copied());
        }
        for frame in &self.call_stack {
            roots.push(frame.local_var_map);
            roots.push(frame.outer_var_map);
        }
        roots
    }

    /// Collect now; returns the number of objects freed.
    pub fn collect_garbage(&mut self) -> usize {
        let roots = self.roots();
        self.heap.collect(&roots)
    }

    // ── Host hooks ──

    pub fn set_print_sink(&mut self, sink: impl FnMut(&str) + 'static) {
        self.io.print = Box::new(sink);
    }

    pub fn set_input_source(&mut self, source: impl FnMut(&str) -> std::io::Result<String> + 'static) {
        self.io.input = Box::new(source);
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn display(&self, v: Value) -> String {
        format::display(&self.heap, v)
    }

    pub fn repr(&self, v: Value) -> String {
        format::repr(&self.heap, v)
    }

    // ── Introspection ──

    pub fn stack_size(&self) -> usize {
        self.heap.registers.len()
    }

    pub fn call_stack_depth(&self) -> usize {
        self.call_stack.len()
    }

    pub fn stack_value(&self, i: usize) -> Value {
        self.heap.registers.values.get(i).copied().unwrap_or(Value::NULL)
    }

    /// Variable name bound to register `i`, or null.
    pub fn stack_name(&self, i: usize) -> Value {
        self.heap.registers.names.get(i).copied().unwrap_or(Value::NULL)
    }

    pub fn call_stack_frame(&self, i: usize) -> Option<&CallInfo> {
        self.call_stack.get(i)
    }

    pub fn function_name(&self, i: usize) -> &str {
        self.functions.get(i).map_or("???", |f| f.name.as_str())
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    pub fn functions(&self) -> &[FuncDef] {
        &self.functions
    }

    pub fn current_function(&self) -> Option<&FuncDef> {
        self.functions.get(self.func)
    }

    pub fn current_function_index(&self) -> usize {
        self.func
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn base_index(&self) -> usize {
        self.base
    }

    /// The instruction the next cycle will execute.
    pub fn next_instruction(&self) -> Option<u32> {
        self.current_function()?.code.get(self.pc).copied()
    }

    /// `function pc: disassembly` for the next instruction.
    pub fn describe_next(&self) -> Option<String> {
        let word = self.next_instruction()?;
        Some(format!("{} {:04}: {}", self.function_name(self.func), self.pc, bytecode::disassemble(word)))
    }

    /// Append a function to the table; returns its index.
    pub fn register_function(&mut self, mut def: FuncDef) -> usize {
        if !def.is_native() {
            def.reserve_code_registers();
        }
        self.functions.push(def);
        self.functions.len() - 1
    }
}
