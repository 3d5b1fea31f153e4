//! Register-based bytecode virtual machine for MiniScript 2.
//!
//! Values are NaN-boxed into a single `u64`; heap objects (strings, lists,
//! maps, function references) live in a [`value::Heap`] and are reclaimed
//! by a mark-and-sweep pass the VM triggers between instructions.

pub mod bytecode;
pub mod diagnostic;
pub mod error_pool;
pub mod funcdef;
pub mod intrinsic;
pub mod program;
pub mod value;
pub mod vm;

pub use error_pool::ErrorPool;
pub use funcdef::FuncDef;
pub use intrinsic::{Intrinsic, IntrinsicCall};
pub use program::{LoadError, Program};
pub use value::{Heap, Value};
pub use vm::{Vm, VmConfig, VmError, VmResult, VmState};
