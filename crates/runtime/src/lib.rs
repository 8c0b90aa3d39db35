//! Glipt Runtime
//!
//! The execution engine for the Glipt scripting language: the bytecode
//! [`Vm`](vm::Vm) with its tracing collector, the permission set consulted
//! by privileged natives, the built-in globals, and the standard modules
//! (`fs`, `proc`, `net`, `sys`, `math`, `re`, `bit`).
//!
//! ```rust,ignore
//! use glipt_runtime::Vm;
//!
//! let mut vm = Vm::new();
//! vm.permissions.allow_all = true;
//! vm.interpret("print(\"hello\")\n")?;
//! ```

pub mod dataformat;
pub mod disasm;
pub mod gc;
pub mod modules;
pub mod natives;
pub mod parallel;
pub mod permission;
pub mod process;
pub mod vm;

pub use natives::{format_number, format_value};
pub use permission::{PermKind, PermissionSet};
pub use vm::{InterpretError, NativeFn, Vm};
