//! Standard Modules
//!
//! Each module is a map of natives registered as a global at VM init:
//! `fs`, `proc`, `net`, `sys`, `math`, `re`, and `bit`. Privileged
//! operations consult the permission set; failures raise typed errors.

pub mod bit;
pub mod fs;
pub mod math;
pub mod net;
pub mod proc;
pub mod regex;
pub mod sys;

use crate::vm::Vm;

pub fn register_all(vm: &mut Vm) {
    fs::register(vm);
    proc::register(vm);
    net::register(vm);
    sys::register(vm);
    math::register(vm);
    regex::register(vm);
    bit::register(vm);
}
