//! Bitwise Module
//!
//! 32-bit unsigned integer operations on the number type. Numbers are
//! truncated to their low 32 bits; shift counts outside 0..=31 yield 0.

use glipt_core::Value;

use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    vm.define_module(
        "bit",
        &[
            ("and", bit_and, 2),
            ("or", bit_or, 2),
            ("xor", bit_xor, 2),
            ("not", bit_not, 1),
            ("lshift", bit_lshift, 2),
            ("rshift", bit_rshift, 2),
        ],
    );
}

fn to_u32(value: Value) -> u32 {
    value.as_number() as i64 as u32
}

fn bit_and(_vm: &mut Vm, args: &[Value]) -> Value {
    if !args[0].is_number() || !args[1].is_number() {
        return Value::NIL;
    }
    Value::number(f64::from(to_u32(args[0]) & to_u32(args[1])))
}

fn bit_or(_vm: &mut Vm, args: &[Value]) -> Value {
    if !args[0].is_number() || !args[1].is_number() {
        return Value::NIL;
    }
    Value::number(f64::from(to_u32(args[0]) | to_u32(args[1])))
}

fn bit_xor(_vm: &mut Vm, args: &[Value]) -> Value {
    if !args[0].is_number() || !args[1].is_number() {
        return Value::NIL;
    }
    Value::number(f64::from(to_u32(args[0]) ^ to_u32(args[1])))
}

fn bit_not(_vm: &mut Vm, args: &[Value]) -> Value {
    if !args[0].is_number() {
        return Value::NIL;
    }
    Value::number(f64::from(!to_u32(args[0])))
}

fn bit_lshift(_vm: &mut Vm, args: &[Value]) -> Value {
    if !args[0].is_number() || !args[1].is_number() {
        return Value::NIL;
    }
    let n = args[1].as_number() as i64;
    if !(0..32).contains(&n) {
        return Value::number(0.0);
    }
    Value::number(f64::from(to_u32(args[0]) << n))
}

fn bit_rshift(_vm: &mut Vm, args: &[Value]) -> Value {
    if !args[0].is_number() || !args[1].is_number() {
        return Value::NIL;
    }
    let n = args[1].as_number() as i64;
    if !(0..32).contains(&n) {
        return Value::number(0.0);
    }
    Value::number(f64::from(to_u32(args[0]) >> n))
}
