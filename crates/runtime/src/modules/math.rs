//! Math Module
//!
//! Floating-point functions and constants over the number type, plus
//! randomness from the `rand` crate.

use glipt_core::Value;

use rand::Rng;

use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    let map = vm.define_module(
        "math",
        &[
            // Rounding
            ("floor", math_floor, 1),
            ("ceil", math_ceil, 1),
            ("round", math_round, 1),
            ("abs", math_abs, 1),
            // Powers & logs
            ("sqrt", math_sqrt, 1),
            ("pow", math_pow, 2),
            ("log", math_log, 1),
            ("log10", math_log10, 1),
            ("exp", math_exp, 1),
            // Comparison
            ("min", math_min, 2),
            ("max", math_max, 2),
            // Trigonometry
            ("sin", math_sin, 1),
            ("cos", math_cos, 1),
            ("tan", math_tan, 1),
            ("asin", math_asin, 1),
            ("acos", math_acos, 1),
            ("atan", math_atan, 1),
            ("atan2", math_atan2, 2),
            // Random
            ("rand", math_rand, 0),
            ("rand_int", math_rand_int, 2),
        ],
    );

    // Constants. The module map is already rooted through globals.
    vm.map_set_str(map, "PI", Value::number(std::f64::consts::PI));
    vm.map_set_str(map, "E", Value::number(std::f64::consts::E));
    vm.map_set_str(map, "INF", Value::number(f64::INFINITY));
    vm.map_set_str(map, "NAN", Value::number(f64::NAN));
}

fn unary(args: &[Value], f: impl Fn(f64) -> f64) -> Value {
    if !args[0].is_number() {
        return Value::NIL;
    }
    Value::number(f(args[0].as_number()))
}

fn binary(args: &[Value], f: impl Fn(f64, f64) -> f64) -> Value {
    if !args[0].is_number() || !args[1].is_number() {
        return Value::NIL;
    }
    Value::number(f(args[0].as_number(), args[1].as_number()))
}

fn math_floor(_vm: &mut Vm, args: &[Value]) -> Value {
    unary(args, f64::floor)
}

fn math_ceil(_vm: &mut Vm, args: &[Value]) -> Value {
    unary(args, f64::ceil)
}

fn math_round(_vm: &mut Vm, args: &[Value]) -> Value {
    unary(args, f64::round)
}

fn math_abs(_vm: &mut Vm, args: &[Value]) -> Value {
    unary(args, f64::abs)
}

fn math_sqrt(_vm: &mut Vm, args: &[Value]) -> Value {
    unary(args, f64::sqrt)
}

fn math_pow(_vm: &mut Vm, args: &[Value]) -> Value {
    binary(args, f64::powf)
}

fn math_log(_vm: &mut Vm, args: &[Value]) -> Value {
    unary(args, f64::ln)
}

fn math_log10(_vm: &mut Vm, args: &[Value]) -> Value {
    unary(args, f64::log10)
}

fn math_exp(_vm: &mut Vm, args: &[Value]) -> Value {
    unary(args, f64::exp)
}

fn math_min(_vm: &mut Vm, args: &[Value]) -> Value {
    binary(args, f64::min)
}

fn math_max(_vm: &mut Vm, args: &[Value]) -> Value {
    binary(args, f64::max)
}

fn math_sin(_vm: &mut Vm, args: &[Value]) -> Value {
    unary(args, f64::sin)
}

fn math_cos(_vm: &mut Vm, args: &[Value]) -> Value {
    unary(args, f64::cos)
}

fn math_tan(_vm: &mut Vm, args: &[Value]) -> Value {
    unary(args, f64::tan)
}

fn math_asin(_vm: &mut Vm, args: &[Value]) -> Value {
    unary(args, f64::asin)
}

fn math_acos(_vm: &mut Vm, args: &[Value]) -> Value {
    unary(args, f64::acos)
}

fn math_atan(_vm: &mut Vm, args: &[Value]) -> Value {
    unary(args, f64::atan)
}

fn math_atan2(_vm: &mut Vm, args: &[Value]) -> Value {
    binary(args, f64::atan2)
}

fn math_rand(_vm: &mut Vm, _args: &[Value]) -> Value {
    Value::number(rand::random::<f64>())
}

fn math_rand_int(_vm: &mut Vm, args: &[Value]) -> Value {
    if !args[0].is_number() || !args[1].is_number() {
        return Value::NIL;
    }
    let min = args[0].as_number() as i64;
    let max = args[1].as_number() as i64;
    if max < min {
        return Value::NIL;
    }
    let n = rand::thread_rng().gen_range(min..=max);
    Value::number(n as f64)
}
