//! Process Module
//!
//! Subprocess execution with an enforced timeout, process control, and a
//! retry combinator that calls back into the interpreter.

use std::time::Duration;

use glipt_core::{ObjKind, Value};

use crate::permission::PermKind;
use crate::process;
use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    vm.define_module(
        "proc",
        &[
            ("exec", proc_exec, -1),
            ("kill", proc_kill, -1),
            ("running", proc_running, 1),
            ("pid", proc_pid, 0),
            ("retry", proc_retry, -1),
            ("sleep", proc_sleep, 1),
        ],
    );
}

fn proc_exec(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(command) = args.first().and_then(|v| vm.str_arg(*v)) else {
        return Value::NIL;
    };
    let command = command.to_owned();

    if !vm.permissions.check(PermKind::Exec, &command) {
        vm.raise_error(
            &format!("Permission denied: exec \"{command}\""),
            "permission",
        );
        return Value::NIL;
    }

    let timeout = match args.get(1) {
        Some(v) if v.is_number() => Some(v.as_number()),
        _ => None,
    };

    let output = match process::exec_command(&command, timeout) {
        Ok(output) => output,
        Err(err) => {
            vm.raise_error(&format!("Failed to run command: {err}"), "exec");
            return Value::NIL;
        }
    };

    if output.timed_out {
        let secs = timeout.unwrap_or(0.0);
        vm.raise_error(
            &format!("Command timed out after {secs}s: {command}"),
            "exec",
        );
        return Value::NIL;
    }

    let map = vm.new_map();
    vm.push(Value::object(map)); // protect while building

    vm.map_set_str(map, "code", Value::number(f64::from(output.code)));
    let stdout = vm.new_string(&output.stdout);
    vm.map_set_str(map, "stdout", stdout);
    let trimmed = output.stdout.trim_end_matches(['\n', '\r']);
    let trimmed = vm.new_string(trimmed);
    vm.map_set_str(map, "output", trimmed);
    let stderr = vm.new_string(&output.stderr);
    vm.map_set_str(map, "stderr", stderr);

    vm.pop();

    if output.code != 0 {
        vm.raise_error(
            &format!("Command failed with exit code {}: {command}", output.code),
            "exec",
        );
        return Value::NIL;
    }

    Value::object(map)
}

fn proc_kill(_vm: &mut Vm, args: &[Value]) -> Value {
    let Some(pid) = args.first().filter(|v| v.is_number()) else {
        return Value::NIL;
    };
    let pid = pid.as_number() as i32;
    let signal = match args.get(1) {
        Some(v) if v.is_number() => v.as_number() as i32,
        _ => libc::SIGTERM,
    };
    Value::boolean(unsafe { libc::kill(pid, signal) } == 0)
}

fn proc_running(_vm: &mut Vm, args: &[Value]) -> Value {
    if !args[0].is_number() {
        return Value::NIL;
    }
    let pid = args[0].as_number() as i32;
    // Signal 0 probes for existence without delivering anything.
    Value::boolean(unsafe { libc::kill(pid, 0) } == 0)
}

fn proc_pid(_vm: &mut Vm, _args: &[Value]) -> Value {
    Value::number(f64::from(std::process::id()))
}

/// `retry(n, [backoffBase,] fn)`: call `fn` until it succeeds, sleeping
/// `backoffBase * 2^attempt` between failures. Raised errors inside the
/// callback count as failures; the last one is replaced by a `retry`
/// error once attempts run out.
fn proc_retry(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() < 2 || !args[0].is_number() {
        return Value::NIL;
    }
    let attempts = args[0].as_number() as i64;

    let mut function = Value::NIL;
    let mut backoff = 1.0;
    for (i, arg) in args.iter().enumerate().skip(1) {
        if arg.is_object()
            && matches!(
                vm.heap.kind(arg.as_object()),
                ObjKind::Closure | ObjKind::Native
            )
        {
            function = *arg;
        } else if arg.is_number() && i == 1 {
            backoff = arg.as_number();
        }
    }

    if function.is_nil() {
        vm.raise_error("retry requires a function argument", "type");
        return Value::NIL;
    }

    for attempt in 0..attempts {
        vm.has_error = false;
        vm.current_error = Value::NIL;
        vm.push(function);
        let result = vm.call_function(function, 0);
        if vm.has_pending_fault() {
            return Value::NIL;
        }
        if vm.had_failure() {
            if attempt < attempts - 1 {
                vm.has_error = false;
                vm.current_error = Value::NIL;
                let wait = backoff * f64::from(2u32.saturating_pow(attempt as u32));
                if wait > 0.0 {
                    std::thread::sleep(Duration::from_secs_f64(wait));
                }
                continue;
            }
            break;
        }
        return result;
    }

    if !vm.has_error {
        vm.raise_error("All retry attempts failed", "retry");
    }
    Value::NIL
}

fn proc_sleep(_vm: &mut Vm, args: &[Value]) -> Value {
    if args[0].is_number() {
        let seconds = args[0].as_number();
        if seconds > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(seconds));
        }
    }
    Value::NIL
}
