//! Parallel Command Execution
//!
//! `parallel_exec(commands)` runs one blocking subprocess per list entry,
//! each on its own OS thread, and waits for all of them. Workers touch no
//! VM state: they hold only their command string and raw output buffers.
//! Results are materialized into values on the VM thread after every
//! worker has joined, so the VM needs no locks.

use std::thread;

use glipt_core::{ObjKind, Value};

use crate::permission::PermKind;
use crate::process::{self, ProcessOutput};
use crate::vm::Vm;

pub fn native_parallel_exec(vm: &mut Vm, args: &[Value]) -> Value {
    let list = args[0];
    if !list.is_object() || vm.heap.kind(list.as_object()) != ObjKind::List {
        return Value::NIL;
    }

    // Collect and permission-check every command before spawning anything.
    let mut commands: Vec<String> = Vec::new();
    let count = vm.heap.list(list.as_object()).items.len();
    for i in 0..count {
        let item = vm.heap.list(list.as_object()).items[i];
        let Some(command) = vm.str_arg(item) else {
            return Value::NIL;
        };
        commands.push(command.to_owned());
    }
    for command in &commands {
        if !vm.permissions.check(PermKind::Exec, command) {
            vm.raise_error(
                &format!("Permission denied: exec \"{command}\""),
                "permission",
            );
            return Value::NIL;
        }
    }

    if commands.is_empty() {
        return Value::object(vm.new_list());
    }

    // One worker per command; join them all before touching the heap.
    let outputs: Vec<ProcessOutput> = thread::scope(|scope| {
        let handles: Vec<_> = commands
            .iter()
            .map(|command| {
                scope.spawn(move || {
                    process::exec_command(command, None).unwrap_or(ProcessOutput {
                        code: -1,
                        stdout: String::new(),
                        stderr: String::from("failed to spawn command"),
                        timed_out: false,
                    })
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker thread panicked"))
            .collect()
    });

    let results = vm.new_list();
    vm.push(Value::object(results)); // protect while building maps

    for output in &outputs {
        let map = vm.new_map();
        vm.push(Value::object(map));

        let trimmed = output.stdout.strip_suffix('\n').unwrap_or(&output.stdout);
        let trimmed = vm.new_string(trimmed);
        vm.map_set_str(map, "output", trimmed);
        vm.map_set_str(map, "exitCode", Value::number(f64::from(output.code)));
        let stderr = vm.new_string(&output.stderr);
        vm.map_set_str(map, "stderr", stderr);

        vm.pop();
        vm.heap.list_mut(results).items.push(Value::object(map));
    }

    vm.pop();
    Value::object(results)
}
