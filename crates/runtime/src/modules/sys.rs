//! System Module
//!
//! Process identity, host information, clocks, and script arguments.
//! Identity calls go through `libc`; the rest uses the standard library.

use glipt_core::Value;

use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    vm.define_module(
        "sys",
        &[
            // Identity
            ("pid", sys_pid, 0),
            ("ppid", sys_ppid, 0),
            ("uid", sys_uid, 0),
            ("gid", sys_gid, 0),
            ("hostname", sys_hostname, 0),
            ("username", sys_username, 0),
            // Platform
            ("platform", sys_platform, 0),
            ("arch", sys_arch, 0),
            ("cpu_count", sys_cpu_count, 0),
            // Clocks
            ("clock", sys_clock, 0),
            ("time", sys_time, 0),
            // Environment
            ("cwd", sys_cwd, 0),
            ("args", sys_args, 0),
        ],
    );
}

fn sys_pid(_vm: &mut Vm, _args: &[Value]) -> Value {
    Value::number(f64::from(std::process::id()))
}

fn sys_ppid(_vm: &mut Vm, _args: &[Value]) -> Value {
    Value::number(f64::from(unsafe { libc::getppid() }))
}

fn sys_uid(_vm: &mut Vm, _args: &[Value]) -> Value {
    Value::number(f64::from(unsafe { libc::getuid() }))
}

fn sys_gid(_vm: &mut Vm, _args: &[Value]) -> Value {
    Value::number(f64::from(unsafe { libc::getgid() }))
}

fn sys_hostname(vm: &mut Vm, _args: &[Value]) -> Value {
    let mut buf = [0u8; 256];
    let result = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if result != 0 {
        return Value::NIL;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..len]).into_owned();
    vm.take_string(name)
}

fn sys_username(vm: &mut Vm, _args: &[Value]) -> Value {
    let name = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_default();
    vm.take_string(name)
}

fn sys_platform(vm: &mut Vm, _args: &[Value]) -> Value {
    vm.new_string(std::env::consts::OS)
}

fn sys_arch(vm: &mut Vm, _args: &[Value]) -> Value {
    vm.new_string(std::env::consts::ARCH)
}

fn sys_cpu_count(_vm: &mut Vm, _args: &[Value]) -> Value {
    let count = std::thread::available_parallelism()
        .map(|n| n.get() as f64)
        .unwrap_or(1.0);
    Value::number(count)
}

fn sys_clock(vm: &mut Vm, _args: &[Value]) -> Value {
    Value::number(vm.start_time.elapsed().as_secs_f64())
}

fn sys_time(_vm: &mut Vm, _args: &[Value]) -> Value {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Value::number(now)
}

fn sys_cwd(vm: &mut Vm, _args: &[Value]) -> Value {
    match std::env::current_dir() {
        Ok(dir) => vm.take_string(dir.to_string_lossy().into_owned()),
        Err(_) => Value::NIL,
    }
}

fn sys_args(vm: &mut Vm, _args: &[Value]) -> Value {
    let script_args = vm.script_args.clone();
    let list = vm.new_list();
    vm.push(Value::object(list)); // protect across interning
    for arg in script_args {
        let arg = vm.take_string(arg);
        vm.heap.list_mut(list).items.push(arg);
    }
    vm.pop();
    Value::object(list)
}
