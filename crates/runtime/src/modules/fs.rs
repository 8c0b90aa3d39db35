//! Filesystem Module
//!
//! Directory listing, metadata, path utilities, and file operations.
//! Reads check the `read` capability on the path; mutations check
//! `write`. Pure path string manipulation is unchecked.

use std::path::Path;

use glipt_core::Value;

use crate::permission::PermKind;
use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    vm.define_module(
        "fs",
        &[
            // Directory operations
            ("list", fs_list, 1),
            ("mkdir", fs_mkdir, -1),
            ("rmdir", fs_rmdir, -1),
            ("exists", fs_exists, 1),
            ("isfile", fs_isfile, 1),
            ("isdir", fs_isdir, 1),
            // Metadata
            ("stat", fs_stat, 1),
            ("size", fs_size, 1),
            // Path utilities
            ("join", fs_join, -1),
            ("dirname", fs_dirname, 1),
            ("basename", fs_basename, 1),
            ("extname", fs_extname, 1),
            ("absolute", fs_absolute, 1),
            // File operations
            ("copy", fs_copy, 2),
            ("move", fs_move, 2),
            ("remove", fs_remove, 1),
        ],
    );
}

fn check_read(vm: &mut Vm, path: &str) -> bool {
    if vm.permissions.check(PermKind::Read, path) {
        return true;
    }
    vm.raise_error("Permission denied: read", "permission");
    false
}

fn check_write(vm: &mut Vm, path: &str) -> bool {
    if vm.permissions.check(PermKind::Write, path) {
        return true;
    }
    vm.raise_error("Permission denied: write", "permission");
    false
}

fn fs_list(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(path) = vm.str_arg(args[0]) else {
        return Value::NIL;
    };
    let path = path.to_owned();
    if !check_read(vm, &path) {
        return Value::NIL;
    }

    let entries = match std::fs::read_dir(&path) {
        Ok(entries) => entries,
        Err(_) => {
            vm.raise_error("Could not open directory", "io");
            return Value::NIL;
        }
    };

    let names: Vec<String> = entries
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();

    let list = vm.new_list();
    vm.push(Value::object(list)); // protect across name interning
    for name in names {
        let name = vm.take_string(name);
        vm.heap.list_mut(list).items.push(name);
    }
    vm.pop();
    Value::object(list)
}

fn fs_mkdir(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(path) = args.first().and_then(|v| vm.str_arg(*v)) else {
        return Value::NIL;
    };
    let path = path.to_owned();
    if !check_write(vm, &path) {
        return Value::NIL;
    }
    Value::boolean(std::fs::create_dir(&path).is_ok())
}

fn fs_rmdir(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(path) = args.first().and_then(|v| vm.str_arg(*v)) else {
        return Value::NIL;
    };
    let path = path.to_owned();
    if !check_write(vm, &path) {
        return Value::NIL;
    }
    Value::boolean(std::fs::remove_dir(&path).is_ok())
}

fn fs_exists(vm: &mut Vm, args: &[Value]) -> Value {
    match vm.str_arg(args[0]) {
        Some(path) => Value::boolean(Path::new(path).exists()),
        None => Value::NIL,
    }
}

fn fs_isfile(vm: &mut Vm, args: &[Value]) -> Value {
    match vm.str_arg(args[0]) {
        Some(path) => Value::boolean(Path::new(path).is_file()),
        None => Value::NIL,
    }
}

fn fs_isdir(vm: &mut Vm, args: &[Value]) -> Value {
    match vm.str_arg(args[0]) {
        Some(path) => Value::boolean(Path::new(path).is_dir()),
        None => Value::NIL,
    }
}

fn fs_stat(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(path) = vm.str_arg(args[0]) else {
        return Value::NIL;
    };
    let path = path.to_owned();
    if !check_read(vm, &path) {
        return Value::NIL;
    }

    let Ok(meta) = std::fs::metadata(&path) else {
        return Value::NIL;
    };
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as f64)
        .unwrap_or(0.0);
    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::MetadataExt;
        meta.mode() as f64
    };
    #[cfg(not(unix))]
    let mode = 0.0;

    let map = vm.new_map();
    vm.push(Value::object(map)); // protect while building
    vm.map_set_str(map, "size", Value::number(meta.len() as f64));
    vm.map_set_str(map, "mtime", Value::number(mtime));
    vm.map_set_str(map, "mode", Value::number(mode));
    vm.map_set_str(map, "isFile", Value::boolean(meta.is_file()));
    vm.map_set_str(map, "isDir", Value::boolean(meta.is_dir()));
    vm.pop();
    Value::object(map)
}

fn fs_size(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(path) = vm.str_arg(args[0]) else {
        return Value::NIL;
    };
    let path = path.to_owned();
    if !check_read(vm, &path) {
        return Value::NIL;
    }
    match std::fs::metadata(&path) {
        Ok(meta) => Value::number(meta.len() as f64),
        Err(_) => Value::NIL,
    }
}

fn fs_join(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() < 2 {
        return Value::NIL;
    }
    let mut joined = String::new();
    for (i, arg) in args.iter().enumerate() {
        let Some(part) = vm.str_arg(*arg) else {
            return Value::NIL;
        };
        if i > 0 && !joined.ends_with('/') {
            joined.push('/');
        }
        joined.push_str(part);
    }
    vm.take_string(joined)
}

fn fs_dirname(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(path) = vm.str_arg(args[0]) else {
        return Value::NIL;
    };
    let dir: String = match Path::new(path).parent() {
        None => {
            if path.starts_with('/') {
                "/".to_owned()
            } else {
                ".".to_owned()
            }
        }
        Some(parent) if parent.as_os_str().is_empty() => ".".to_owned(),
        Some(parent) => parent.to_string_lossy().into_owned(),
    };
    vm.take_string(dir)
}

fn fs_basename(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(path) = vm.str_arg(args[0]) else {
        return Value::NIL;
    };
    let base = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_owned());
    vm.take_string(base)
}

fn fs_extname(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(path) = vm.str_arg(args[0]) else {
        return Value::NIL;
    };
    let ext = match path.rfind('.') {
        Some(0) | None => String::new(),
        Some(index) => path[index..].to_owned(),
    };
    vm.take_string(ext)
}

fn fs_absolute(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(path) = vm.str_arg(args[0]) else {
        return Value::NIL;
    };
    match std::fs::canonicalize(path) {
        Ok(resolved) => vm.take_string(resolved.to_string_lossy().into_owned()),
        Err(_) => Value::NIL,
    }
}

fn fs_copy(vm: &mut Vm, args: &[Value]) -> Value {
    let (Some(src), Some(dst)) = (vm.str_arg(args[0]), vm.str_arg(args[1])) else {
        return Value::NIL;
    };
    let (src, dst) = (src.to_owned(), dst.to_owned());
    if !check_read(vm, &src) || !check_write(vm, &dst) {
        return Value::NIL;
    }
    Value::boolean(std::fs::copy(&src, &dst).is_ok())
}

fn fs_move(vm: &mut Vm, args: &[Value]) -> Value {
    let (Some(src), Some(dst)) = (vm.str_arg(args[0]), vm.str_arg(args[1])) else {
        return Value::NIL;
    };
    let (src, dst) = (src.to_owned(), dst.to_owned());
    if !check_write(vm, &src) || !check_write(vm, &dst) {
        return Value::NIL;
    }
    Value::boolean(std::fs::rename(&src, &dst).is_ok())
}

fn fs_remove(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(path) = vm.str_arg(args[0]) else {
        return Value::NIL;
    };
    let path = path.to_owned();
    if !check_write(vm, &path) {
        return Value::NIL;
    }
    let removed = std::fs::remove_file(&path).is_ok() || std::fs::remove_dir(&path).is_ok();
    Value::boolean(removed)
}
