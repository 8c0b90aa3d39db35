//! Built-in Globals
//!
//! The general-purpose natives registered directly in globals at VM init.
//! Standard modules (`fs`, `proc`, …) live under `modules/`. Natives take
//! an argument snapshot and return a value; failures surface through
//! `Vm::raise_error`, never panics.

use std::io::BufRead;

use glipt_core::{values_equal, Heap, ObjKind, Object, Value};

use crate::dataformat;
use crate::parallel;
use crate::permission::PermKind;
use crate::process;
use crate::vm::Vm;

pub fn register_builtins(vm: &mut Vm) {
    vm.define_native("print", native_print, -1);
    vm.define_native("println", native_println, -1);
    vm.define_native("input", native_input, -1);
    vm.define_native("exit", native_exit, -1);
    vm.define_native("clock", native_clock, 0);
    vm.define_native("len", native_len, 1);
    vm.define_native("type", native_type, 1);
    vm.define_native("str", native_str, 1);
    vm.define_native("append", native_append, 2);
    vm.define_native("pop", native_pop, 1);
    vm.define_native("keys", native_keys, 1);
    vm.define_native("values", native_values, 1);
    vm.define_native("contains", native_contains, 2);
    vm.define_native("range", native_range, -1);
    vm.define_native("join", native_join, -1);
    vm.define_native("exec", native_exec, -1);

    vm.define_native("parse_json", native_parse_json, 1);
    vm.define_native("to_json", native_to_json, 1);

    vm.define_native("read", native_read, 1);
    vm.define_native("write", native_write, 2);

    vm.define_native("env", native_env, 1);
    vm.define_native("sleep", native_sleep, 1);
    vm.define_native("assert", native_assert, -1);

    // Strings
    vm.define_native("split", native_split, 2);
    vm.define_native("trim", native_trim, 1);
    vm.define_native("replace", native_replace, 3);
    vm.define_native("upper", native_upper, 1);
    vm.define_native("lower", native_lower, 1);
    vm.define_native("starts_with", native_starts_with, 2);
    vm.define_native("ends_with", native_ends_with, 2);

    // Collections
    vm.define_native("sort", native_sort, 1);
    vm.define_native("map_fn", native_map_fn, 2);
    vm.define_native("filter", native_filter, 2);
    vm.define_native("reduce", native_reduce, -1);

    // Type conversions
    vm.define_native("num", native_num, 1);
    vm.define_native("bool", native_bool, 1);

    vm.define_native("format", native_format, -1);
    vm.define_native("debug", native_debug, -1);
    vm.define_native("parallel_exec", parallel::native_parallel_exec, 1);
}

// ---- Display formatting ----

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_owned();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// The display form used by print, join, and the debug aids. Strings
/// render raw; containers render recursively.
pub fn format_value(heap: &Heap, value: Value) -> String {
    if value.is_nil() {
        return "nil".to_owned();
    }
    if value.is_bool() {
        return if value.as_bool() { "true" } else { "false" }.to_owned();
    }
    if value.is_number() {
        return format_number(value.as_number());
    }

    let r = value.as_object();
    match heap.get(r) {
        Object::String(s) => s.chars.clone(),
        Object::Function(f) => match f.name {
            None => "<script>".to_owned(),
            Some(name) => format!("<fn {}>", heap.string(name).chars),
        },
        Object::Closure(c) => match heap.function(c.function).name {
            None => "<script>".to_owned(),
            Some(name) => format!("<fn {}>", heap.string(name).chars),
        },
        Object::Upvalue(_) => "<upvalue>".to_owned(),
        Object::Native(n) => format!("<native {}>", n.name),
        Object::List(l) => {
            let items: Vec<String> = l.items.iter().map(|v| format_value(heap, *v)).collect();
            format!("[{}]", items.join(", "))
        }
        Object::Map(m) => {
            let entries: Vec<String> = m
                .table
                .iter()
                .map(|(k, v)| {
                    format!("{}: {}", heap.string(k).chars, format_value(heap, v))
                })
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}

// ---- I/O ----

fn native_print(vm: &mut Vm, args: &[Value]) -> Value {
    let mut line = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&format_value(&vm.heap, *arg));
    }
    line.push('\n');
    vm.write_out(&line);
    Value::NIL
}

fn native_println(vm: &mut Vm, args: &[Value]) -> Value {
    native_print(vm, args)
}

fn native_input(vm: &mut Vm, args: &[Value]) -> Value {
    if let Some(prompt) = args.first().and_then(|v| vm.str_arg(*v)) {
        let prompt = prompt.to_owned();
        vm.write_out(&prompt);
    }
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => Value::NIL,
        Ok(_) => {
            if line.ends_with('\n') {
                line.pop();
            }
            vm.take_string(line)
        }
    }
}

fn native_exit(vm: &mut Vm, args: &[Value]) -> Value {
    match args.first() {
        Some(v) if v.is_number() => std::process::exit(v.as_number() as i32),
        Some(v) => {
            // A string argument is an error message.
            if let Some(message) = vm.str_arg(*v) {
                eprintln!("{message}");
                std::process::exit(1);
            }
            std::process::exit(0)
        }
        _ => std::process::exit(0),
    }
}

fn native_clock(vm: &mut Vm, _args: &[Value]) -> Value {
    Value::number(vm.start_time.elapsed().as_secs_f64())
}

// ---- Inspection ----

fn native_len(vm: &mut Vm, args: &[Value]) -> Value {
    let value = args[0];
    if value.is_object() {
        let r = value.as_object();
        match vm.heap.kind(r) {
            ObjKind::String => return Value::number(vm.heap.string(r).chars.len() as f64),
            ObjKind::List => return Value::number(vm.heap.list(r).items.len() as f64),
            _ => {}
        }
    }
    Value::NIL
}

fn native_type(vm: &mut Vm, args: &[Value]) -> Value {
    let value = args[0];
    let name = if value.is_bool() {
        "bool"
    } else if value.is_nil() {
        "nil"
    } else if value.is_number() {
        "number"
    } else {
        match vm.heap.kind(value.as_object()) {
            ObjKind::String => "string",
            ObjKind::Function | ObjKind::Closure | ObjKind::Native => "function",
            ObjKind::List => "list",
            ObjKind::Map => "map",
            ObjKind::Upvalue => "object",
        }
    };
    vm.new_string(name)
}

fn native_str(vm: &mut Vm, args: &[Value]) -> Value {
    let value = args[0];
    if vm.str_arg(value).is_some() {
        return value;
    }
    let text = if value.is_number() {
        format_number(value.as_number())
    } else if value.is_bool() {
        if value.as_bool() { "true" } else { "false" }.to_owned()
    } else if value.is_nil() {
        "nil".to_owned()
    } else {
        "<object>".to_owned()
    };
    vm.take_string(text)
}

// ---- Collections ----

fn native_append(vm: &mut Vm, args: &[Value]) -> Value {
    let list = args[0];
    if !list.is_object() || vm.heap.kind(list.as_object()) != ObjKind::List {
        return Value::NIL;
    }
    vm.heap.list_mut(list.as_object()).items.push(args[1]);
    list
}

fn native_pop(vm: &mut Vm, args: &[Value]) -> Value {
    let list = args[0];
    if !list.is_object() || vm.heap.kind(list.as_object()) != ObjKind::List {
        return Value::NIL;
    }
    vm.heap
        .list_mut(list.as_object())
        .items
        .pop()
        .unwrap_or(Value::NIL)
}

fn native_keys(vm: &mut Vm, args: &[Value]) -> Value {
    let map = args[0];
    if !map.is_object() || vm.heap.kind(map.as_object()) != ObjKind::Map {
        return Value::NIL;
    }
    let list = vm.new_list();
    let capacity = vm.heap.map(map.as_object()).table.capacity();
    for index in 0..capacity {
        if let Some((key, _)) = vm.heap.map(map.as_object()).table.bucket(index) {
            vm.heap.list_mut(list).items.push(Value::object(key));
        }
    }
    Value::object(list)
}

fn native_values(vm: &mut Vm, args: &[Value]) -> Value {
    let map = args[0];
    if !map.is_object() || vm.heap.kind(map.as_object()) != ObjKind::Map {
        return Value::NIL;
    }
    let list = vm.new_list();
    let capacity = vm.heap.map(map.as_object()).table.capacity();
    for index in 0..capacity {
        if let Some((_, value)) = vm.heap.map(map.as_object()).table.bucket(index) {
            vm.heap.list_mut(list).items.push(value);
        }
    }
    Value::object(list)
}

fn native_contains(vm: &mut Vm, args: &[Value]) -> Value {
    let haystack = args[0];
    let needle = args[1];

    if haystack.is_object() {
        let r = haystack.as_object();
        match vm.heap.kind(r) {
            ObjKind::List => {
                let found = vm
                    .heap
                    .list(r)
                    .items
                    .iter()
                    .any(|item| values_equal(*item, needle));
                return Value::boolean(found);
            }
            ObjKind::String => {
                if let Some(sub) = vm.str_arg(needle) {
                    return Value::boolean(vm.heap.string(r).chars.contains(sub));
                }
            }
            ObjKind::Map => {
                if vm.str_arg(needle).is_some() {
                    let key = needle.as_object();
                    let hash = vm.heap.str_hash(key);
                    return Value::boolean(vm.heap.map(r).table.get(key, hash).is_some());
                }
            }
            _ => {}
        }
    }
    Value::boolean(false)
}

fn native_range(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() < 2 || !args[0].is_number() || !args[1].is_number() {
        return Value::NIL;
    }
    let start = args[0].as_number();
    let end = args[1].as_number();
    let step = match args.get(2) {
        Some(v) if v.is_number() => v.as_number(),
        _ => 1.0,
    };
    if step == 0.0 {
        return Value::NIL;
    }

    let list = vm.new_list();
    let items = &mut vm.heap.list_mut(list).items;
    if step > 0.0 {
        let mut i = start;
        while i < end {
            items.push(Value::number(i));
            i += step;
        }
    } else {
        let mut i = start;
        while i > end {
            items.push(Value::number(i));
            i += step;
        }
    }
    Value::object(list)
}

fn native_join(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(list) = args.first().copied() else {
        return vm.new_string("");
    };
    if !list.is_object() || vm.heap.kind(list.as_object()) != ObjKind::List {
        return vm.new_string("");
    }
    let separator = args
        .get(1)
        .and_then(|v| vm.str_arg(*v))
        .unwrap_or("")
        .to_owned();

    let mut out = String::new();
    let count = vm.heap.list(list.as_object()).items.len();
    for i in 0..count {
        if i > 0 {
            out.push_str(&separator);
        }
        let item = vm.heap.list(list.as_object()).items[i];
        if let Some(s) = vm.str_arg(item) {
            out.push_str(s);
        } else if item.is_number() {
            out.push_str(&format_number(item.as_number()));
        } else if item.is_bool() {
            out.push_str(if item.as_bool() { "true" } else { "false" });
        } else {
            out.push_str("nil");
        }
    }
    vm.take_string(out)
}

fn native_sort(vm: &mut Vm, args: &[Value]) -> Value {
    let list = args[0];
    if !list.is_object() || vm.heap.kind(list.as_object()) != ObjKind::List {
        return Value::NIL;
    }
    let r = list.as_object();
    let mut items = std::mem::take(&mut vm.heap.list_mut(r).items);

    // Adjacent-number bubble pass: non-number elements keep their spots.
    let count = items.len();
    for i in 0..count.saturating_sub(1) {
        for j in 0..count - i - 1 {
            if items[j].is_number()
                && items[j + 1].is_number()
                && items[j].as_number() > items[j + 1].as_number()
            {
                items.swap(j, j + 1);
            }
        }
    }

    vm.heap.list_mut(r).items = items;
    list
}

// ---- Higher-order natives (re-enter the interpreter) ----

fn native_map_fn(vm: &mut Vm, args: &[Value]) -> Value {
    let list = args[0];
    if !list.is_object() || vm.heap.kind(list.as_object()) != ObjKind::List {
        return Value::NIL;
    }
    let function = args[1];
    let result = vm.new_list();
    vm.push(Value::object(result)); // GC protection

    let count = vm.heap.list(list.as_object()).items.len();
    for i in 0..count {
        let item = vm
            .heap
            .list(list.as_object())
            .items
            .get(i)
            .copied()
            .unwrap_or(Value::NIL);
        vm.push(function);
        vm.push(item);
        let mapped = vm.call_function(function, 1);
        if vm.had_failure() {
            vm.pop();
            return Value::NIL;
        }
        vm.heap.list_mut(result).items.push(mapped);
    }

    vm.pop();
    Value::object(result)
}

fn native_filter(vm: &mut Vm, args: &[Value]) -> Value {
    let list = args[0];
    if !list.is_object() || vm.heap.kind(list.as_object()) != ObjKind::List {
        return Value::NIL;
    }
    let function = args[1];
    let result = vm.new_list();
    vm.push(Value::object(result));

    let count = vm.heap.list(list.as_object()).items.len();
    for i in 0..count {
        let item = vm
            .heap
            .list(list.as_object())
            .items
            .get(i)
            .copied()
            .unwrap_or(Value::NIL);
        vm.push(function);
        vm.push(item);
        let keep = vm.call_function(function, 1);
        if vm.had_failure() {
            vm.pop();
            return Value::NIL;
        }
        if !keep.is_falsey() {
            vm.heap.list_mut(result).items.push(item);
        }
    }

    vm.pop();
    Value::object(result)
}

fn native_reduce(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() < 2 {
        return Value::NIL;
    }
    let list = args[0];
    if !list.is_object() || vm.heap.kind(list.as_object()) != ObjKind::List {
        return Value::NIL;
    }
    let function = args[1];
    let count = vm.heap.list(list.as_object()).items.len();

    if count == 0 {
        return args.get(2).copied().unwrap_or(Value::NIL);
    }

    let (mut accumulator, start) = match args.get(2) {
        Some(seed) => (*seed, 0),
        None => (vm.heap.list(list.as_object()).items[0], 1),
    };

    for i in start..count {
        let item = vm
            .heap
            .list(list.as_object())
            .items
            .get(i)
            .copied()
            .unwrap_or(Value::NIL);
        vm.push(function);
        vm.push(accumulator);
        vm.push(item);
        accumulator = vm.call_function(function, 2);
        if vm.had_failure() {
            return Value::NIL;
        }
    }
    accumulator
}

// ---- Strings ----

fn native_split(vm: &mut Vm, args: &[Value]) -> Value {
    let (Some(_), Some(_)) = (vm.str_arg(args[0]), vm.str_arg(args[1])) else {
        return Value::NIL;
    };
    let text = vm.str_arg(args[0]).unwrap().to_owned();
    let delimiter = vm.str_arg(args[1]).unwrap().to_owned();

    let list = vm.new_list();
    vm.push(Value::object(list)); // protect across piece interning

    if delimiter.is_empty() {
        // Split into single-byte strings.
        let bytes = text.into_bytes();
        for byte in bytes {
            let piece = String::from_utf8_lossy(&[byte]).into_owned();
            let piece = vm.take_string(piece);
            vm.heap.list_mut(list).items.push(piece);
        }
    } else {
        for part in text.split(&delimiter) {
            let piece = vm.new_string(part);
            vm.heap.list_mut(list).items.push(piece);
        }
    }

    vm.pop();
    Value::object(list)
}

fn native_trim(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(text) = vm.str_arg(args[0]) else {
        return Value::NIL;
    };
    let trimmed = text
        .trim_matches(|c| matches!(c, ' ' | '\t' | '\n' | '\r'))
        .to_owned();
    vm.take_string(trimmed)
}

fn native_replace(vm: &mut Vm, args: &[Value]) -> Value {
    let (Some(text), Some(old), Some(new)) = (
        vm.str_arg(args[0]),
        vm.str_arg(args[1]),
        vm.str_arg(args[2]),
    ) else {
        return Value::NIL;
    };
    if old.is_empty() {
        return args[0];
    }
    let replaced = text.replace(old, new);
    vm.take_string(replaced)
}

fn native_upper(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(text) = vm.str_arg(args[0]) else {
        return Value::NIL;
    };
    let upper = text.to_ascii_uppercase();
    vm.take_string(upper)
}

fn native_lower(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(text) = vm.str_arg(args[0]) else {
        return Value::NIL;
    };
    let lower = text.to_ascii_lowercase();
    vm.take_string(lower)
}

fn native_starts_with(vm: &mut Vm, args: &[Value]) -> Value {
    match (vm.str_arg(args[0]), vm.str_arg(args[1])) {
        (Some(text), Some(prefix)) => Value::boolean(text.starts_with(prefix)),
        _ => Value::boolean(false),
    }
}

fn native_ends_with(vm: &mut Vm, args: &[Value]) -> Value {
    match (vm.str_arg(args[0]), vm.str_arg(args[1])) {
        (Some(text), Some(suffix)) => Value::boolean(text.ends_with(suffix)),
        _ => Value::boolean(false),
    }
}

// ---- Conversions ----

fn native_num(vm: &mut Vm, args: &[Value]) -> Value {
    let value = args[0];
    if value.is_number() {
        return value;
    }
    if value.is_bool() {
        return Value::number(if value.as_bool() { 1.0 } else { 0.0 });
    }
    if let Some(text) = vm.str_arg(value) {
        // Longest numeric prefix, strtod-style.
        let trimmed = text.trim_start();
        let bytes = trimmed.as_bytes();
        let mut end = 0;
        if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
            end += 1;
        }
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end < bytes.len() && bytes[end] == b'.' {
            end += 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
        if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
            let mut exp_end = end + 1;
            if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
                exp_end += 1;
            }
            let digits_start = exp_end;
            while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
                exp_end += 1;
            }
            if exp_end > digits_start {
                end = exp_end;
            }
        }
        if let Ok(parsed) = trimmed[..end].parse::<f64>() {
            return Value::number(parsed);
        }
    }
    Value::NIL
}

fn native_bool(_vm: &mut Vm, args: &[Value]) -> Value {
    Value::boolean(!args[0].is_falsey())
}

// ---- Formatting & diagnostics ----

fn native_format(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(template) = args.first().and_then(|v| vm.str_arg(*v)) else {
        return Value::NIL;
    };
    let template = template.to_owned();

    let mut out = String::with_capacity(template.len());
    let mut arg_index = 1;
    let mut rest = template.as_str();
    while let Some(brace) = rest.find("{}") {
        out.push_str(&rest[..brace]);
        rest = &rest[brace + 2..];
        if arg_index < args.len() {
            let value = args[arg_index];
            arg_index += 1;
            if let Some(s) = vm.str_arg(value) {
                out.push_str(s);
            } else if value.is_number() {
                out.push_str(&format_number(value.as_number()));
            } else if value.is_bool() {
                out.push_str(if value.as_bool() { "true" } else { "false" });
            } else if value.is_nil() {
                out.push_str("nil");
            } else {
                out.push_str("<object>");
            }
        }
    }
    out.push_str(rest);
    vm.take_string(out)
}

fn native_debug(vm: &mut Vm, args: &[Value]) -> Value {
    let mut line = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str("[DEBUG] ");
        line.push_str(&format_value(&vm.heap, *arg));
    }
    eprintln!("{line}");
    Value::NIL
}

fn native_assert(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(condition) = args.first() else {
        return Value::NIL;
    };
    if condition.is_falsey() {
        match args.get(1).and_then(|v| vm.str_arg(*v)) {
            Some(message) => eprintln!("Assertion failed: {message}"),
            None => eprintln!("Assertion failed"),
        }
        std::process::exit(1);
    }
    Value::boolean(true)
}

// ---- System ----

fn native_exec(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(command) = args.first().and_then(|v| vm.str_arg(*v)) else {
        return Value::NIL;
    };
    let command = command.to_owned();

    if !vm.permissions.check(PermKind::Exec, &command) {
        vm.raise_error(&format!("Permission denied: exec \"{command}\""), "permission");
        return Value::NIL;
    }

    let output = match process::exec_command(&command, None) {
        Ok(output) => output,
        Err(err) => {
            vm.raise_error(&format!("Failed to run command: {err}"), "exec");
            return Value::NIL;
        }
    };

    let map = vm.new_map();
    vm.push(Value::object(map)); // protect while building

    let stdout = vm.new_string(&output.stdout);
    vm.map_set_str(map, "stdout", stdout);
    let stderr = vm.new_string(&output.stderr);
    vm.map_set_str(map, "stderr", stderr);
    vm.map_set_str(map, "exitCode", Value::number(f64::from(output.code)));

    // Trailing newline stripped for convenience.
    let trimmed = output.stdout.strip_suffix('\n').unwrap_or(&output.stdout);
    let trimmed = vm.new_string(trimmed);
    vm.map_set_str(map, "output", trimmed);

    vm.pop();

    if output.code != 0 {
        vm.raise_error(
            &format!(
                "Command failed with exit code {}: {command}",
                output.code
            ),
            "exec",
        );
    }

    Value::object(map)
}

fn native_read(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(path) = vm.str_arg(args[0]) else {
        return Value::NIL;
    };
    let path = path.to_owned();

    if !vm.permissions.check(PermKind::Read, &path) {
        vm.raise_error(&format!("Permission denied: read \"{path}\""), "permission");
        return Value::NIL;
    }

    let Ok(bytes) = std::fs::read(&path) else {
        return Value::NIL;
    };
    let text = String::from_utf8_lossy(&bytes).into_owned();

    // Auto-detect format by extension.
    if path.ends_with(".json") {
        return dataformat::parse_json(vm, &text);
    }
    vm.take_string(text)
}

fn native_write(vm: &mut Vm, args: &[Value]) -> Value {
    let (Some(path), Some(content)) = (vm.str_arg(args[0]), vm.str_arg(args[1])) else {
        return Value::boolean(false);
    };
    let path = path.to_owned();
    let content = content.to_owned();

    if !vm.permissions.check(PermKind::Write, &path) {
        vm.raise_error(&format!("Permission denied: write \"{path}\""), "permission");
        return Value::boolean(false);
    }

    Value::boolean(std::fs::write(&path, content).is_ok())
}

fn native_env(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(name) = vm.str_arg(args[0]) else {
        return Value::NIL;
    };
    let name = name.to_owned();

    if !vm.permissions.check(PermKind::Env, &name) {
        vm.raise_error(&format!("Permission denied: env \"{name}\""), "permission");
        return Value::NIL;
    }

    match std::env::var(&name) {
        Ok(value) => vm.take_string(value),
        Err(_) => Value::NIL,
    }
}

fn native_sleep(_vm: &mut Vm, args: &[Value]) -> Value {
    if args[0].is_number() {
        let seconds = args[0].as_number();
        if seconds > 0.0 {
            std::thread::sleep(std::time::Duration::from_secs_f64(seconds));
        }
    }
    Value::NIL
}

// ---- JSON ----

fn native_parse_json(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(text) = vm.str_arg(args[0]) else {
        return Value::NIL;
    };
    let text = text.to_owned();
    dataformat::parse_json(vm, &text)
}

fn native_to_json(vm: &mut Vm, args: &[Value]) -> Value {
    dataformat::to_json(vm, args[0])
}
