//! Regex Module
//!
//! Pattern matching over the `regex` crate: boolean match, first-match
//! search with capture groups, find-all, literal replacement, and split.
//! Invalid patterns raise `regex` errors; non-string arguments raise
//! `type` errors. Empty matches are skipped, so a pattern like `a*`
//! cannot loop forever on find-all.

use glipt_core::Value;
use regex::Regex;

use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    vm.define_module(
        "re",
        &[
            ("match", re_match, 2),
            ("search", re_search, 2),
            ("find_all", re_find_all, 2),
            ("replace", re_replace, 3),
            ("split", re_split, 2),
        ],
    );
}

fn compile(vm: &mut Vm, pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(_) => {
            vm.raise_error("Invalid regex pattern", "regex");
            None
        }
    }
}

fn string_args(vm: &mut Vm, args: &[Value], who: &str) -> Option<(String, String)> {
    match (vm.str_arg(args[0]), vm.str_arg(args[1])) {
        (Some(pattern), Some(text)) => Some((pattern.to_owned(), text.to_owned())),
        _ => {
            vm.raise_error(&format!("{who} requires string arguments"), "type");
            None
        }
    }
}

fn re_match(vm: &mut Vm, args: &[Value]) -> Value {
    let Some((pattern, text)) = string_args(vm, args, "re.match") else {
        return Value::boolean(false);
    };
    let Some(re) = compile(vm, &pattern) else {
        return Value::boolean(false);
    };
    Value::boolean(re.is_match(&text))
}

fn re_search(vm: &mut Vm, args: &[Value]) -> Value {
    let Some((pattern, text)) = string_args(vm, args, "re.search") else {
        return Value::NIL;
    };
    let Some(re) = compile(vm, &pattern) else {
        return Value::NIL;
    };

    let Some(captures) = re.captures(&text) else {
        return Value::NIL;
    };
    let whole = captures.get(0).expect("group 0 always present");

    let result = vm.new_map();
    vm.push(Value::object(result)); // protect while building

    let matched = vm.new_string(whole.as_str());
    vm.map_set_str(result, "matched", matched);
    vm.map_set_str(result, "start", Value::number(whole.start() as f64));
    vm.map_set_str(result, "end", Value::number(whole.end() as f64));

    if captures.len() > 1 {
        let groups = vm.new_list();
        vm.push(Value::object(groups));
        for i in 1..captures.len() {
            let group = match captures.get(i) {
                Some(m) => vm.new_string(m.as_str()),
                None => Value::NIL,
            };
            vm.heap.list_mut(groups).items.push(group);
        }
        vm.pop();
        vm.map_set_str(result, "groups", Value::object(groups));
    }

    vm.pop();
    Value::object(result)
}

fn re_find_all(vm: &mut Vm, args: &[Value]) -> Value {
    let Some((pattern, text)) = string_args(vm, args, "re.find_all") else {
        return Value::NIL;
    };
    let Some(re) = compile(vm, &pattern) else {
        return Value::NIL;
    };

    let matches: Vec<String> = re
        .find_iter(&text)
        .filter(|m| !m.as_str().is_empty())
        .map(|m| m.as_str().to_owned())
        .collect();

    let list = vm.new_list();
    vm.push(Value::object(list)); // protect across interning
    for matched in matches {
        let matched = vm.take_string(matched);
        vm.heap.list_mut(list).items.push(matched);
    }
    vm.pop();
    Value::object(list)
}

fn re_replace(vm: &mut Vm, args: &[Value]) -> Value {
    let Some((pattern, text)) = string_args(vm, args, "re.replace") else {
        return Value::NIL;
    };
    let Some(replacement) = vm.str_arg(args[2]) else {
        vm.raise_error("re.replace requires string arguments", "type");
        return Value::NIL;
    };
    let replacement = replacement.to_owned();
    let Some(re) = compile(vm, &pattern) else {
        return Value::NIL;
    };

    // The replacement is literal text, not a capture template.
    let replaced = re
        .replace_all(&text, regex::NoExpand(&replacement))
        .into_owned();
    vm.take_string(replaced)
}

fn re_split(vm: &mut Vm, args: &[Value]) -> Value {
    let Some((pattern, text)) = string_args(vm, args, "re.split") else {
        return Value::NIL;
    };
    let Some(re) = compile(vm, &pattern) else {
        return Value::NIL;
    };

    let parts: Vec<String> = re.split(&text).map(str::to_owned).collect();

    let list = vm.new_list();
    vm.push(Value::object(list)); // protect across interning
    for part in parts {
        let part = vm.take_string(part);
        vm.heap.list_mut(list).items.push(part);
    }
    vm.pop();
    Value::object(list)
}
