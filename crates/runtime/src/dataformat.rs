//! JSON Parsing & Serialization
//!
//! Recursive descent over {null, bool, number, string, list, map},
//! producing interpreter values directly. Serialization is compact (no
//! whitespace) and follows the map's bucket iteration order, so a
//! canonical-form document round-trips byte for byte.

use glipt_core::{ObjRef, Object, Value};

use crate::vm::Vm;

struct JsonParser<'s> {
    source: &'s [u8],
    pos: usize,
    had_error: bool,
}

impl<'s> JsonParser<'s> {
    fn error(&mut self, message: &str) {
        if !self.had_error {
            eprintln!("JSON parse error at position {}: {}", self.pos, message);
            self.had_error = true;
        }
    }

    fn peek(&self) -> u8 {
        if self.pos >= self.source.len() {
            0
        } else {
            self.source[self.pos]
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), b' ' | b'\t' | b'\r' | b'\n') {
            self.pos += 1;
        }
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.peek() != expected {
            return false;
        }
        self.pos += 1;
        true
    }

    fn parse_value(&mut self, vm: &mut Vm) -> Value {
        self.skip_whitespace();
        let c = self.peek();
        if c == b'"' {
            return self.parse_string(vm);
        }
        if c == b'-' || c.is_ascii_digit() {
            return self.parse_number();
        }
        if c == b'[' {
            return self.parse_array(vm);
        }
        if c == b'{' {
            return self.parse_object(vm);
        }

        if self.source[self.pos..].starts_with(b"true") {
            self.pos += 4;
            return Value::TRUE;
        }
        if self.source[self.pos..].starts_with(b"false") {
            self.pos += 5;
            return Value::FALSE;
        }
        if self.source[self.pos..].starts_with(b"null") {
            self.pos += 4;
            return Value::NIL;
        }

        self.error("Unexpected character");
        Value::NIL
    }

    fn parse_string(&mut self, vm: &mut Vm) -> Value {
        if !self.matches(b'"') {
            self.error("Expected '\"'");
            return Value::NIL;
        }

        let mut out: Vec<u8> = Vec::new();
        while self.pos < self.source.len() && self.source[self.pos] != b'"' {
            let c = self.source[self.pos];
            if c == b'\\' && self.pos + 1 < self.source.len() {
                self.pos += 1;
                let escaped = self.source[self.pos];
                out.push(match escaped {
                    b'"' => b'"',
                    b'\\' => b'\\',
                    b'/' => b'/',
                    b'b' => 0x08,
                    b'f' => 0x0c,
                    b'n' => b'\n',
                    b'r' => b'\r',
                    b't' => b'\t',
                    other => other,
                });
            } else {
                out.push(c);
            }
            self.pos += 1;
        }

        if self.pos >= self.source.len() {
            self.error("Unterminated string");
            return Value::NIL;
        }
        self.pos += 1; // closing quote

        vm.take_string(String::from_utf8_lossy(&out).into_owned())
    }

    fn parse_number(&mut self) -> Value {
        let start = self.pos;
        if self.peek() == b'-' {
            self.pos += 1;
        }
        while self.peek().is_ascii_digit() {
            self.pos += 1;
        }
        if self.peek() == b'.' {
            self.pos += 1;
            while self.peek().is_ascii_digit() {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), b'e' | b'E') {
            self.pos += 1;
            if matches!(self.peek(), b'+' | b'-') {
                self.pos += 1;
            }
            while self.peek().is_ascii_digit() {
                self.pos += 1;
            }
        }

        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or("0");
        match text.parse::<f64>() {
            Ok(n) => Value::number(n),
            Err(_) => {
                self.error("Invalid number");
                Value::NIL
            }
        }
    }

    fn parse_array(&mut self, vm: &mut Vm) -> Value {
        self.matches(b'[');
        let list = vm.new_list();
        vm.push(Value::object(list)); // protect while filling

        self.skip_whitespace();
        if !self.matches(b']') {
            loop {
                let value = self.parse_value(vm);
                if self.had_error {
                    break;
                }
                vm.heap.list_mut(list).items.push(value);
                self.skip_whitespace();
                if !self.matches(b',') {
                    break;
                }
            }
            if !self.matches(b']') {
                self.error("Expected ']'");
            }
        }

        vm.pop();
        Value::object(list)
    }

    fn parse_object(&mut self, vm: &mut Vm) -> Value {
        self.matches(b'{');
        let map = vm.new_map();
        vm.push(Value::object(map)); // protect while filling

        self.skip_whitespace();
        if !self.matches(b'}') {
            loop {
                self.skip_whitespace();
                let key = self.parse_string(vm);
                if self.had_error {
                    break;
                }
                self.skip_whitespace();
                if !self.matches(b':') {
                    self.error("Expected ':'");
                    break;
                }
                // Keep the key rooted while the value parse allocates.
                vm.push(key);
                let value = self.parse_value(vm);
                let key = vm.pop();
                if self.had_error {
                    break;
                }
                let key_ref = key.as_object();
                let hash = vm.heap.str_hash(key_ref);
                vm.heap.map_mut(map).table.set(key_ref, hash, value);
                self.skip_whitespace();
                if !self.matches(b',') {
                    break;
                }
            }
            if !self.matches(b'}') {
                self.error("Expected '}'");
            }
        }

        vm.pop();
        Value::object(map)
    }
}

/// Parse JSON text into a value; a malformed document reports to stderr
/// and yields nil.
pub fn parse_json(vm: &mut Vm, text: &str) -> Value {
    let mut parser = JsonParser {
        source: text.as_bytes(),
        pos: 0,
        had_error: false,
    };
    let value = parser.parse_value(vm);
    if parser.had_error {
        return Value::NIL;
    }
    value
}

fn write_json_string(out: &mut String, text: &str) {
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
}

fn write_json_value(vm: &Vm, value: Value, out: &mut String) {
    if value.is_nil() {
        out.push_str("null");
        return;
    }
    if value.is_bool() {
        out.push_str(if value.as_bool() { "true" } else { "false" });
        return;
    }
    if value.is_number() {
        let n = value.as_number();
        if n == n.trunc() && (-1e15..=1e15).contains(&n) {
            out.push_str(&format!("{}", n as i64));
        } else {
            out.push_str(&format!("{n}"));
        }
        return;
    }

    let r: ObjRef = value.as_object();
    match vm.heap.get(r) {
        Object::String(s) => write_json_string(out, &s.chars),
        Object::List(l) => {
            out.push('[');
            for (i, item) in l.items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_value(vm, *item, out);
            }
            out.push(']');
        }
        Object::Map(m) => {
            out.push('{');
            let mut first = true;
            for (key, entry) in m.table.iter() {
                if !first {
                    out.push(',');
                }
                first = false;
                write_json_string(out, &vm.heap.string(key).chars);
                out.push(':');
                write_json_value(vm, entry, out);
            }
            out.push('}');
        }
        _ => out.push_str("null"),
    }
}

/// Serialize a value as compact JSON.
pub fn to_json(vm: &mut Vm, value: Value) -> Value {
    let mut out = String::new();
    write_json_value(vm, value, &mut out);
    vm.take_string(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(vm: &mut Vm, text: &str) -> String {
        let parsed = parse_json(vm, text);
        vm.push(parsed); // keep rooted across serialization
        let json = to_json(vm, parsed);
        vm.pop();
        vm.str_arg(json).unwrap().to_owned()
    }

    #[test]
    fn scalars_round_trip() {
        let mut vm = Vm::new();
        assert_eq!(roundtrip(&mut vm, "null"), "null");
        assert_eq!(roundtrip(&mut vm, "true"), "true");
        assert_eq!(roundtrip(&mut vm, "false"), "false");
        assert_eq!(roundtrip(&mut vm, "42"), "42");
        assert_eq!(roundtrip(&mut vm, "-3.5"), "-3.5");
        assert_eq!(roundtrip(&mut vm, "\"hi\""), "\"hi\"");
    }

    #[test]
    fn single_key_documents_round_trip_exactly() {
        let mut vm = Vm::new();
        let doc = r#"{"steps":[1,2,3,{"ok":true},null]}"#;
        assert_eq!(roundtrip(&mut vm, doc), doc);
    }

    #[test]
    fn multi_key_objects_keep_their_entries() {
        let mut vm = Vm::new();
        let value = parse_json(&mut vm, r#"{"name":"build","count":3,"ok":true}"#);
        assert!(value.is_object());
        let map = value.as_object();
        vm.push(value);
        let name = vm.map_get_str(map, "name").unwrap();
        assert_eq!(vm.str_arg(name), Some("build"));
        let count = vm.map_get_str(map, "count").unwrap();
        assert_eq!(count.as_number(), 3.0);
        let ok = vm.map_get_str(map, "ok").unwrap();
        assert!(ok.as_bool());
        vm.pop();
    }

    #[test]
    fn string_escapes_survive() {
        let mut vm = Vm::new();
        let doc = r#"["line\nbreak","tab\there","quote\"q"]"#;
        assert_eq!(roundtrip(&mut vm, doc), doc);
    }

    #[test]
    fn whitespace_is_tolerated_on_input() {
        let mut vm = Vm::new();
        let value = parse_json(&mut vm, "  { \"a\" : [ 1 , 2 ] }  ");
        vm.push(value);
        let json = to_json(&mut vm, value);
        assert_eq!(vm.str_arg(json), Some("{\"a\":[1,2]}"));
        vm.pop();
    }

    #[test]
    fn malformed_input_yields_nil() {
        let mut vm = Vm::new();
        assert!(parse_json(&mut vm, "{\"a\":").is_nil());
        assert!(parse_json(&mut vm, "[1,").is_nil());
        assert!(parse_json(&mut vm, "@").is_nil());
    }
}
