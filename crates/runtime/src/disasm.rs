//! Bytecode Disassembler
//!
//! Debug aid behind the `disasm` CLI verb. Renders one instruction per
//! line with its offset and source line, then recurses into any function
//! constants so nested closures print too.

use std::fmt::Write as _;

use glipt_core::{Chunk, Heap, ObjRef, Object, Op, Value};

use crate::natives::format_value;

pub fn disassemble_function(heap: &Heap, function: ObjRef, name: &str) -> String {
    let mut out = String::new();
    let mut pending: Vec<(ObjRef, String)> = vec![(function, name.to_owned())];

    while let Some((function, name)) = pending.pop() {
        let chunk = &heap.function(function).chunk;
        let _ = writeln!(out, "== {name} ==");
        let mut offset = 0;
        while offset < chunk.code.len() {
            offset = disassemble_instruction(heap, chunk, offset, &mut out);
        }

        for constant in &chunk.constants {
            if constant.is_object() {
                let r = constant.as_object();
                if let Object::Function(f) = heap.get(r) {
                    let child_name = match f.name {
                        Some(n) => heap.string(n).chars.clone(),
                        None => "<lambda>".to_owned(),
                    };
                    pending.push((r, child_name));
                }
            }
        }
    }

    out
}

fn constant_text(heap: &Heap, chunk: &Chunk, index: u8) -> String {
    let value: Value = chunk.constants[index as usize];
    format_value(heap, value)
}

fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let _ = write!(out, "{offset:04} ");
    if offset > 0 && chunk.line_of(offset) == chunk.line_of(offset - 1) {
        out.push_str("   | ");
    } else {
        let _ = write!(out, "{:4} ", chunk.line_of(offset));
    }

    let op = Op::from_byte(chunk.code[offset]);
    match op {
        // No operand
        Op::Nil
        | Op::True
        | Op::False
        | Op::Add
        | Op::Subtract
        | Op::Multiply
        | Op::Divide
        | Op::Modulo
        | Op::Negate
        | Op::Equal
        | Op::NotEqual
        | Op::Greater
        | Op::GreaterEqual
        | Op::Less
        | Op::LessEqual
        | Op::Not
        | Op::Return
        | Op::CloseUpvalue
        | Op::IndexGet
        | Op::IndexSet
        | Op::Pop
        | Op::PopHandler => {
            let _ = writeln!(out, "{op:?}");
            offset + 1
        }

        // One-byte operand: slot or count
        Op::GetLocal | Op::SetLocal | Op::GetUpvalue | Op::SetUpvalue | Op::Call
        | Op::BuildList | Op::BuildMap => {
            let operand = chunk.code[offset + 1];
            let _ = writeln!(out, "{op:?} {operand}");
            offset + 2
        }

        // One-byte constant operand
        Op::Constant | Op::GetGlobal | Op::SetGlobal | Op::DefineGlobal | Op::GetProperty
        | Op::SetProperty => {
            let index = chunk.code[offset + 1];
            let _ = writeln!(out, "{op:?} {index} '{}'", constant_text(heap, chunk, index));
            offset + 2
        }

        // Two-byte jump operand
        Op::Jump | Op::JumpIfFalse | Op::PushHandler => {
            let jump = ((chunk.code[offset + 1] as usize) << 8) | chunk.code[offset + 2] as usize;
            let target = offset + 3 + jump;
            let _ = writeln!(out, "{op:?} {offset} -> {target}");
            offset + 3
        }
        Op::Loop => {
            let jump = ((chunk.code[offset + 1] as usize) << 8) | chunk.code[offset + 2] as usize;
            let target = offset + 3 - jump;
            let _ = writeln!(out, "Loop {offset} -> {target}");
            offset + 3
        }

        Op::Closure => {
            let index = chunk.code[offset + 1];
            let _ = writeln!(
                out,
                "Closure {index} {}",
                constant_text(heap, chunk, index)
            );
            let function = chunk.constants[index as usize].as_object();
            let upvalue_count = heap.function(function).upvalue_count;
            let mut next = offset + 2;
            for _ in 0..upvalue_count {
                let is_local = chunk.code[next];
                let slot = chunk.code[next + 1];
                let _ = writeln!(
                    out,
                    "{next:04}    |   {} {slot}",
                    if is_local != 0 { "local" } else { "upvalue" }
                );
                next += 2;
            }
            next
        }

        Op::Allow => {
            let kind = chunk.code[offset + 1];
            let target = chunk.code[offset + 2];
            let _ = writeln!(
                out,
                "Allow {kind} '{}'",
                constant_text(heap, chunk, target)
            );
            offset + 3
        }

        Op::Import => {
            let path = chunk.code[offset + 1];
            let binding = chunk.code[offset + 2];
            let _ = writeln!(
                out,
                "Import '{}' as '{}'",
                constant_text(heap, chunk, path),
                constant_text(heap, chunk, binding)
            );
            offset + 3
        }
    }
}
