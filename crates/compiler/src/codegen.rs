//! Code Generator
//!
//! Walks the parse tree and emits bytecode, one chunk per lexical function
//! (the top-level script included). Handles local scoping with slot 0
//! reserved for the callee, upvalue resolution through the enclosing
//! function chain, loop lowering with break/continue patching, short
//! circuit logic, on-failure handler regions, and match lowering against a
//! hidden subject slot.

use std::rc::Rc;

use bumpalo::Bump;

use glipt_core::{
    Chunk, Heap, ObjFunction, ObjRef, Object, Op, Value, MAX_CONSTANTS,
};

use crate::ast::{
    AllowKind, ArmBody, BinaryOp, Expr, ExprKind, Stmt, StmtKind, UnaryOp,
};
use crate::parser;

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_BRANCHES: usize = 256;

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Lambda,
}

struct Local<'a> {
    name: &'a str,
    #[allow(dead_code)]
    depth: i32,
    is_captured: bool,
}

#[derive(PartialEq, Eq)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

/// Per-function compile state; the vector of these in [`Codegen`] models
/// the enclosing-compiler chain.
struct FnState<'a> {
    kind: FunctionKind,
    chunk: Chunk,
    arity: usize,
    name: Option<ObjRef>,
    locals: Vec<Local<'a>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
    loop_start: i32,
    break_jumps: Vec<usize>,
}

impl<'a> FnState<'a> {
    fn new(kind: FunctionKind, arity: usize, name: Option<ObjRef>) -> FnState<'a> {
        FnState {
            kind,
            chunk: Chunk::new(),
            arity,
            name,
            // Slot 0 is reserved for the function/closure itself.
            locals: vec![Local {
                name: "",
                depth: 0,
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
            loop_start: -1,
            break_jumps: Vec::new(),
        }
    }
}

struct Codegen<'a, 'h> {
    heap: &'h mut Heap,
    states: Vec<FnState<'a>>,
    errors: Vec<String>,
}

/// Compile source text into a script-level function on the heap.
///
/// All heap objects created here (interned strings, nested functions) stay
/// reachable because nothing can trigger a collection until the VM next
/// allocates, by which point the caller has rooted the returned function.
pub fn compile(heap: &mut Heap, source: &str) -> Result<ObjRef, String> {
    let arena = Bump::new();
    let program = parser::parse(source, &arena)?;

    let mut emitter = Codegen {
        heap: &mut *heap,
        states: vec![FnState::new(FunctionKind::Script, 0, None)],
        errors: Vec::new(),
    };

    emitter.compile_statements(program);
    emitter.emit_return(0);

    if !emitter.errors.is_empty() {
        return Err(emitter.errors.join("\n"));
    }

    let state = emitter.states.pop().expect("script state");
    let function = Object::Function(ObjFunction {
        arity: 0,
        upvalue_count: state.upvalues.len(),
        chunk: Rc::new(state.chunk),
        name: None,
    });
    Ok(heap.allocate(function))
}

impl<'a> Codegen<'a, '_> {
    fn error(&mut self, line: u32, message: &str) {
        self.errors.push(format!("[line {line}] Error: {message}"));
    }

    fn cur(&mut self) -> &mut FnState<'a> {
        self.states.last_mut().expect("compiler state")
    }

    // ---- Emission helpers ----

    fn emit_byte(&mut self, byte: u8, line: u32) {
        self.cur().chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: Op, line: u32) {
        self.cur().chunk.write_op(op, line);
    }

    fn emit_ops(&mut self, op: Op, operand: u8, line: u32) {
        self.emit_op(op, line);
        self.emit_byte(operand, line);
    }

    /// Emit a jump with a placeholder offset; returns the offset position
    /// for a later [`Codegen::patch_jump`].
    fn emit_jump(&mut self, op: Op, line: u32) -> usize {
        self.emit_op(op, line);
        self.emit_byte(0xff, line);
        self.emit_byte(0xff, line);
        self.cur().chunk.code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        // -2 accounts for the two offset bytes themselves.
        let jump = self.cur().chunk.code.len() - offset - 2;
        if jump > u16::MAX as usize {
            let line = self.cur().chunk.line_of(offset);
            self.error(line, "Too much code to jump over.");
            return;
        }
        self.cur().chunk.code[offset] = (jump >> 8) as u8;
        self.cur().chunk.code[offset + 1] = jump as u8;
    }

    fn emit_loop(&mut self, loop_start: usize, line: u32) {
        self.emit_op(Op::Loop, line);
        let offset = self.cur().chunk.code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error(line, "Loop body too large.");
        }
        self.emit_byte((offset >> 8) as u8, line);
        self.emit_byte(offset as u8, line);
    }

    fn make_constant(&mut self, value: Value, line: u32) -> u8 {
        let index = self.cur().chunk.add_constant(value);
        if index > MAX_CONSTANTS {
            self.error(line, "Too many constants in one chunk.");
            return 0;
        }
        index as u8
    }

    fn emit_constant(&mut self, value: Value, line: u32) {
        let constant = self.make_constant(value, line);
        self.emit_ops(Op::Constant, constant, line);
    }

    fn string_constant(&mut self, text: &str, line: u32) -> u8 {
        let interned = self.heap.intern(text);
        let index = self.cur().chunk.add_string_constant(interned);
        if index > MAX_CONSTANTS {
            self.error(line, "Too many constants in one chunk.");
            return 0;
        }
        index as u8
    }

    fn emit_return(&mut self, line: u32) {
        self.emit_op(Op::Nil, line);
        self.emit_op(Op::Return, line);
    }

    // ---- Scope management ----

    fn begin_scope(&mut self) {
        self.cur().scope_depth += 1;
    }

    fn end_scope(&mut self, line: u32) {
        self.cur().scope_depth -= 1;
        loop {
            let depth = self.cur().scope_depth;
            let captured = match self.cur().locals.last() {
                Some(local) if local.depth > depth => local.is_captured,
                _ => break,
            };
            self.cur().locals.pop();
            if captured {
                self.emit_op(Op::CloseUpvalue, line);
            } else {
                self.emit_op(Op::Pop, line);
            }
        }
    }

    // ---- Variable resolution ----

    fn add_local(&mut self, name: &'a str, line: u32) {
        if self.cur().locals.len() >= MAX_LOCALS {
            self.error(line, "Too many local variables in function.");
            return;
        }
        let depth = self.cur().scope_depth;
        self.cur().locals.push(Local {
            name,
            depth,
            is_captured: false,
        });
    }

    fn resolve_local(&self, state: usize, name: &str) -> Option<usize> {
        self.states[state]
            .locals
            .iter()
            .rposition(|local| local.name == name)
    }

    fn add_upvalue(&mut self, state: usize, index: u8, is_local: bool, line: u32) -> usize {
        let desc = UpvalueDesc { index, is_local };
        if let Some(existing) = self.states[state].upvalues.iter().position(|u| *u == desc) {
            return existing;
        }
        if self.states[state].upvalues.len() >= MAX_UPVALUES {
            self.error(line, "Too many closure variables in function.");
            return 0;
        }
        self.states[state].upvalues.push(desc);
        self.states[state].upvalues.len() - 1
    }

    /// Look for `name` in enclosing functions. A hit in an outer local
    /// marks it captured and records a (local, slot) descriptor; a hit in
    /// an outer upvalue chains a (upvalue, index) descriptor. Descriptors
    /// are deduplicated per function.
    fn resolve_upvalue(&mut self, state: usize, name: &str, line: u32) -> Option<usize> {
        if state == 0 {
            return None;
        }
        let enclosing = state - 1;

        if let Some(local) = self.resolve_local(enclosing, name) {
            self.states[enclosing].locals[local].is_captured = true;
            return Some(self.add_upvalue(state, local as u8, true, line));
        }

        if let Some(upvalue) = self.resolve_upvalue(enclosing, name, line) {
            return Some(self.add_upvalue(state, upvalue as u8, false, line));
        }

        None
    }

    /// Emit a read or write of an identifier: local, then upvalue, then
    /// global by name.
    fn named_variable(&mut self, name: &'a str, for_get: bool, line: u32) {
        let cur = self.states.len() - 1;
        if let Some(local) = self.resolve_local(cur, name) {
            let op = if for_get { Op::GetLocal } else { Op::SetLocal };
            self.emit_ops(op, local as u8, line);
        } else if let Some(upvalue) = self.resolve_upvalue(cur, name, line) {
            let op = if for_get { Op::GetUpvalue } else { Op::SetUpvalue };
            self.emit_ops(op, upvalue as u8, line);
        } else {
            let constant = self.string_constant(name, line);
            let op = if for_get { Op::GetGlobal } else { Op::SetGlobal };
            self.emit_ops(op, constant, line);
        }
    }

    // ---- Statements ----

    /// Compile a statement list. `on failure` divides the list: every
    /// statement after it becomes the protected region (compiled
    /// recursively, so a later `on failure` nests), and the handler block
    /// runs with the error map bound to a local named `error`.
    fn compile_statements(&mut self, stmts: &[Stmt<'a>]) {
        for (i, stmt) in stmts.iter().enumerate() {
            if let StmtKind::OnFailure(handler_body) = stmt.kind {
                let line = stmt.line;
                let handler_jump = self.emit_jump(Op::PushHandler, line);

                self.compile_statements(&stmts[i + 1..]);

                self.emit_op(Op::PopHandler, line);
                let end_jump = self.emit_jump(Op::Jump, line);

                // Handler entry: the error map is on the stack; bind it.
                self.patch_jump(handler_jump);
                self.begin_scope();
                self.add_local("error", line);
                self.compile_statements(handler_body);
                self.end_scope(line);
                self.patch_jump(end_jump);
                return;
            }
            self.statement(stmt);
        }
    }

    /// A function body whose final statement is a bare expression returns
    /// that expression's value. Bodies containing an `on failure` keep the
    /// plain statement path, since the handler region owns the tail.
    fn compile_function_body(&mut self, body: &[Stmt<'a>]) {
        let has_handler = body
            .iter()
            .any(|stmt| matches!(stmt.kind, StmtKind::OnFailure(_)));
        if !has_handler {
            if let Some((last, rest)) = body.split_last() {
                if let StmtKind::Expression(expr) = last.kind {
                    for stmt in rest {
                        self.statement(stmt);
                    }
                    self.expression(expr);
                    self.emit_op(Op::Return, last.line);
                    return;
                }
            }
        }
        self.compile_statements(body);
    }

    fn compile_block(&mut self, stmts: &[Stmt<'a>], line: u32) {
        self.begin_scope();
        self.compile_statements(stmts);
        self.end_scope(line);
    }

    fn statement(&mut self, stmt: &Stmt<'a>) {
        let line = stmt.line;
        match stmt.kind {
            StmtKind::Expression(expr) => {
                self.expression(expr);
                self.emit_op(Op::Pop, line);
            }

            StmtKind::VarDecl { name, initializer } => {
                self.expression(initializer);
                if self.cur().scope_depth > 0 {
                    // Assign an existing binding first; create a new one
                    // only when the name resolves nowhere.
                    let cur = self.states.len() - 1;
                    if let Some(local) = self.resolve_local(cur, name) {
                        self.emit_ops(Op::SetLocal, local as u8, line);
                        self.emit_op(Op::Pop, line);
                        return;
                    }
                    if let Some(upvalue) = self.resolve_upvalue(cur, name, line) {
                        self.emit_ops(Op::SetUpvalue, upvalue as u8, line);
                        self.emit_op(Op::Pop, line);
                        return;
                    }
                    // Inside a function: a fresh local. In a top-level
                    // block: a global, so bindings escape the block the
                    // way scripts expect.
                    if self.states.len() > 1 {
                        self.add_local(name, line);
                    } else {
                        let constant = self.string_constant(name, line);
                        self.emit_ops(Op::SetGlobal, constant, line);
                        self.emit_op(Op::Pop, line);
                    }
                } else {
                    let constant = self.string_constant(name, line);
                    self.emit_ops(Op::DefineGlobal, constant, line);
                }
            }

            StmtKind::CompoundAssign { name, op, value } => {
                self.named_variable(name, true, line);
                self.expression(value);
                let op = match op {
                    BinaryOp::Add => Op::Add,
                    BinaryOp::Subtract => Op::Subtract,
                    BinaryOp::Multiply => Op::Multiply,
                    BinaryOp::Divide => Op::Divide,
                    _ => Op::Add,
                };
                self.emit_op(op, line);
                self.named_variable(name, false, line);
                self.emit_op(Op::Pop, line);
            }

            StmtKind::FnDecl { name, params, body } => {
                self.function(Some(name), params, body, FunctionKind::Function, line);
                if self.cur().scope_depth > 0 {
                    self.add_local(name, line);
                } else {
                    let constant = self.string_constant(name, line);
                    self.emit_ops(Op::DefineGlobal, constant, line);
                }
            }

            StmtKind::Block(stmts) => {
                self.compile_block(stmts, line);
            }

            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expression(condition);
                let then_jump = self.emit_jump(Op::JumpIfFalse, line);
                self.emit_op(Op::Pop, line);

                self.compile_block(then_branch, line);

                let else_jump = self.emit_jump(Op::Jump, line);
                self.patch_jump(then_jump);
                self.emit_op(Op::Pop, line);

                if let Some(else_stmt) = else_branch {
                    self.statement(else_stmt);
                }

                self.patch_jump(else_jump);
            }

            StmtKind::While { condition, body } => {
                let prev_loop_start = self.cur().loop_start;
                let prev_breaks = std::mem::take(&mut self.cur().break_jumps);

                let loop_start = self.cur().chunk.code.len();
                self.cur().loop_start = loop_start as i32;

                self.expression(condition);
                let exit_jump = self.emit_jump(Op::JumpIfFalse, line);
                self.emit_op(Op::Pop, line);

                self.compile_block(body, line);

                self.emit_loop(loop_start, line);

                self.patch_jump(exit_jump);
                self.emit_op(Op::Pop, line);

                let breaks = std::mem::take(&mut self.cur().break_jumps);
                for offset in breaks {
                    self.patch_jump(offset);
                }

                self.cur().loop_start = prev_loop_start;
                self.cur().break_jumps = prev_breaks;
            }

            StmtKind::For {
                var,
                iterable,
                body,
            } => {
                let prev_loop_start = self.cur().loop_start;
                let prev_breaks = std::mem::take(&mut self.cur().break_jumps);

                self.begin_scope();

                // Three hidden locals: the iterable, the index counter,
                // and the loop variable. The space prefix keeps the first
                // two unreachable from user code.
                self.expression(iterable);
                self.add_local(" iterable", line);
                let iter_slot = (self.cur().locals.len() - 1) as u8;

                self.emit_constant(Value::number(0.0), line);
                self.add_local(" index", line);
                let idx_slot = (self.cur().locals.len() - 1) as u8;

                self.emit_op(Op::Nil, line);
                self.add_local(var, line);
                let var_slot = (self.cur().locals.len() - 1) as u8;

                let loop_start = self.cur().chunk.code.len();
                self.cur().loop_start = loop_start as i32;

                // Condition: index < iterable.length
                self.emit_ops(Op::GetLocal, idx_slot, line);
                self.emit_ops(Op::GetLocal, iter_slot, line);
                let length_const = self.string_constant("length", line);
                self.emit_ops(Op::GetProperty, length_const, line);
                self.emit_op(Op::Less, line);

                let exit_jump = self.emit_jump(Op::JumpIfFalse, line);
                self.emit_op(Op::Pop, line);

                // var = iterable[index]
                self.emit_ops(Op::GetLocal, iter_slot, line);
                self.emit_ops(Op::GetLocal, idx_slot, line);
                self.emit_op(Op::IndexGet, line);
                self.emit_ops(Op::SetLocal, var_slot, line);
                self.emit_op(Op::Pop, line);

                self.compile_block(body, line);

                // index = index + 1
                self.emit_ops(Op::GetLocal, idx_slot, line);
                self.emit_constant(Value::number(1.0), line);
                self.emit_op(Op::Add, line);
                self.emit_ops(Op::SetLocal, idx_slot, line);
                self.emit_op(Op::Pop, line);

                self.emit_loop(loop_start, line);

                self.patch_jump(exit_jump);
                self.emit_op(Op::Pop, line);

                let breaks = std::mem::take(&mut self.cur().break_jumps);
                for offset in breaks {
                    self.patch_jump(offset);
                }

                self.end_scope(line);

                self.cur().loop_start = prev_loop_start;
                self.cur().break_jumps = prev_breaks;
            }

            StmtKind::Return(value) => {
                if self.cur().kind == FunctionKind::Script {
                    self.error(line, "Can't return from top-level code.");
                }
                match value {
                    Some(expr) => self.expression(expr),
                    None => self.emit_op(Op::Nil, line),
                }
                self.emit_op(Op::Return, line);
            }

            StmtKind::Break => {
                if self.cur().loop_start == -1 {
                    self.error(line, "Can't use 'break' outside a loop.");
                    return;
                }
                if self.cur().break_jumps.len() >= MAX_BRANCHES {
                    self.error(line, "Too many break statements in loop.");
                    return;
                }
                let jump = self.emit_jump(Op::Jump, line);
                self.cur().break_jumps.push(jump);
            }

            StmtKind::Continue => {
                let loop_start = self.cur().loop_start;
                if loop_start == -1 {
                    self.error(line, "Can't use 'continue' outside a loop.");
                    return;
                }
                self.emit_loop(loop_start as usize, line);
            }

            StmtKind::Allow { kind, target } => {
                let perm: u8 = match kind {
                    AllowKind::Exec => 0,
                    AllowKind::Net => 1,
                    AllowKind::Read => 2,
                    AllowKind::Write => 3,
                    AllowKind::Env => 4,
                };
                let target_const = self.string_constant(target, line);
                self.emit_op(Op::Allow, line);
                self.emit_byte(perm, line);
                self.emit_byte(target_const, line);
            }

            StmtKind::Parallel(tasks) => {
                // The block syntax runs sequentially; parallel_exec() is
                // the actual concurrency primitive.
                for task in tasks {
                    self.statement(task);
                }
            }

            StmtKind::OnFailure(_) => {
                // Handled by compile_statements at the list level.
            }

            StmtKind::Import { path, alias } => {
                let path_const = self.string_constant(path, line);

                // Default binding name: last path segment minus ".glipt".
                let name = match alias {
                    Some(alias) => alias,
                    None => {
                        let base = path.rsplit('/').next().unwrap_or(path);
                        base.strip_suffix(".glipt").unwrap_or(base)
                    }
                };
                let name_const = self.string_constant(name, line);

                self.emit_op(Op::Import, line);
                self.emit_byte(path_const, line);
                self.emit_byte(name_const, line);
            }
        }
    }

    // ---- Expressions ----

    fn expression(&mut self, expr: &Expr<'a>) {
        let line = expr.line;
        match expr.kind {
            ExprKind::Number(n) => self.emit_constant(Value::number(n), line),

            ExprKind::Str(s) => {
                let constant = self.string_constant(s, line);
                self.emit_ops(Op::Constant, constant, line);
            }

            ExprKind::Bool(b) => {
                self.emit_op(if b { Op::True } else { Op::False }, line);
            }

            ExprKind::Nil => self.emit_op(Op::Nil, line),

            ExprKind::Variable(name) => self.named_variable(name, true, line),

            ExprKind::Unary { op, operand } => {
                self.expression(operand);
                match op {
                    UnaryOp::Negate => self.emit_op(Op::Negate, line),
                    UnaryOp::Not => self.emit_op(Op::Not, line),
                }
            }

            ExprKind::Binary { op, left, right } => {
                self.binary(op, left, right, line);
            }

            ExprKind::Call { callee, args } => {
                self.expression(callee);
                if args.len() > u8::MAX as usize {
                    self.error(line, "Can't have more than 255 arguments.");
                }
                for arg in args {
                    self.expression(arg);
                }
                self.emit_ops(Op::Call, args.len().min(255) as u8, line);
            }

            ExprKind::List(elements) => {
                if elements.len() > u8::MAX as usize {
                    self.error(line, "Can't have more than 255 list elements.");
                }
                for element in elements {
                    self.expression(element);
                }
                self.emit_ops(Op::BuildList, elements.len().min(255) as u8, line);
            }

            ExprKind::MapLit { keys, values } => {
                if keys.len() > u8::MAX as usize {
                    self.error(line, "Can't have more than 255 map entries.");
                }
                for (key, value) in keys.iter().zip(values) {
                    self.expression(key);
                    self.expression(value);
                }
                self.emit_ops(Op::BuildMap, keys.len().min(255) as u8, line);
            }

            ExprKind::Index { object, index } => {
                self.expression(object);
                self.expression(index);
                self.emit_op(Op::IndexGet, line);
            }

            ExprKind::IndexSet {
                object,
                index,
                value,
            } => {
                self.expression(object);
                self.expression(index);
                self.expression(value);
                self.emit_op(Op::IndexSet, line);
            }

            ExprKind::Property { object, name } => {
                self.expression(object);
                let constant = self.string_constant(name, line);
                self.emit_ops(Op::GetProperty, constant, line);
            }

            ExprKind::PropertySet {
                object,
                name,
                value,
            } => {
                self.expression(object);
                self.expression(value);
                let constant = self.string_constant(name, line);
                self.emit_ops(Op::SetProperty, constant, line);
            }

            ExprKind::Pipe { left, right } => {
                // `left | right` is `right(left)`: push the callee first,
                // then the single argument.
                self.expression(right);
                self.expression(left);
                self.emit_ops(Op::Call, 1, line);
            }

            ExprKind::Range { start, end } => {
                // `a..b` compiles as range(a, b) and yields a real list.
                let range_const = self.string_constant("range", line);
                self.emit_ops(Op::GetGlobal, range_const, line);
                self.expression(start);
                self.expression(end);
                self.emit_ops(Op::Call, 2, line);
            }

            ExprKind::Lambda { params, body } => {
                self.function(None, params, body, FunctionKind::Lambda, line);
            }

            ExprKind::ExecSugar { command } => {
                let exec_const = self.string_constant("exec", line);
                self.emit_ops(Op::GetGlobal, exec_const, line);
                self.expression(command);
                self.emit_ops(Op::Call, 1, line);
            }

            ExprKind::Match { subject, arms } => {
                self.match_expression(subject, arms, line);
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr<'a>, right: &Expr<'a>, line: u32) {
        // Short-circuit forms leave exactly one value on the stack.
        if op == BinaryOp::And {
            self.expression(left);
            let end_jump = self.emit_jump(Op::JumpIfFalse, line);
            self.emit_op(Op::Pop, line);
            self.expression(right);
            self.patch_jump(end_jump);
            return;
        }

        if op == BinaryOp::Or {
            self.expression(left);
            let else_jump = self.emit_jump(Op::JumpIfFalse, line);
            let end_jump = self.emit_jump(Op::Jump, line);
            self.patch_jump(else_jump);
            self.emit_op(Op::Pop, line);
            self.expression(right);
            self.patch_jump(end_jump);
            return;
        }

        self.expression(left);
        self.expression(right);

        let op = match op {
            BinaryOp::Add => Op::Add,
            BinaryOp::Subtract => Op::Subtract,
            BinaryOp::Multiply => Op::Multiply,
            BinaryOp::Divide => Op::Divide,
            BinaryOp::Modulo => Op::Modulo,
            BinaryOp::Equal => Op::Equal,
            BinaryOp::NotEqual => Op::NotEqual,
            BinaryOp::Greater => Op::Greater,
            BinaryOp::GreaterEqual => Op::GreaterEqual,
            BinaryOp::Less => Op::Less,
            BinaryOp::LessEqual => Op::LessEqual,
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        };
        self.emit_op(op, line);
    }

    /// The subject lives in a hidden local so each arm can re-read it
    /// without re-evaluating (Equal pops both operands). The result is
    /// written back into the subject slot and the scope unwound by hand so
    /// the value survives as the expression result.
    fn match_expression(&mut self, subject: &Expr<'a>, arms: &[crate::ast::MatchArm<'a>], line: u32) {
        self.begin_scope();
        self.expression(subject);
        self.add_local(" match", line);
        let subject_slot = (self.cur().locals.len() - 1) as u8;

        if arms.len() > MAX_BRANCHES {
            self.error(line, "Too many match arms (max 256).");
            return;
        }
        let mut end_jumps: Vec<usize> = Vec::new();

        for arm in arms {
            match arm.pattern {
                None => {
                    // Wildcard: always matches.
                    self.arm_body(&arm.body, line);
                    end_jumps.push(self.emit_jump(Op::Jump, line));
                }
                Some(pattern) => {
                    self.emit_ops(Op::GetLocal, subject_slot, line);
                    self.expression(pattern);
                    self.emit_op(Op::Equal, line);
                    let next_arm = self.emit_jump(Op::JumpIfFalse, line);
                    self.emit_op(Op::Pop, line);

                    self.arm_body(&arm.body, line);
                    end_jumps.push(self.emit_jump(Op::Jump, line));

                    self.patch_jump(next_arm);
                    self.emit_op(Op::Pop, line);
                }
            }
        }

        // No arm matched.
        self.emit_op(Op::Nil, line);

        for offset in end_jumps {
            self.patch_jump(offset);
        }

        // Store the result over the hidden subject, then unwind the scope
        // without an extra pop so the result stays on the stack.
        self.emit_ops(Op::SetLocal, subject_slot, line);
        self.emit_op(Op::Pop, line);
        self.cur().scope_depth -= 1;
        self.cur().locals.pop();
    }

    fn arm_body(&mut self, body: &ArmBody<'a>, line: u32) {
        match body {
            ArmBody::Block(stmts) => {
                self.compile_block(stmts, line);
                self.emit_op(Op::Nil, line);
            }
            ArmBody::Expr(expr) => self.expression(expr),
        }
    }

    /// Compile a nested function in a child state, then emit the closure
    /// (with its upvalue descriptors) in the parent.
    fn function(
        &mut self,
        name: Option<&'a str>,
        params: &'a [&'a str],
        body: &[Stmt<'a>],
        kind: FunctionKind,
        line: u32,
    ) {
        let name_ref = name.map(|n| self.heap.intern(n));
        self.states
            .push(FnState::new(kind, params.len(), name_ref));

        self.begin_scope();
        for param in params {
            self.add_local(param, line);
        }

        self.compile_function_body(body);
        self.emit_return(line);

        let state = self.states.pop().expect("function state");
        let upvalue_count = state.upvalues.len();
        let function = self.heap.allocate(Object::Function(ObjFunction {
            arity: state.arity,
            upvalue_count,
            chunk: Rc::new(state.chunk),
            name: state.name,
        }));

        let constant = self.make_constant(Value::object(function), line);
        self.emit_ops(Op::Closure, constant, line);
        for desc in &state.upvalues {
            let is_local = u8::from(desc.is_local);
            let index = desc.index;
            self.emit_byte(is_local, line);
            self.emit_byte(index, line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(heap: &mut Heap, source: &str) -> ObjRef {
        compile(heap, source).expect("compile failed")
    }

    /// Walk a function's constants for nested function objects.
    fn nested_functions(heap: &Heap, function: ObjRef) -> Vec<ObjRef> {
        heap.function(function)
            .chunk
            .constants
            .iter()
            .filter(|v| v.is_object())
            .map(|v| v.as_object())
            .filter(|r| matches!(heap.get(*r), Object::Function(_)))
            .collect()
    }

    #[test]
    fn patch_jump_offset_arithmetic() {
        let mut heap = Heap::new();
        let mut emitter = Codegen {
            heap: &mut heap,
            states: vec![FnState::new(FunctionKind::Script, 0, None)],
            errors: Vec::new(),
        };
        let jump_site = emitter.emit_jump(Op::Jump, 1);
        emitter.emit_op(Op::Nil, 1);
        emitter.emit_op(Op::Pop, 1);
        emitter.patch_jump(jump_site);

        let code = &emitter.states[0].chunk.code;
        let target = code.len();
        let recorded = ((code[jump_site] as usize) << 8) | code[jump_site + 1] as usize;
        assert_eq!(recorded, target - (jump_site + 2));
    }

    #[test]
    fn script_compiles_to_a_function() {
        let mut heap = Heap::new();
        let script = compile_ok(&mut heap, "let x = 1\nprint(x)\n");
        let f = heap.function(script);
        assert_eq!(f.arity, 0);
        assert!(f.name.is_none());
        assert_eq!(*f.chunk.code.last().unwrap(), Op::Return as u8);
    }

    #[test]
    fn closure_capture_produces_one_upvalue() {
        let mut heap = Heap::new();
        let script = compile_ok(
            &mut heap,
            "fn outer() {\n let n = 0\n fn step() {\n n = n + 1\n return n\n }\n return step\n}\n",
        );
        let outer = nested_functions(&heap, script)[0];
        let inner = nested_functions(&heap, outer)[0];
        assert_eq!(heap.function(inner).upvalue_count, 1);
        assert_eq!(heap.function(outer).upvalue_count, 0);
    }

    #[test]
    fn chained_capture_through_two_levels() {
        let mut heap = Heap::new();
        let script = compile_ok(
            &mut heap,
            "fn a() {\n let x = 1\n fn b() {\n fn c() {\n return x\n }\n return c\n }\n return b\n}\n",
        );
        let a = nested_functions(&heap, script)[0];
        let b = nested_functions(&heap, a)[0];
        let c = nested_functions(&heap, b)[0];
        // b relays x as an upvalue for c.
        assert_eq!(heap.function(b).upvalue_count, 1);
        assert_eq!(heap.function(c).upvalue_count, 1);
    }

    #[test]
    fn function_arity_matches_parameters() {
        let mut heap = Heap::new();
        let script = compile_ok(&mut heap, "fn add(a, b, c) { return a + b + c }\n");
        let add = nested_functions(&heap, script)[0];
        assert_eq!(heap.function(add).arity, 3);
    }

    #[test]
    fn top_level_return_is_an_error() {
        let mut heap = Heap::new();
        let err = compile(&mut heap, "return 1\n").unwrap_err();
        assert!(err.contains("top-level"), "got: {err}");
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let mut heap = Heap::new();
        let err = compile(&mut heap, "break\n").unwrap_err();
        assert!(err.contains("break"), "got: {err}");
    }

    #[test]
    fn too_many_constants_is_reported() {
        let mut heap = Heap::new();
        // Numbers are never deduplicated, so 300 distinct literals
        // overflow the one-byte pool index.
        let mut source = String::from("x = 0");
        for i in 1..300 {
            source.push_str(&format!(" + {i}.5"));
        }
        source.push('\n');
        let err = compile(&mut heap, &source).unwrap_err();
        assert!(err.contains("Too many constants"), "got: {err}");
    }

    #[test]
    fn string_literals_share_pool_slots() {
        let mut heap = Heap::new();
        let script = compile_ok(&mut heap, "a = \"s\"\nb = \"s\"\nc = \"s\"\n");
        let strings = heap
            .function(script)
            .chunk
            .constants
            .iter()
            .filter(|v| v.is_object() && matches!(heap.get(v.as_object()), Object::String(_)))
            .count();
        // "s" once, plus the identifier constants "a", "b", "c".
        assert_eq!(strings, 4);
    }
}
