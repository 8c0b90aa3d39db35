//! Virtual Machine
//!
//! Stack-based bytecode interpreter: a single value stack, a call-frame
//! array, globals with a direct-mapped inline cache, open-upvalue
//! tracking, first-class error handlers, a permission set, and the module
//! loader. Natives and the GC live in sibling modules; both reach the VM
//! through the explicit `Vm` handle.
//!
//! Raised errors (capability denials, failed subprocesses, bad responses)
//! set a pending error map that the dispatch loop routes to the innermost
//! handler after every call. Internal faults (bad operand types, stack
//! overflow, undefined variables) print a line-indexed trace and terminate
//! the interpreter.

use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use glipt_core::{
    values_equal, Chunk, Heap, ObjClosure, ObjKind, ObjList, ObjMap, ObjNative, ObjRef,
    ObjUpvalue, Object, Op, Table, UpvalueState, Value,
};

use crate::permission::{PermKind, PermissionSet};

pub const FRAMES_MAX: usize = 256;
pub const STACK_MAX: usize = FRAMES_MAX * 256;
pub const HANDLER_MAX: usize = 64;
pub const GLOBAL_IC_SIZE: usize = 512;
const MAX_LOCALS: usize = 256;

/// Host-implemented function. Arguments are a snapshot of the stack
/// window; the originals stay on the stack (GC-rooted) until the native
/// returns.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Value;

#[derive(Debug)]
pub enum InterpretError {
    Compile(String),
    Runtime(String),
}

impl fmt::Display for InterpretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpretError::Compile(msg) | InterpretError::Runtime(msg) => {
                write!(f, "{}", msg.trim_end())
            }
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) struct CallFrame {
    closure: ObjRef,
    ip: usize,
    base: usize,
}

impl CallFrame {
    pub(crate) fn closure(&self) -> ObjRef {
        self.closure
    }
}

/// Bookmark the VM restores to when an error is raised inside the
/// protected region.
#[derive(Clone, Copy)]
struct Handler {
    ip: usize,
    frame_count: usize,
    stack_len: usize,
}

#[derive(Clone, Copy, Default)]
struct IcSlot {
    key: Option<ObjRef>,
    index: usize,
    capacity: usize,
}

/// What the dispatch loop should do after a raised error was routed.
enum ErrorFlow {
    Clear,
    HandlerEntered,
    UnwoundToBaseline,
    Fatal(InterpretError),
}

pub struct Vm {
    pub heap: Heap,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    pub globals: Table,
    /// Open upvalues in ascending stack-slot order (one per live slot).
    pub(crate) open_upvalues: Vec<ObjRef>,
    pub permissions: PermissionSet,
    handlers: Vec<Handler>,
    pub has_error: bool,
    pub current_error: Value,
    ic: Vec<IcSlot>,
    /// Re-entry baseline: `run` returns when the frame count unwinds to
    /// this depth, so natives can call back into the interpreter.
    base_frame_count: usize,
    pub modules: Table,
    pub script_path: Option<PathBuf>,
    pub script_args: Vec<String>,
    natives: Vec<NativeFn>,
    pub(crate) gc_stress: bool,
    fault_pending: Option<InterpretError>,
    out: Box<dyn Write>,
    pub(crate) start_time: Instant,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Vm {
        let mut vm = Vm {
            heap: Heap::new(),
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            open_upvalues: Vec::new(),
            permissions: PermissionSet::new(),
            handlers: Vec::new(),
            has_error: false,
            current_error: Value::NIL,
            ic: vec![IcSlot::default(); GLOBAL_IC_SIZE],
            base_frame_count: 0,
            modules: Table::new(),
            script_path: None,
            script_args: Vec::new(),
            natives: Vec::new(),
            gc_stress: false,
            fault_pending: None,
            out: Box::new(std::io::stdout()),
            start_time: Instant::now(),
        };
        crate::natives::register_builtins(&mut vm);
        crate::modules::register_all(&mut vm);
        vm
    }

    /// Redirect program output (print, println, input prompts). Used by
    /// embedders and tests.
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    /// Force a collection on every allocation.
    pub fn set_gc_stress(&mut self, on: bool) {
        self.gc_stress = on;
    }

    /// Drop every cached global entry; indices may be stale after a
    /// collection frees name strings.
    pub(crate) fn flush_inline_cache(&mut self) {
        self.ic.fill(IcSlot::default());
    }

    pub(crate) fn write_out(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }

    // ---- Allocation (the GC trigger point) ----

    fn maybe_collect(&mut self) {
        if self.gc_stress || self.heap.bytes_allocated > self.heap.next_gc {
            self.collect_garbage();
        }
    }

    /// Allocate a heap object, possibly collecting first. Anything the
    /// caller needs to survive must be reachable from a root (usually the
    /// value stack) before this is called.
    pub fn alloc(&mut self, object: Object) -> ObjRef {
        self.maybe_collect();
        self.heap.allocate(object)
    }

    pub fn intern(&mut self, chars: &str) -> ObjRef {
        self.maybe_collect();
        self.heap.intern(chars)
    }

    pub fn new_string(&mut self, chars: &str) -> Value {
        Value::object(self.intern(chars))
    }

    pub fn take_string(&mut self, chars: String) -> Value {
        self.maybe_collect();
        Value::object(self.heap.intern_owned(chars))
    }

    pub fn new_list(&mut self) -> ObjRef {
        self.alloc(Object::List(ObjList { items: Vec::new() }))
    }

    pub fn new_map(&mut self) -> ObjRef {
        self.alloc(Object::Map(ObjMap {
            table: Table::new(),
        }))
    }

    // ---- Stack ----

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    #[inline]
    pub fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// True when a callback into the interpreter raised an error or hit an
    /// internal fault; higher-order natives bail out when they see this.
    pub(crate) fn had_failure(&self) -> bool {
        self.has_error || self.fault_pending.is_some()
    }

    /// Internal faults are terminal: callers must not keep driving the VM
    /// once one is pending.
    pub(crate) fn has_pending_fault(&self) -> bool {
        self.fault_pending.is_some()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn open_upvalue_count(&self) -> usize {
        self.open_upvalues.len()
    }

    // ---- Map helpers (used by natives and the module loader) ----

    /// Set `map[key] = value` with both the key interning and the value
    /// protected from collection. The map itself must already be rooted.
    pub fn map_set_str(&mut self, map: ObjRef, key: &str, value: Value) {
        self.push(value);
        let key_ref = self.intern(key);
        let hash = self.heap.str_hash(key_ref);
        let value = self.pop();
        self.heap.map_mut(map).table.set(key_ref, hash, value);
    }

    pub fn map_get_str(&mut self, map: ObjRef, key: &str) -> Option<Value> {
        let key_ref = self.intern(key);
        let hash = self.heap.str_hash(key_ref);
        self.heap.map(map).table.get(key_ref, hash)
    }

    /// Read a string argument, or None if the value is not a string.
    pub fn str_arg(&self, value: Value) -> Option<&str> {
        if value.is_object() {
            if let Object::String(s) = self.heap.get(value.as_object()) {
                return Some(&s.chars);
            }
        }
        None
    }

    // ---- Errors ----

    /// Raise a user-visible error: builds `{message, type}` and marks the
    /// VM so the dispatch loop routes control to the nearest handler.
    pub fn raise_error(&mut self, message: &str, kind: &str) {
        let map = self.new_map();
        self.push(Value::object(map)); // protect while building
        let message_value = self.new_string(message);
        self.map_set_str(map, "message", message_value);
        let kind_value = self.new_string(kind);
        self.map_set_str(map, "type", kind_value);
        self.pop();

        self.has_error = true;
        self.current_error = Value::object(map);
    }

    /// Internal fault: format the message with a stack trace, reset the
    /// VM, and produce the terminal runtime error.
    fn fault(&mut self, message: &str) -> InterpretError {
        let mut out = String::from(message);
        out.push('\n');
        for frame in self.frames.iter().rev() {
            let closure = self.heap.closure(frame.closure);
            let function = self.heap.function(closure.function);
            let line = function.chunk.line_of(frame.ip.saturating_sub(1));
            match function.name {
                None => {
                    out.push_str(&format!("[line {line}] in script\n"));
                }
                Some(name) => {
                    let name = &self.heap.string(name).chars;
                    out.push_str(&format!("[line {line}] in {name}()\n"));
                }
            }
        }

        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        self.handlers.clear();
        InterpretError::Runtime(out)
    }

    // ---- Native registration ----

    fn new_native(&mut self, name: &'static str, function: NativeFn, arity: i32) -> Value {
        let slot = self.natives.len();
        self.natives.push(function);
        let r = self.alloc(Object::Native(ObjNative { name, arity, slot }));
        Value::object(r)
    }

    pub fn define_native(&mut self, name: &'static str, function: NativeFn, arity: i32) {
        let native = self.new_native(name, function, arity);
        self.push(native); // protect across name interning
        let name_ref = self.intern(name);
        let hash = self.heap.str_hash(name_ref);
        let native = self.pop();
        self.globals.set(name_ref, hash, native);
    }

    /// Register a standard module: a global map of natives. Returns the
    /// map so callers can add constants.
    pub fn define_module(
        &mut self,
        name: &'static str,
        entries: &[(&'static str, NativeFn, i32)],
    ) -> ObjRef {
        let map = self.new_map();
        self.push(Value::object(map)); // protect while populating
        for &(fn_name, function, arity) in entries {
            let native = self.new_native(fn_name, function, arity);
            self.map_set_str(map, fn_name, native);
        }
        let name_ref = self.intern(name);
        let hash = self.heap.str_hash(name_ref);
        self.globals.set(name_ref, hash, Value::object(map));
        self.pop();
        map
    }

    // ---- Upvalues ----

    fn upvalue_slot(&self, upvalue: ObjRef) -> usize {
        match self.heap.upvalue(upvalue).state {
            UpvalueState::Open(slot) => slot,
            UpvalueState::Closed(_) => usize::MAX,
        }
    }

    /// One upvalue per live stack slot: reuse an existing open upvalue at
    /// this address or insert a new one, keeping the list ordered.
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let position = self
            .open_upvalues
            .binary_search_by_key(&slot, |r| self.upvalue_slot(*r));
        match position {
            Ok(index) => self.open_upvalues[index],
            Err(index) => {
                let upvalue = self.alloc(Object::Upvalue(ObjUpvalue {
                    state: UpvalueState::Open(slot),
                }));
                self.open_upvalues.insert(index, upvalue);
                upvalue
            }
        }
    }

    /// Close every open upvalue at or above `boundary`: move the stack
    /// value into the upvalue's own storage and drop it from the open
    /// list.
    fn close_upvalues(&mut self, boundary: usize) {
        while let Some(&upvalue) = self.open_upvalues.last() {
            let slot = self.upvalue_slot(upvalue);
            if slot < boundary {
                break;
            }
            let value = self.stack[slot];
            self.heap.upvalue_mut(upvalue).state = UpvalueState::Closed(value);
            self.open_upvalues.pop();
        }
    }

    // ---- Calls ----

    fn call_closure(&mut self, closure: ObjRef, arg_count: usize) -> Result<(), InterpretError> {
        let function = self.heap.closure(closure).function;
        let arity = self.heap.function(function).arity;
        if arg_count != arity {
            return Err(self.fault(&format!(
                "Expected {arity} arguments but got {arg_count}."
            )));
        }
        if self.frames.len() == FRAMES_MAX || self.stack.len() + MAX_LOCALS > STACK_MAX {
            return Err(self.fault("Stack overflow."));
        }
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            base: self.stack.len() - arg_count - 1,
        });
        Ok(())
    }

    fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<(), InterpretError> {
        if callee.is_object() {
            let r = callee.as_object();
            match self.heap.kind(r) {
                ObjKind::Closure => return self.call_closure(r, arg_count),
                ObjKind::Native => {
                    let (arity, slot) = {
                        let native = self.heap.native(r);
                        (native.arity, native.slot)
                    };
                    if arity >= 0 && arg_count != arity as usize {
                        return Err(self.fault(&format!(
                            "Expected {arity} arguments but got {arg_count}."
                        )));
                    }
                    let function = self.natives[slot];
                    let args_start = self.stack.len() - arg_count;
                    let args: Vec<Value> = self.stack[args_start..].to_vec();
                    let result = function(self, &args);
                    if let Some(err) = self.fault_pending.take() {
                        return Err(err);
                    }
                    let new_len = self.stack.len() - arg_count - 1;
                    self.stack.truncate(new_len);
                    self.push(result);
                    return Ok(());
                }
                _ => {}
            }
        }
        Err(self.fault("Can only call functions."))
    }

    /// Call a closure or native from native context, running the
    /// interpreter to completion for closures. The caller must have
    /// pushed the callee and `arg_count` arguments. Returns nil on
    /// failure (a pending fault or raised error is left for the outer
    /// dispatch loop to see).
    pub fn call_function(&mut self, callee: Value, arg_count: usize) -> Value {
        if callee.is_object() {
            let r = callee.as_object();
            if self.heap.kind(r) == ObjKind::Native {
                let slot = self.heap.native(r).slot;
                let function = self.natives[slot];
                let args_start = self.stack.len() - arg_count;
                let args: Vec<Value> = self.stack[args_start..].to_vec();
                let result = function(self, &args);
                let new_len = self.stack.len() - arg_count - 1;
                self.stack.truncate(new_len);
                return result;
            }

            if self.heap.kind(r) == ObjKind::Closure {
                if let Err(err) = self.call_closure(r, arg_count) {
                    self.fault_pending = Some(err);
                    return Value::NIL;
                }
                let saved_base = self.base_frame_count;
                self.base_frame_count = self.frames.len() - 1;
                let result = self.run();
                self.base_frame_count = saved_base;
                return match result {
                    Ok(()) => self.pop(),
                    Err(err) => {
                        self.fault_pending = Some(err);
                        Value::NIL
                    }
                };
            }
        }

        let new_len = self.stack.len() - arg_count - 1;
        self.stack.truncate(new_len);
        Value::NIL
    }

    // ---- Entry point ----

    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = gliptc::compile(&mut self.heap, source).map_err(InterpretError::Compile)?;

        self.push(Value::object(function));
        let closure = self.alloc(Object::Closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        }));
        self.pop();
        self.push(Value::object(closure));
        self.call_closure(closure, 0)?;

        self.run()
    }

    fn chunk_of(&self, closure: ObjRef) -> Rc<Chunk> {
        let function = self.heap.closure(closure).function;
        Rc::clone(&self.heap.function(function).chunk)
    }

    /// Route a pending raised error. Fires the innermost handler when one
    /// was registered inside the current run region; unwinds to the
    /// re-entry baseline when a native callback is on the host stack (the
    /// native sees the still-pending error); otherwise the error is fatal.
    fn handle_raised_error(&mut self) -> ErrorFlow {
        if !self.has_error {
            return ErrorFlow::Clear;
        }

        let handler_in_scope = self
            .handlers
            .last()
            .is_some_and(|h| h.frame_count > self.base_frame_count);

        if handler_in_scope {
            let handler = self.handlers.pop().expect("handler checked above");
            self.frames.truncate(handler.frame_count);
            self.close_upvalues(handler.stack_len);
            self.stack.truncate(handler.stack_len);
            let error = self.current_error;
            self.push(error);
            self.frames.last_mut().expect("handler frame").ip = handler.ip;
            self.has_error = false;
            self.current_error = Value::NIL;
            return ErrorFlow::HandlerEntered;
        }

        if self.base_frame_count > 0 {
            let boundary = self.frames[self.base_frame_count].base;
            self.close_upvalues(boundary);
            self.frames.truncate(self.base_frame_count);
            self.stack.truncate(boundary);
            self.push(Value::NIL);
            return ErrorFlow::UnwoundToBaseline;
        }

        let message = if self.current_error.is_object()
            && matches!(self.heap.get(self.current_error.as_object()), Object::Map(_))
        {
            let error = self.current_error.as_object();
            self.map_get_str(error, "message")
                .and_then(|v| self.str_arg(v).map(str::to_owned))
                .unwrap_or_else(|| "Runtime error.".to_owned())
        } else {
            "Runtime error.".to_owned()
        };
        self.has_error = false;
        self.current_error = Value::NIL;
        ErrorFlow::Fatal(self.fault(&message))
    }

    // ---- Dispatch loop ----

    fn run(&mut self) -> Result<(), InterpretError> {
        let frame = *self.frames.last().expect("no frame to run");
        let mut ip = frame.ip;
        let mut base = frame.base;
        let mut frame_closure = frame.closure;
        let mut chunk = self.chunk_of(frame_closure);

        macro_rules! store_ip {
            () => {
                self.frames.last_mut().expect("live frame").ip = ip
            };
        }

        macro_rules! load_frame {
            () => {{
                let frame = *self.frames.last().expect("live frame");
                ip = frame.ip;
                base = frame.base;
                frame_closure = frame.closure;
                chunk = self.chunk_of(frame_closure);
            }};
        }

        macro_rules! vm_fault {
            ($($arg:tt)*) => {{
                store_ip!();
                return Err(self.fault(&format!($($arg)*)));
            }};
        }

        macro_rules! read_byte {
            () => {{
                let byte = chunk.code[ip];
                ip += 1;
                byte
            }};
        }

        macro_rules! read_short {
            () => {{
                let hi = chunk.code[ip] as usize;
                let lo = chunk.code[ip + 1] as usize;
                ip += 2;
                (hi << 8) | lo
            }};
        }

        macro_rules! read_constant {
            () => {
                chunk.constants[read_byte!() as usize]
            };
        }

        macro_rules! read_string {
            () => {
                read_constant!().as_object()
            };
        }

        macro_rules! numeric_binary {
            ($op:tt, $wrap:expr) => {{
                let b = self.peek(0);
                let a = self.peek(1);
                if !a.is_number() || !b.is_number() {
                    vm_fault!("Operands must be numbers.");
                }
                self.stack.pop();
                let top = self.stack.last_mut().expect("operand");
                *top = $wrap(a.as_number() $op b.as_number());
            }};
        }

        loop {
            let op = Op::from_byte(read_byte!());
            match op {
                Op::Constant => {
                    let value = read_constant!();
                    self.push(value);
                }
                Op::Nil => self.push(Value::NIL),
                Op::True => self.push(Value::TRUE),
                Op::False => self.push(Value::FALSE),

                Op::Add => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    if a.is_number() && b.is_number() {
                        self.stack.pop();
                        let top = self.stack.last_mut().expect("operand");
                        *top = Value::number(a.as_number() + b.as_number());
                    } else if self.str_arg(a).is_some() && self.str_arg(b).is_some() {
                        // Concatenate while both operands stay rooted.
                        let mut joined =
                            String::with_capacity(self.str_arg(a).unwrap().len() + self.str_arg(b).unwrap().len());
                        joined.push_str(self.str_arg(a).unwrap());
                        joined.push_str(self.str_arg(b).unwrap());
                        let result = self.take_string(joined);
                        self.stack.pop();
                        let top = self.stack.last_mut().expect("operand");
                        *top = result;
                    } else {
                        vm_fault!("Operands must be two numbers or two strings.");
                    }
                }
                Op::Subtract => numeric_binary!(-, Value::number),
                Op::Multiply => numeric_binary!(*, Value::number),
                Op::Divide => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    if !a.is_number() || !b.is_number() {
                        vm_fault!("Operands must be numbers.");
                    }
                    if b.as_number() == 0.0 {
                        vm_fault!("Division by zero.");
                    }
                    self.stack.pop();
                    let top = self.stack.last_mut().expect("operand");
                    *top = Value::number(a.as_number() / b.as_number());
                }
                Op::Modulo => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    if !a.is_number() || !b.is_number() {
                        vm_fault!("Operands must be numbers.");
                    }
                    self.stack.pop();
                    let top = self.stack.last_mut().expect("operand");
                    *top = Value::number(a.as_number() % b.as_number());
                }
                Op::Negate => {
                    let a = self.peek(0);
                    if !a.is_number() {
                        vm_fault!("Operand must be a number.");
                    }
                    let top = self.stack.last_mut().expect("operand");
                    *top = Value::number(-a.as_number());
                }

                Op::Equal => {
                    let b = self.pop();
                    let a = self.peek(0);
                    let top = self.stack.last_mut().expect("operand");
                    *top = Value::boolean(values_equal(a, b));
                }
                Op::NotEqual => {
                    let b = self.pop();
                    let a = self.peek(0);
                    let top = self.stack.last_mut().expect("operand");
                    *top = Value::boolean(!values_equal(a, b));
                }
                Op::Greater => numeric_binary!(>, Value::boolean),
                Op::GreaterEqual => numeric_binary!(>=, Value::boolean),
                Op::Less => numeric_binary!(<, Value::boolean),
                Op::LessEqual => numeric_binary!(<=, Value::boolean),

                Op::Not => {
                    let a = self.peek(0);
                    let top = self.stack.last_mut().expect("operand");
                    *top = Value::boolean(a.is_falsey());
                }

                Op::GetLocal => {
                    let slot = read_byte!() as usize;
                    self.push(self.stack[base + slot]);
                }
                Op::SetLocal => {
                    let slot = read_byte!() as usize;
                    // Keeps the value on the stack for chaining.
                    self.stack[base + slot] = self.peek(0);
                }

                Op::GetGlobal => {
                    let name = read_string!();
                    let hash = self.heap.str_hash(name);
                    let slot = hash as usize & (GLOBAL_IC_SIZE - 1);
                    let ic = self.ic[slot];
                    if ic.key == Some(name)
                        && ic.capacity == self.globals.capacity()
                        && self.globals.key_at(ic.index) == Some(name)
                    {
                        self.push(self.globals.value_at(ic.index));
                    } else {
                        match self.globals.find_index(name, hash) {
                            Some(index) => {
                                self.ic[slot] = IcSlot {
                                    key: Some(name),
                                    index,
                                    capacity: self.globals.capacity(),
                                };
                                self.push(self.globals.value_at(index));
                            }
                            None => {
                                let name = self.heap.string(name).chars.clone();
                                vm_fault!("Undefined variable '{name}'.");
                            }
                        }
                    }
                }
                Op::SetGlobal => {
                    let name = read_string!();
                    let hash = self.heap.str_hash(name);
                    let value = self.peek(0);
                    let slot = hash as usize & (GLOBAL_IC_SIZE - 1);
                    let ic = self.ic[slot];
                    if ic.key == Some(name)
                        && ic.capacity == self.globals.capacity()
                        && self.globals.key_at(ic.index) == Some(name)
                    {
                        self.globals.set_value_at(ic.index, value);
                    } else {
                        self.globals.set(name, hash, value);
                        if let Some(index) = self.globals.find_index(name, hash) {
                            self.ic[slot] = IcSlot {
                                key: Some(name),
                                index,
                                capacity: self.globals.capacity(),
                            };
                        }
                    }
                }
                Op::DefineGlobal => {
                    let name = read_string!();
                    let hash = self.heap.str_hash(name);
                    let value = self.peek(0);
                    self.globals.set(name, hash, value);
                    self.stack.pop();
                }

                Op::GetUpvalue => {
                    let slot = read_byte!() as usize;
                    let upvalue = self.heap.closure(frame_closure).upvalues[slot];
                    let value = match self.heap.upvalue(upvalue).state {
                        UpvalueState::Open(stack_slot) => self.stack[stack_slot],
                        UpvalueState::Closed(value) => value,
                    };
                    self.push(value);
                }
                Op::SetUpvalue => {
                    let slot = read_byte!() as usize;
                    let upvalue = self.heap.closure(frame_closure).upvalues[slot];
                    let value = self.peek(0);
                    match self.heap.upvalue(upvalue).state {
                        UpvalueState::Open(stack_slot) => self.stack[stack_slot] = value,
                        UpvalueState::Closed(_) => {
                            self.heap.upvalue_mut(upvalue).state = UpvalueState::Closed(value);
                        }
                    }
                }

                Op::Jump => {
                    let offset = read_short!();
                    ip += offset;
                }
                Op::JumpIfFalse => {
                    let offset = read_short!();
                    if self.peek(0).is_falsey() {
                        ip += offset;
                    }
                }
                Op::Loop => {
                    let offset = read_short!();
                    ip -= offset;
                }

                Op::Call => {
                    let arg_count = read_byte!() as usize;
                    store_ip!();
                    self.call_value(self.peek(arg_count), arg_count)?;
                    load_frame!();

                    // Raised errors surface after every call.
                    match self.handle_raised_error() {
                        ErrorFlow::Clear => {}
                        ErrorFlow::HandlerEntered => load_frame!(),
                        ErrorFlow::UnwoundToBaseline => return Ok(()),
                        ErrorFlow::Fatal(err) => return Err(err),
                    }
                }

                Op::Closure => {
                    let function = read_constant!().as_object();
                    let upvalue_count = self.heap.function(function).upvalue_count;
                    let closure = self.alloc(Object::Closure(ObjClosure {
                        function,
                        upvalues: Vec::with_capacity(upvalue_count),
                    }));
                    self.push(Value::object(closure));
                    for _ in 0..upvalue_count {
                        let is_local = read_byte!() != 0;
                        let index = read_byte!() as usize;
                        let upvalue = if is_local {
                            self.capture_upvalue(base + index)
                        } else {
                            self.heap.closure(frame_closure).upvalues[index]
                        };
                        match self.heap.get_mut(closure) {
                            Object::Closure(c) => c.upvalues.push(upvalue),
                            _ => unreachable!("freshly allocated closure"),
                        }
                    }
                }

                Op::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.stack.pop();
                }

                Op::Return => {
                    let result = self.pop();
                    self.close_upvalues(base);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.stack.pop(); // the script closure
                        return Ok(());
                    }
                    self.stack.truncate(base);
                    self.push(result);
                    if self.base_frame_count > 0 && self.frames.len() == self.base_frame_count {
                        // Unwound to a native re-entry baseline; the
                        // result rides on the stack top.
                        return Ok(());
                    }
                    load_frame!();
                }

                Op::Pop => {
                    self.stack.pop();
                }

                Op::BuildList => {
                    let count = read_byte!() as usize;
                    let list = self.new_list();
                    let start = self.stack.len() - count;
                    for i in 0..count {
                        let value = self.stack[start + i];
                        self.heap.list_mut(list).items.push(value);
                    }
                    self.stack.truncate(start);
                    self.push(Value::object(list));
                }

                Op::BuildMap => {
                    let count = read_byte!() as usize;
                    let map = self.new_map();
                    self.push(Value::object(map)); // protect while filling
                    let start = self.stack.len() - 1 - 2 * count;
                    for i in 0..count {
                        let key = self.stack[start + 2 * i];
                        let value = self.stack[start + 2 * i + 1];
                        if self.str_arg(key).is_none() {
                            vm_fault!("Map key must be a string.");
                        }
                        let key_ref = key.as_object();
                        let hash = self.heap.str_hash(key_ref);
                        self.heap.map_mut(map).table.set(key_ref, hash, value);
                    }
                    self.stack.truncate(start);
                    self.push(Value::object(map));
                }

                Op::IndexGet => {
                    let index = self.pop();
                    let object = self.pop();

                    if !object.is_object() {
                        vm_fault!("Only lists, maps, and strings support indexing.");
                    }
                    let r = object.as_object();
                    match self.heap.kind(r) {
                        ObjKind::List => {
                            if !index.is_number() {
                                vm_fault!("List index must be a number.");
                            }
                            let count = self.heap.list(r).items.len() as i64;
                            let mut i = index.as_number() as i64;
                            if i < 0 {
                                i += count;
                            }
                            if i < 0 || i >= count {
                                vm_fault!("List index {i} out of range (length {count}).");
                            }
                            let value = self.heap.list(r).items[i as usize];
                            self.push(value);
                        }
                        ObjKind::Map => {
                            if self.str_arg(index).is_none() {
                                vm_fault!("Map key must be a string.");
                            }
                            let key = index.as_object();
                            let hash = self.heap.str_hash(key);
                            let value = self.heap.map(r).table.get(key, hash).unwrap_or(Value::NIL);
                            self.push(value);
                        }
                        ObjKind::String => {
                            if !index.is_number() {
                                vm_fault!("String index must be a number.");
                            }
                            let len = self.heap.string(r).chars.len() as i64;
                            let mut i = index.as_number() as i64;
                            if i < 0 {
                                i += len;
                            }
                            if i < 0 || i >= len {
                                vm_fault!("String index out of range.");
                            }
                            let one = {
                                let bytes = self.heap.string(r).chars.as_bytes();
                                String::from_utf8_lossy(&bytes[i as usize..i as usize + 1])
                                    .into_owned()
                            };
                            // The source string goes back on the stack as
                            // a root while the one-byte string is built.
                            self.push(object);
                            let value = self.take_string(one);
                            self.stack.pop();
                            self.push(value);
                        }
                        _ => vm_fault!("Only lists, maps, and strings support indexing."),
                    }
                }

                Op::IndexSet => {
                    let value = self.pop();
                    let index = self.pop();
                    let object = self.pop();

                    if !object.is_object() {
                        vm_fault!("Only lists and maps support index assignment.");
                    }
                    let r = object.as_object();
                    match self.heap.kind(r) {
                        ObjKind::List => {
                            if !index.is_number() {
                                vm_fault!("List index must be a number.");
                            }
                            let count = self.heap.list(r).items.len() as i64;
                            let mut i = index.as_number() as i64;
                            if i < 0 {
                                i += count;
                            }
                            if i < 0 || i >= count {
                                vm_fault!("List index out of range.");
                            }
                            self.heap.list_mut(r).items[i as usize] = value;
                            self.push(value);
                        }
                        ObjKind::Map => {
                            if self.str_arg(index).is_none() {
                                vm_fault!("Map key must be a string.");
                            }
                            let key = index.as_object();
                            let hash = self.heap.str_hash(key);
                            self.heap.map_mut(r).table.set(key, hash, value);
                            self.push(value);
                        }
                        _ => vm_fault!("Only lists and maps support index assignment."),
                    }
                }

                Op::GetProperty => {
                    let name = read_string!();
                    let object = self.peek(0);

                    if !object.is_object() {
                        vm_fault!("Only maps, lists, and strings have properties.");
                    }
                    let r = object.as_object();
                    match self.heap.kind(r) {
                        ObjKind::Map => {
                            let hash = self.heap.string(name).hash;
                            let value = self.heap.map(r).table.get(name, hash).unwrap_or(Value::NIL);
                            self.stack.pop();
                            self.push(value);
                        }
                        ObjKind::List => {
                            if self.heap.string(name).chars == "length" {
                                let length = self.heap.list(r).items.len() as f64;
                                self.stack.pop();
                                self.push(Value::number(length));
                            } else {
                                let name = self.heap.string(name).chars.clone();
                                vm_fault!("List has no property '{name}'.");
                            }
                        }
                        ObjKind::String => {
                            if self.heap.string(name).chars == "length" {
                                let length = self.heap.string(r).chars.len() as f64;
                                self.stack.pop();
                                self.push(Value::number(length));
                            } else {
                                let name = self.heap.string(name).chars.clone();
                                vm_fault!("String has no property '{name}'.");
                            }
                        }
                        _ => vm_fault!("Only maps, lists, and strings have properties."),
                    }
                }

                Op::SetProperty => {
                    let name = read_string!();
                    let value = self.peek(0);
                    let object = self.peek(1);

                    if !object.is_object()
                        || !matches!(self.heap.get(object.as_object()), Object::Map(_))
                    {
                        vm_fault!("Only maps support property assignment.");
                    }
                    let r = object.as_object();
                    let hash = self.heap.string(name).hash;
                    self.heap.map_mut(r).table.set(name, hash, value);
                    self.stack.pop();
                    self.stack.pop();
                    self.push(value);
                }

                Op::Allow => {
                    let kind = PermKind::from_byte(read_byte!());
                    let target = read_string!();
                    let pattern = self.heap.string(target).chars.clone();
                    tracing::trace!(kind = kind.name(), pattern = %pattern, "permission granted");
                    self.permissions.add(kind, &pattern);
                }

                Op::PushHandler => {
                    let offset = read_short!();
                    if self.handlers.len() >= HANDLER_MAX {
                        vm_fault!("Too many nested error handlers.");
                    }
                    self.handlers.push(Handler {
                        ip: ip + offset,
                        frame_count: self.frames.len(),
                        stack_len: self.stack.len(),
                    });
                }

                Op::PopHandler => {
                    self.handlers.pop();
                }

                Op::Import => {
                    let path = read_string!();
                    let binding = read_string!();
                    store_ip!();
                    self.import_module(path, binding)?;
                    load_frame!();

                    // A raised error that escaped the module's top level
                    // surfaces here like any call-site error.
                    match self.handle_raised_error() {
                        ErrorFlow::Clear => {}
                        ErrorFlow::HandlerEntered => load_frame!(),
                        ErrorFlow::UnwoundToBaseline => return Ok(()),
                        ErrorFlow::Fatal(err) => return Err(err),
                    }
                }
            }
        }
    }

    // ---- Module loader ----

    /// Load a module: compile and run the file in this VM, then collect
    /// every global it defined into an exported map, bound under the
    /// module name and cached by path.
    fn import_module(&mut self, path: ObjRef, binding: ObjRef) -> Result<(), InterpretError> {
        let path_hash = self.heap.str_hash(path);
        let binding_hash = self.heap.str_hash(binding);

        // Cache hit: just rebind.
        if let Some(cached) = self.modules.get(path, path_hash) {
            self.globals.set(binding, binding_hash, cached);
            return Ok(());
        }

        let path_str = self.heap.string(path).chars.clone();

        // Resolve relative to the running script's directory, appending
        // the implied extension.
        let mut full_path = match self.script_path.as_ref().and_then(|p| p.parent()) {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(&path_str),
            _ => PathBuf::from(&path_str),
        };
        if !full_path
            .to_string_lossy()
            .ends_with(".glipt")
        {
            full_path = PathBuf::from(format!("{}.glipt", full_path.to_string_lossy()));
        }

        tracing::debug!(path = %full_path.display(), "loading module");

        let source = match std::fs::read_to_string(&full_path) {
            Ok(source) => source,
            Err(_) => {
                return Err(self.fault(&format!(
                    "Could not open module '{}' (resolved to '{}').",
                    path_str,
                    full_path.display()
                )));
            }
        };

        // Snapshot the global key set to diff after execution.
        let existing: HashSet<ObjRef> = self.globals.iter().map(|(key, _)| key).collect();

        let function = match gliptc::compile(&mut self.heap, &source) {
            Ok(function) => function,
            Err(err) => {
                return Err(self.fault(&format!(
                    "Compilation error in module '{path_str}'.\n{err}"
                )));
            }
        };

        self.push(Value::object(function));
        let closure = self.alloc(Object::Closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        }));
        self.pop();
        self.push(Value::object(closure));

        self.call_closure(closure, 0)?;

        let saved_base = self.base_frame_count;
        self.base_frame_count = self.frames.len() - 1;
        let result = self.run();
        self.base_frame_count = saved_base;
        result?;
        self.stack.pop(); // the module's top-level return value
        if self.has_error {
            // The module raised without handling; the caller routes it.
            return Ok(());
        }

        // Everything the module added to globals becomes its namespace;
        // the additions are removed from the real globals.
        let module_map = self.new_map();
        self.push(Value::object(module_map));

        let added: Vec<(ObjRef, Value)> = self
            .globals
            .iter()
            .filter(|(key, _)| !existing.contains(key))
            .collect();
        for (key, value) in added {
            let hash = self.heap.str_hash(key);
            self.heap.map_mut(module_map).table.set(key, hash, value);
            self.globals.delete(key, hash);
        }

        self.pop();

        self.modules
            .set(path, path_hash, Value::object(module_map));
        self.globals
            .set(binding, binding_hash, Value::object(module_map));

        Ok(())
    }
}
