//! Object Heap
//!
//! Slab storage for every garbage-collected object, addressed by 32-bit
//! slot indices (see [`ObjRef`]). The heap owns the string intern table,
//! the gray worklist, and the byte-count watermark; the VM decides *when*
//! to collect (it can see the roots) and drives the phases:
//!
//! 1. mark roots (`mark_value` / `mark_object`)
//! 2. [`Heap::trace_references`] — drain the gray worklist
//! 3. [`Heap::remove_white_strings`] — evict dead interned strings
//! 4. [`Heap::sweep`] — free unmarked slots, clear survivor marks
//!
//! The gray worklist and the temporary buffers used while blackening are
//! plain `Vec`s, so tracing never allocates through the collected heap.

use std::rc::Rc;

use crate::object::{
    hash_string, ObjList, ObjMap, ObjNative, ObjRef, ObjString, ObjUpvalue, Object, UpvalueState,
    ObjClosure, ObjFunction,
};
use crate::table::Table;
use crate::value::Value;

/// First collection fires once a megabyte of objects is live.
const INITIAL_GC_THRESHOLD: usize = 1024 * 1024;

pub struct Heap {
    slots: Vec<Option<Object>>,
    marks: Vec<bool>,
    free: Vec<u32>,
    /// Intern table: every live string, keyed by itself.
    strings: Table,
    gray: Vec<ObjRef>,
    pub bytes_allocated: usize,
    pub next_gc: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

impl Heap {
    pub fn new() -> Heap {
        Heap {
            slots: Vec::new(),
            marks: Vec::new(),
            free: Vec::new(),
            strings: Table::new(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: INITIAL_GC_THRESHOLD,
        }
    }

    /// Store an object, reusing a freed slot when one is available. This
    /// never collects; callers with root visibility (the VM) check the
    /// watermark before allocating.
    pub fn allocate(&mut self, object: Object) -> ObjRef {
        self.bytes_allocated += object.size_hint();
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(object);
            self.marks[index as usize] = false;
            ObjRef::new(index)
        } else {
            self.slots.push(Some(object));
            self.marks.push(false);
            ObjRef::new((self.slots.len() - 1) as u32)
        }
    }

    #[inline]
    pub fn get(&self, r: ObjRef) -> &Object {
        self.slots[r.index() as usize]
            .as_ref()
            .expect("use of freed object slot")
    }

    #[inline]
    pub fn get_mut(&mut self, r: ObjRef) -> &mut Object {
        self.slots[r.index() as usize]
            .as_mut()
            .expect("use of freed object slot")
    }

    pub fn live_objects(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    #[inline]
    pub fn kind(&self, r: ObjRef) -> crate::object::ObjKind {
        self.get(r).kind()
    }

    // ---- Typed accessors ----
    //
    // Object kinds are invariants established by the compiler and VM, so a
    // mismatch here is a corrupt-heap bug, not a user error.

    #[inline]
    pub fn string(&self, r: ObjRef) -> &ObjString {
        match self.get(r) {
            Object::String(s) => s,
            other => panic!("expected string, found {}", other.kind_name()),
        }
    }

    #[inline]
    pub fn str_hash(&self, r: ObjRef) -> u32 {
        self.string(r).hash
    }

    #[inline]
    pub fn function(&self, r: ObjRef) -> &ObjFunction {
        match self.get(r) {
            Object::Function(f) => f,
            other => panic!("expected function, found {}", other.kind_name()),
        }
    }

    #[inline]
    pub fn closure(&self, r: ObjRef) -> &ObjClosure {
        match self.get(r) {
            Object::Closure(c) => c,
            other => panic!("expected closure, found {}", other.kind_name()),
        }
    }

    #[inline]
    pub fn upvalue(&self, r: ObjRef) -> &ObjUpvalue {
        match self.get(r) {
            Object::Upvalue(u) => u,
            other => panic!("expected upvalue, found {}", other.kind_name()),
        }
    }

    #[inline]
    pub fn upvalue_mut(&mut self, r: ObjRef) -> &mut ObjUpvalue {
        match self.get_mut(r) {
            Object::Upvalue(u) => u,
            other => panic!("expected upvalue, found {}", other.kind_name()),
        }
    }

    #[inline]
    pub fn native(&self, r: ObjRef) -> &ObjNative {
        match self.get(r) {
            Object::Native(n) => n,
            other => panic!("expected native, found {}", other.kind_name()),
        }
    }

    #[inline]
    pub fn list(&self, r: ObjRef) -> &ObjList {
        match self.get(r) {
            Object::List(l) => l,
            other => panic!("expected list, found {}", other.kind_name()),
        }
    }

    #[inline]
    pub fn list_mut(&mut self, r: ObjRef) -> &mut ObjList {
        match self.get_mut(r) {
            Object::List(l) => l,
            other => panic!("expected list, found {}", other.kind_name()),
        }
    }

    #[inline]
    pub fn map(&self, r: ObjRef) -> &ObjMap {
        match self.get(r) {
            Object::Map(m) => m,
            other => panic!("expected map, found {}", other.kind_name()),
        }
    }

    #[inline]
    pub fn map_mut(&mut self, r: ObjRef) -> &mut ObjMap {
        match self.get_mut(r) {
            Object::Map(m) => m,
            other => panic!("expected map, found {}", other.kind_name()),
        }
    }

    // ---- Interning ----

    /// Intern a string: byte-identical strings share one heap object, so
    /// string equality elsewhere is slot-index equality.
    pub fn intern(&mut self, chars: &str) -> ObjRef {
        let hash = hash_string(chars);
        if let Some(existing) = self
            .strings
            .find_string(hash, |r| self.string(r).chars == chars)
        {
            return existing;
        }
        let r = self.allocate(Object::String(ObjString {
            chars: chars.to_owned(),
            hash,
        }));
        self.strings.set(r, hash, Value::NIL);
        r
    }

    /// Intern, taking ownership of an already-built buffer.
    pub fn intern_owned(&mut self, chars: String) -> ObjRef {
        let hash = hash_string(&chars);
        if let Some(existing) = self
            .strings
            .find_string(hash, |r| self.string(r).chars == chars)
        {
            return existing;
        }
        let r = self.allocate(Object::String(ObjString { chars, hash }));
        self.strings.set(r, hash, Value::NIL);
        r
    }

    // ---- Mark phase ----

    #[inline]
    pub fn mark_value(&mut self, value: Value) {
        if value.is_object() {
            self.mark_object(value.as_object());
        }
    }

    pub fn mark_object(&mut self, r: ObjRef) {
        let index = r.index() as usize;
        if self.marks[index] {
            return;
        }
        self.marks[index] = true;
        self.gray.push(r);
    }

    pub fn is_marked(&self, r: ObjRef) -> bool {
        self.marks[r.index() as usize]
    }

    /// Drain the gray worklist, marking every object reachable from the
    /// already-marked set. Strings and natives have no outgoing references.
    pub fn trace_references(&mut self) {
        let mut child_values: Vec<Value> = Vec::new();
        let mut child_refs: Vec<ObjRef> = Vec::new();

        while let Some(r) = self.gray.pop() {
            child_values.clear();
            child_refs.clear();

            match self.get(r) {
                Object::String(_) | Object::Native(_) => {}
                Object::Upvalue(u) => {
                    if let UpvalueState::Closed(v) = u.state {
                        child_values.push(v);
                    }
                }
                Object::Function(f) => {
                    if let Some(name) = f.name {
                        child_refs.push(name);
                    }
                    let chunk = Rc::clone(&f.chunk);
                    child_values.extend_from_slice(&chunk.constants);
                }
                Object::Closure(c) => {
                    child_refs.push(c.function);
                    child_refs.extend_from_slice(&c.upvalues);
                }
                Object::List(l) => {
                    child_values.extend_from_slice(&l.items);
                }
                Object::Map(m) => {
                    for (key, value) in m.table.iter() {
                        child_refs.push(key);
                        child_values.push(value);
                    }
                }
            }

            for &child in &child_refs {
                self.mark_object(child);
            }
            for &child in &child_values {
                self.mark_value(child);
            }
        }
    }

    pub fn gray_is_empty(&self) -> bool {
        self.gray.is_empty()
    }

    // ---- Sweep phase ----

    /// Drop unmarked strings from the intern table before the sweep frees
    /// them, so a dead string cannot be resurrected through the table.
    pub fn remove_white_strings(&mut self) {
        let dead: Vec<(ObjRef, u32)> = self
            .strings
            .iter()
            .filter(|(key, _)| !self.marks[key.index() as usize])
            .map(|(key, _)| (key, self.string(key).hash))
            .collect();
        for (key, hash) in dead {
            self.strings.delete(key, hash);
        }
    }

    /// Free every unmarked slot and clear survivor marks.
    pub fn sweep(&mut self) {
        for index in 0..self.slots.len() {
            if self.slots[index].is_none() {
                continue;
            }
            if self.marks[index] {
                self.marks[index] = false;
            } else {
                let freed = self.slots[index].take().expect("slot checked above");
                self.bytes_allocated = self.bytes_allocated.saturating_sub(freed.size_hint());
                self.free.push(index as u32);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedups_byte_identical_strings() {
        let mut heap = Heap::new();
        let a = heap.intern("hello");
        let b = heap.intern("hello");
        let c = heap.intern("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.string(a).chars, "hello");
    }

    #[test]
    fn intern_owned_reuses_existing() {
        let mut heap = Heap::new();
        let a = heap.intern("shared");
        let b = heap.intern_owned(String::from("shared"));
        assert_eq!(a, b);
    }

    #[test]
    fn sweep_frees_unmarked_and_keeps_marked() {
        let mut heap = Heap::new();
        let keep = heap.intern("keep");
        let drop = heap.intern("drop");
        heap.mark_object(keep);
        heap.trace_references();
        heap.remove_white_strings();
        heap.sweep();
        assert_eq!(heap.string(keep).chars, "keep");
        assert_eq!(heap.live_objects(), 1);
        // The dead string is gone from the intern table: re-interning the
        // same bytes builds a fresh object in the freed slot.
        let again = heap.intern("drop");
        assert_eq!(again.index(), drop.index());
    }

    #[test]
    fn tracing_follows_list_and_map_edges() {
        let mut heap = Heap::new();
        let inner = heap.intern("inner");
        let list = heap.allocate(Object::List(ObjList {
            items: vec![Value::object(inner)],
        }));
        let key = heap.intern("k");
        let mut table = Table::new();
        let hash = heap.str_hash(key);
        table.set(key, hash, Value::object(list));
        let map = heap.allocate(Object::Map(ObjMap { table }));

        heap.mark_object(map);
        heap.trace_references();
        assert!(heap.gray_is_empty());
        assert!(heap.is_marked(inner));
        assert!(heap.is_marked(list));
        assert!(heap.is_marked(key));
    }

    #[test]
    fn byte_accounting_shrinks_on_sweep() {
        let mut heap = Heap::new();
        heap.intern("some transient garbage string");
        let before = heap.bytes_allocated;
        heap.trace_references();
        heap.remove_white_strings();
        heap.sweep();
        assert!(heap.bytes_allocated < before);
    }
}
