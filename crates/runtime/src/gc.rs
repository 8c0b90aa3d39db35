//! Garbage Collection Driver
//!
//! The heap owns object storage and the mark/sweep machinery; this module
//! supplies the roots only the VM can see and sequences the phases. A
//! collection runs when allocation crosses the watermark (or on every
//! allocation in stress mode), and the next threshold doubles the live
//! size. The global inline cache is flushed each cycle since entry
//! indices may go stale once objects are freed.

use crate::vm::Vm;

impl Vm {
    pub fn collect_garbage(&mut self) {
        let before = self.heap.bytes_allocated;

        // Roots: the value stack, every frame's closure, the open-upvalue
        // list, globals, the module cache, and any in-flight error value.
        for value in &self.stack {
            self.heap.mark_value(*value);
        }
        for frame in &self.frames {
            self.heap.mark_object(frame.closure());
        }
        for upvalue in &self.open_upvalues {
            self.heap.mark_object(*upvalue);
        }
        for index in 0..self.globals.capacity() {
            let bucket = self.globals.bucket(index);
            if let Some((key, value)) = bucket {
                self.heap.mark_object(key);
                self.heap.mark_value(value);
            }
        }
        for index in 0..self.modules.capacity() {
            let bucket = self.modules.bucket(index);
            if let Some((key, value)) = bucket {
                self.heap.mark_object(key);
                self.heap.mark_value(value);
            }
        }
        self.heap.mark_value(self.current_error);

        self.heap.trace_references();
        debug_assert!(self.heap.gray_is_empty());
        self.heap.remove_white_strings();
        self.heap.sweep();

        self.heap.next_gc = self.heap.bytes_allocated * 2;
        self.flush_inline_cache();

        tracing::debug!(
            freed = before.saturating_sub(self.heap.bytes_allocated),
            live = self.heap.bytes_allocated,
            next_gc = self.heap.next_gc,
            "gc cycle"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glipt_core::Value;

    #[test]
    fn stack_values_survive_collection() {
        let mut vm = Vm::new();
        let s = vm.new_string("survivor");
        vm.push(s);
        vm.collect_garbage();
        assert_eq!(vm.str_arg(vm.peek(0)), Some("survivor"));
        vm.pop();
    }

    #[test]
    fn unreachable_objects_are_freed() {
        let mut vm = Vm::new();
        let live_before = vm.heap.live_objects();
        // Build garbage with no roots.
        for i in 0..50 {
            vm.take_string(format!("transient-{i}"));
        }
        vm.collect_garbage();
        assert_eq!(vm.heap.live_objects(), live_before);
    }

    #[test]
    fn globals_are_roots() {
        let mut vm = Vm::new();
        vm.interpret("let keep = \"rooted by a global\"\n").unwrap();
        vm.collect_garbage();
        let name = vm.intern("keep");
        let hash = vm.heap.str_hash(name);
        let value = vm.globals.get(name, hash).unwrap();
        assert_eq!(vm.str_arg(value), Some("rooted by a global"));
    }

    #[test]
    fn cyclic_structures_are_collected() {
        let mut vm = Vm::new();
        let live_before = vm.heap.live_objects();
        // A map whose value is a list containing the map: a heap cycle
        // with no external roots.
        let map = vm.new_map();
        vm.push(Value::object(map));
        let list = vm.new_list();
        vm.heap.list_mut(list).items.push(Value::object(map));
        vm.map_set_str(map, "self", Value::object(list));
        vm.pop();
        vm.collect_garbage();
        // The cycle (map, list, and the key string) is gone.
        assert_eq!(vm.heap.live_objects(), live_before);
    }
}
