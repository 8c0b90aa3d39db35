//! Glipt Core
//!
//! Shared foundation for the Glipt compiler and runtime: the NaN-boxed
//! [`Value`](value::Value) encoding, heap object variants, the slab
//! [`Heap`](heap::Heap) with string interning and mark-sweep primitives,
//! the open-addressing [`Table`](table::Table), and bytecode
//! [`Chunk`](chunk::Chunk)s with their opcode set.

pub mod chunk;
pub mod heap;
pub mod object;
pub mod table;
pub mod value;

pub use chunk::{Chunk, Op, MAX_CONSTANTS};
pub use heap::Heap;
pub use object::{
    hash_string, ObjClosure, ObjFunction, ObjKind, ObjList, ObjMap, ObjNative, ObjRef, ObjString,
    ObjUpvalue, Object, UpvalueState,
};
pub use table::Table;
pub use value::{values_equal, Value};
