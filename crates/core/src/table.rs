//! Open-Addressing String Table
//!
//! Hash table from interned strings to values, used for the intern table,
//! globals, the module cache, and map objects. Linear probing with
//! tombstones; resize at 75% load. Keys are interned, so key equality is
//! slot-index equality; each bucket caches the key's hash so probing never
//! touches the heap. `find_string` is the one byte-comparing probe, used by
//! the interner before a string object exists.

use crate::object::ObjRef;
use crate::value::Value;

const MIN_CAPACITY: usize = 8;

#[derive(Clone, Copy, Debug)]
enum Bucket {
    Empty,
    Tombstone,
    Used { key: ObjRef, hash: u32, value: Value },
}

#[derive(Debug)]
pub struct Table {
    buckets: Vec<Bucket>,
    /// Used buckets plus tombstones; drives the load-factor check.
    count: usize,
}

impl Default for Table {
    fn default() -> Self {
        Table::new()
    }
}

impl Table {
    pub fn new() -> Table {
        Table {
            buckets: Vec::new(),
            count: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Number of live (non-tombstone) entries.
    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .filter(|b| matches!(b, Bucket::Used { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current allocation footprint, for GC byte accounting.
    pub fn byte_size(&self) -> usize {
        self.buckets.capacity() * std::mem::size_of::<Bucket>()
    }

    /// Probe for `key`. Returns the bucket to use: an existing entry if the
    /// key is present, otherwise the first tombstone seen (or the empty
    /// bucket that ended the probe).
    fn find_slot(&self, key: ObjRef, hash: u32) -> (usize, bool) {
        debug_assert!(!self.buckets.is_empty());
        let mask = self.buckets.len() - 1;
        let mut index = hash as usize & mask;
        let mut tombstone: Option<usize> = None;

        loop {
            match self.buckets[index] {
                Bucket::Empty => return (tombstone.unwrap_or(index), false),
                Bucket::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Bucket::Used { key: k, .. } => {
                    if k == key {
                        return (index, true);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    fn grow(&mut self) {
        let new_capacity = if self.buckets.is_empty() {
            MIN_CAPACITY
        } else {
            self.buckets.len() * 2
        };
        let old = std::mem::replace(&mut self.buckets, vec![Bucket::Empty; new_capacity]);
        self.count = 0;
        let mask = new_capacity - 1;
        for bucket in old {
            if let Bucket::Used { key, hash, value } = bucket {
                let mut index = hash as usize & mask;
                while let Bucket::Used { .. } = self.buckets[index] {
                    index = (index + 1) & mask;
                }
                self.buckets[index] = Bucket::Used { key, hash, value };
                self.count += 1;
            }
        }
    }

    pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let (index, found) = self.find_slot(key, hash);
        if found { Some(self.value_at(index)) } else { None }
    }

    /// Insert or overwrite. Returns true when the key was new.
    pub fn set(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        if (self.count + 1) * 4 > self.buckets.len() * 3 {
            self.grow();
        }
        let (index, found) = self.find_slot(key, hash);
        // Reusing a tombstone does not change the load count.
        let is_new = !found;
        if is_new && matches!(self.buckets[index], Bucket::Empty) {
            self.count += 1;
        }
        self.buckets[index] = Bucket::Used { key, hash, value };
        is_new
    }

    /// Remove a key, leaving a tombstone so probe chains stay intact.
    pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
        if self.count == 0 {
            return false;
        }
        let (index, found) = self.find_slot(key, hash);
        if !found {
            return false;
        }
        self.buckets[index] = Bucket::Tombstone;
        true
    }

    /// Index of the bucket holding `key`, for inline-cache use.
    pub fn find_index(&self, key: ObjRef, hash: u32) -> Option<usize> {
        if self.count == 0 {
            return None;
        }
        let (index, found) = self.find_slot(key, hash);
        if found { Some(index) } else { None }
    }

    /// Key stored at a bucket index, if the bucket is live. Lets a cache
    /// validate that its entry has not been deleted out from under it.
    #[inline]
    pub fn key_at(&self, index: usize) -> Option<ObjRef> {
        match self.buckets.get(index) {
            Some(Bucket::Used { key, .. }) => Some(*key),
            _ => None,
        }
    }

    #[inline]
    pub fn value_at(&self, index: usize) -> Value {
        match self.buckets[index] {
            Bucket::Used { value, .. } => value,
            _ => Value::NIL,
        }
    }

    #[inline]
    pub fn set_value_at(&mut self, index: usize, value: Value) {
        if let Bucket::Used { value: slot, .. } = &mut self.buckets[index] {
            *slot = value;
        }
    }

    /// Live entry at a bucket position, or None. GC tracing and iteration
    /// walk buckets by index so callers can interleave heap access.
    #[inline]
    pub fn bucket(&self, index: usize) -> Option<(ObjRef, Value)> {
        match self.buckets.get(index) {
            Some(Bucket::Used { key, value, .. }) => Some((*key, *value)),
            _ => None,
        }
    }

    /// Iterate live entries in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
        self.buckets.iter().filter_map(|b| match b {
            Bucket::Used { key, value, .. } => Some((*key, *value)),
            _ => None,
        })
    }

    /// Interning probe: scan the chain for a string whose hash matches and
    /// whose bytes compare equal (checked by the caller-supplied closure,
    /// which has heap access). Skips tombstones like any other probe.
    pub fn find_string(&self, hash: u32, mut bytes_equal: impl FnMut(ObjRef) -> bool) -> Option<ObjRef> {
        if self.count == 0 {
            return None;
        }
        let mask = self.buckets.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            match self.buckets[index] {
                Bucket::Empty => return None,
                Bucket::Tombstone => {}
                Bucket::Used { key, hash: h, .. } => {
                    if h == hash && bytes_equal(key) {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: u32) -> (ObjRef, u32) {
        // Synthetic keys: the ref doubles as its own hash.
        (ObjRef::new(i), i.wrapping_mul(2654435761))
    }

    #[test]
    fn set_get_overwrite() {
        let mut t = Table::new();
        let (k, h) = key(1);
        assert!(t.set(k, h, Value::number(10.0)));
        assert!(!t.set(k, h, Value::number(20.0)));
        assert_eq!(t.get(k, h).unwrap().as_number(), 20.0);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn delete_leaves_probe_chain_intact() {
        let mut t = Table::new();
        let entries: Vec<_> = (0..6).map(key).collect();
        for (k, h) in &entries {
            t.set(*k, *h, Value::TRUE);
        }
        let (k2, h2) = entries[2];
        assert!(t.delete(k2, h2));
        assert!(t.get(k2, h2).is_none());
        // Every other key must still be reachable through the tombstone.
        for (i, (k, h)) in entries.iter().enumerate() {
            if i != 2 {
                assert!(t.get(*k, *h).is_some(), "lost key {i}");
            }
        }
    }

    #[test]
    fn growth_preserves_entries() {
        let mut t = Table::new();
        let entries: Vec<_> = (0..100).map(key).collect();
        for (i, (k, h)) in entries.iter().enumerate() {
            t.set(*k, *h, Value::number(i as f64));
        }
        assert!(t.capacity() >= 100);
        for (i, (k, h)) in entries.iter().enumerate() {
            assert_eq!(t.get(*k, *h).unwrap().as_number(), i as f64);
        }
        assert_eq!(t.len(), 100);
    }

    #[test]
    fn tombstones_are_reused_on_insert() {
        let mut t = Table::new();
        let (k, h) = key(7);
        t.set(k, h, Value::TRUE);
        t.delete(k, h);
        t.set(k, h, Value::FALSE);
        assert!(!t.get(k, h).unwrap().as_bool());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn cache_index_sees_deletion() {
        let mut t = Table::new();
        let (k, h) = key(3);
        t.set(k, h, Value::TRUE);
        let idx = t.find_index(k, h).unwrap();
        assert_eq!(t.key_at(idx), Some(k));
        t.delete(k, h);
        assert_eq!(t.key_at(idx), None);
    }
}
