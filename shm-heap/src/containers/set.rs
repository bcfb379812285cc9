// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `Set`: a [`crate::hashtable::HashTable`] whose value slot is an unused
//! constant. Membership is the table's key-presence test; nothing else about
//! a dict changes, so this is a thin specialization rather than a parallel
//! implementation.

use crate::error::Result;
use crate::hashtable::{HashTable, KeyKind};
use crate::heap::Heap;

const PRESENT: u64 = 1;

/// A set of heap-resident keys (strings, structs, or primitives per
/// `kind`), sharing [`crate::hashtable::HashTable`] with [`super::dict::Dict`].
pub struct Set<'h> {
    table: HashTable<'h, u64>,
}

impl<'h> Set<'h> {
    pub fn new(heap: &'h Heap, kind: KeyKind) -> Result<Self> {
        Ok(Set {
            table: HashTable::new(heap, kind)?,
        })
    }

    /// Reattaches to a set a prior `new` call built, at the offset its
    /// `as_raw()` returned.
    ///
    /// # Safety
    /// See [`HashTable::from_pointer`]: `header_offset` must come from this
    /// same set's `as_raw()`, and only the writer that built it may mutate
    /// through the result.
    pub unsafe fn from_pointer(heap: &'h Heap, kind: KeyKind, header_offset: usize) -> Self {
        Set {
            table: HashTable::from_pointer(heap, kind, header_offset),
        }
    }

    pub fn as_raw(&self) -> usize {
        self.table.as_raw()
    }

    /// Inserts `raw_key` (already materialized per the caller's `kind`,
    /// e.g. an allocated string offset). Idempotent.
    pub fn add(&mut self, raw_key: u64) -> Result<()> {
        self.table.put(raw_key, PRESENT)
    }

    pub fn contains(&self, raw_key: u64) -> bool {
        self.table.exists(raw_key)
    }

    /// Removes `raw_key`, succeeding whether or not it was present.
    pub fn discard(&mut self, raw_key: u64) {
        let _ = self.table.delete(raw_key);
    }

    pub fn remove(&mut self, raw_key: u64) -> Result<()> {
        self.table.delete(raw_key).map(|_| ())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn iter(&self) -> Vec<u64> {
        self.table.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;
    use crate::error::Error;
    use std::ffi::CString;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn test_heap() -> (CString, Heap) {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = CString::new(format!("/shm-heap-set-{}-{}", std::process::id(), n)).unwrap();
        let base = 0x0000_9000_0000_0000usize + (n as usize) * 0x1000_0000;
        let config = HeapConfig::builder()
            .base_addr(base)
            .arena_size(1 << 20)
            .rw_arena_size(4096)
            .root_capacity(64)
            .build();
        let heap = Heap::init(&path, config).unwrap();
        (path, heap)
    }

    #[test]
    fn add_contains_remove_round_trip() {
        let (path, heap) = test_heap();
        let mut set = Set::new(&heap, KeyKind::Primitive).unwrap();
        set.add(1).unwrap();
        set.add(2).unwrap();
        assert!(set.contains(1));
        assert!(set.contains(2));
        assert!(!set.contains(3));
        assert_eq!(set.len(), 2);

        set.remove(1).unwrap();
        assert!(!set.contains(1));
        assert!(matches!(set.remove(1), Err(Error::KeyNotFound)));

        crate::heap::unlink(&path).unwrap();
    }

    #[test]
    fn discard_is_idempotent_on_absent_key() {
        let (path, heap) = test_heap();
        let mut set = Set::new(&heap, KeyKind::Primitive).unwrap();
        set.discard(99); // no-op, key never existed
        set.add(99).unwrap();
        set.discard(99);
        set.discard(99);
        assert!(!set.contains(99));
        crate::heap::unlink(&path).unwrap();
    }

    #[test]
    fn string_keyed_set() {
        let (path, heap) = test_heap();
        let mut set = Set::new(&heap, KeyKind::String).unwrap();
        let a = heap.allocate_string("alpha").unwrap() as u64;
        set.add(a).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains(a));
        crate::heap::unlink(&path).unwrap();
    }

    #[test]
    fn from_pointer_reattaches_to_existing_members() {
        let (path, heap) = test_heap();
        let mut set = Set::new(&heap, KeyKind::Primitive).unwrap();
        set.add(5).unwrap();

        let offset = set.as_raw();
        let reattached = unsafe { Set::from_pointer(&heap, KeyKind::Primitive, offset) };
        assert!(reattached.contains(5));
        assert!(!reattached.contains(6));

        crate::heap::unlink(&path).unwrap();
    }
}
