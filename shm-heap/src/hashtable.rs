// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The hashtable primitive: an open-addressed key/value table over
//! `hashbrown::HashTable`, backed by the heap's own allocator, with
//! pluggable key disciplines (`KeyKind`) choosing between default and
//! field-spec-driven hash/cmp strategies.
//!
//! `hashbrown::HashTable` (unlike `HashMap`) takes hash and equality as
//! closures supplied at each call rather than via a `Hash`/`Eq` bound, which
//! is exactly what a pluggable-strategy table needs: the same table type
//! serves byte-wise string keys and field-spec struct keys by varying the
//! closures, not the type.

use crate::error::{Error, Result};
use crate::fieldspec::FieldSpec;
use crate::heap::Heap;
use allocator_api2::alloc::{AllocError, Allocator};
use core::alloc::Layout;
use core::ptr::NonNull;
use hashbrown::HashTable as RawHashTable;
use std::rc::Rc;

/// Delegates every allocation to the heap's GC arena. `deallocate` is a
/// no-op: the GC reclaims unreachable blocks, it does not take instructions
/// from an `Allocator::deallocate` call (mirrors
/// `FixedAllocator::deallocate` in `libdd-profiling-shm`, generalized to
/// allow more than one allocation over the table's lifetime as the table
/// grows).
pub struct HeapAllocator<'h> {
    heap: &'h Heap,
}

impl<'h> HeapAllocator<'h> {
    pub fn new(heap: &'h Heap) -> Self {
        HeapAllocator { heap }
    }
}

unsafe impl Allocator for HeapAllocator<'_> {
    fn allocate(&self, layout: Layout) -> std::result::Result<NonNull<[u8]>, AllocError> {
        // hashbrown's control+slot allocations are never over-aligned beyond
        // what a zero-initialized heap block already satisfies (GRANULE is
        // 16); reject anything stricter rather than silently misaligning.
        if layout.align() > crate::heap::gc::GRANULE {
            return Err(AllocError);
        }
        let offset = self.heap.allocate(layout.size()).map_err(|_| AllocError)?;
        let addr = self.heap.base_addr() + offset;
        let ptr = NonNull::new(addr as *mut u8).ok_or(AllocError)?;
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}
}

/// How a key is addressed and compared: a small set of pluggable strategies
/// covering the concrete dict key disciplines this heap needs.
#[derive(Clone)]
pub enum KeyKind {
    /// NUL-terminated string. Default byte-wise hash/compare over the
    /// string's content; a fresh copy is allocated on insert.
    String,
    /// Key is the struct itself, stored inline at the key offset (nocopy).
    /// Requires the struct's type be immutable -- `immutable` must be the
    /// pointee `StructSpec`'s own `is_immutable()`, faithfully carried over
    /// by the caller; a table built with `immutable: false` here is
    /// rejected at construction. Hashed/compared deeply via `spec`.
    StructByValue {
        spec: Rc<FieldSpec>,
        size: usize,
        immutable: bool,
    },
    /// Key is a pointer to a struct elsewhere in the heap (nocopy); hashed
    /// and compared deeply via the pointee's `spec`. Same immutability
    /// requirement and contract as `StructByValue`.
    StructByPointer { spec: Rc<FieldSpec>, immutable: bool },
    /// Key is a raw primitive value stored inline (nocopy); hash and
    /// compare are pointer-identity style -- the raw bits themselves.
    Primitive,
}

/// An entry's key representation: for `String`/`StructByPointer`, a heap
/// offset; for `StructByValue`, the offset of the inline struct; for
/// `Primitive`, the raw value reinterpreted as a `u64`.
type KeyRepr = u64;

/// The hashbrown table type this module stores, parameterized the same way
/// whether it's freshly built or reattached from an existing offset.
type RawTable<'h, V> = RawHashTable<(KeyRepr, V), HeapAllocator<'h>>;

/// A keyed hashtable over a [`Heap`]'s allocator.
///
/// `V` must be `Copy` and fit in a `u64` slot -- every container built on
/// this (dict, set) stores either a heap offset or an inline primitive as
/// its value, matching how `List`/`Dict` headers store raw heap words.
///
/// The `hashbrown::HashTable` bookkeeping itself (control pointer, bucket
/// mask, item count) lives at `header_offset` inside the heap's own arena
/// rather than as an owned field here, the same way `libdd-profiling-shm`'s
/// `ShmStringTable` places its `hashbrown::HashTable` at a fixed offset in
/// shared memory: a second process that knows `header_offset` reattaches by
/// pointer cast instead of re-running construction. Only the writer that
/// built the table may call a mutating method on it -- a reattached reader
/// handle's embedded allocator reference is only ever valid in the process
/// that created it, but reads never touch the allocator field.
pub struct HashTable<'h, V: Copy + 'static> {
    heap: &'h Heap,
    kind: KeyKind,
    header_offset: usize,
}

/// Rejects a key discipline built over a mutable struct type: a struct
/// whose fields can change out from under a stored key would corrupt the
/// table's hash invariants. `String`/`Primitive` have no such requirement.
fn reject_mutable_struct_key(kind: &KeyKind) -> Result<()> {
    let immutable = match kind {
        KeyKind::StructByValue { immutable, .. } => *immutable,
        KeyKind::StructByPointer { immutable, .. } => *immutable,
        KeyKind::String | KeyKind::Primitive => true,
    };
    if immutable {
        Ok(())
    } else {
        Err(Error::NonHashableKey("mutable struct key"))
    }
}

impl<'h, V: Copy + 'static> HashTable<'h, V> {
    pub fn new(heap: &'h Heap, kind: KeyKind) -> Result<Self> {
        reject_mutable_struct_key(&kind)?;
        let header_offset = heap.allocate(std::mem::size_of::<RawTable<'h, V>>())?;
        let table = RawHashTable::new_in(HeapAllocator::new(heap));
        unsafe { std::ptr::write(Self::raw_ptr(heap, header_offset), table) };
        Ok(HashTable { heap, kind, header_offset })
    }

    /// Reattaches to a table a prior `new` call built, identified by the
    /// offset `as_raw` returned. The caller vouches that `header_offset`
    /// really holds a table of this exact `V`, built with this `kind` --
    /// nothing in the bytes on disk can check that.
    ///
    /// # Safety
    /// `header_offset` must be the `as_raw()` of a `HashTable<V>` built by
    /// `new` against an equivalent heap mapping. Only the process that built
    /// the table (or, more precisely, the one holding the matching `&Heap`
    /// reference embedded in its allocator) may call a mutating method
    /// (`put`/`delete`) on the result; a reattached reader must stick to
    /// `get`/`exists`/`keys`/`len`.
    pub unsafe fn from_pointer(heap: &'h Heap, kind: KeyKind, header_offset: usize) -> Self {
        HashTable { heap, kind, header_offset }
    }

    /// The heap offset of this table's own bookkeeping struct, suitable for
    /// handing to another process's [`HashTable::from_pointer`].
    pub fn as_raw(&self) -> usize {
        self.header_offset
    }

    unsafe fn raw_ptr(heap: &Heap, header_offset: usize) -> *mut RawTable<'h, V> {
        (heap.base_addr() + header_offset) as *mut RawTable<'h, V>
    }

    fn raw(&self) -> &RawTable<'h, V> {
        unsafe { &*Self::raw_ptr(self.heap, self.header_offset) }
    }

    fn raw_mut(&mut self) -> &mut RawTable<'h, V> {
        unsafe { &mut *Self::raw_ptr(self.heap, self.header_offset) }
    }

    fn hash_repr(heap: &Heap, kind: &KeyKind, key: KeyRepr) -> u64 {
        match kind {
            KeyKind::String => {
                let bytes = unsafe { read_cstr_bytes(heap, key as usize) };
                fnv1a(bytes)
            }
            KeyKind::StructByValue { spec, .. } => spec.deep_hash(heap, key as usize),
            KeyKind::StructByPointer { spec, .. } => {
                let target = read_u64(heap, key as usize) as usize;
                spec.deep_hash(heap, target)
            }
            KeyKind::Primitive => key,
        }
    }

    fn eq_repr(heap: &Heap, kind: &KeyKind, a: KeyRepr, b: KeyRepr) -> bool {
        match kind {
            KeyKind::String => {
                let sa = unsafe { read_cstr_bytes(heap, a as usize) };
                let sb = unsafe { read_cstr_bytes(heap, b as usize) };
                sa == sb
            }
            KeyKind::StructByValue { spec, .. } => {
                spec.deep_compare(heap, a as usize, b as usize) == std::cmp::Ordering::Equal
            }
            KeyKind::StructByPointer { spec, .. } => {
                let ta = read_u64(heap, a as usize) as usize;
                let tb = read_u64(heap, b as usize) as usize;
                spec.deep_compare(heap, ta, tb) == std::cmp::Ordering::Equal
            }
            KeyKind::Primitive => a == b,
        }
    }

    /// Materializes `raw_key` (caller-supplied bytes/offset per the table's
    /// `KeyKind`) into the `KeyRepr` this table stores, rejecting a NUL
    /// string pointer used as a key -- a key identity can't be "absent."
    fn materialize_key(heap: &Heap, kind: &KeyKind, raw_key: KeyRepr) -> Result<KeyRepr> {
        reject_mutable_struct_key(kind)?;
        if matches!(kind, KeyKind::String) && raw_key == 0 {
            return Err(Error::NonHashableKey("NUL string pointer"));
        }
        match kind {
            KeyKind::String => {
                let bytes = unsafe { read_cstr_bytes(heap, raw_key as usize) };
                let s = std::str::from_utf8(bytes).map_err(|_| Error::NonHashableKey("non-UTF8 string key"))?;
                Ok(heap.allocate_string(s)? as u64)
            }
            _ => Ok(raw_key),
        }
    }

    pub fn get(&self, raw_key: KeyRepr) -> Option<V> {
        let heap = self.heap;
        let kind = &self.kind;
        let hash = Self::hash_repr(heap, kind, raw_key);
        self.raw()
            .find(hash, |(k, _)| Self::eq_repr(heap, kind, *k, raw_key))
            .map(|(_, v)| *v)
    }

    pub fn exists(&self, raw_key: KeyRepr) -> bool {
        self.get(raw_key).is_some()
    }

    pub fn put(&mut self, raw_key: KeyRepr, value: V) -> Result<()> {
        let heap = self.heap;
        let kind = self.kind.clone();
        let hash = Self::hash_repr(heap, &kind, raw_key);
        if let Some(entry) = self
            .raw_mut()
            .find_mut(hash, |(k, _)| Self::eq_repr(heap, &kind, *k, raw_key))
        {
            entry.1 = value;
            return Ok(());
        }
        let stored_key = Self::materialize_key(heap, &kind, raw_key)?;
        let hash = Self::hash_repr(heap, &kind, stored_key);
        self.raw_mut().insert_unique(hash, (stored_key, value), |(k, _)| {
            Self::hash_repr(heap, &kind, *k)
        });
        Ok(())
    }

    pub fn delete(&mut self, raw_key: KeyRepr) -> Result<V> {
        let heap = self.heap;
        let kind = self.kind.clone();
        let hash = Self::hash_repr(heap, &kind, raw_key);
        match self
            .raw_mut()
            .find_entry(hash, |(k, _)| Self::eq_repr(heap, &kind, *k, raw_key))
        {
            Ok(entry) => {
                let ((_, v), _) = entry.remove();
                Ok(v)
            }
            Err(_) => Err(Error::KeyNotFound),
        }
    }

    /// Snapshot of every stored key representation, in bucket order. Not a
    /// stable iteration order across mutation.
    pub fn keys(&self) -> Vec<KeyRepr> {
        self.raw().iter().map(|(k, _)| *k).collect()
    }

    pub fn len(&self) -> usize {
        self.raw().len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw().is_empty()
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut state = 0xcbf29ce484222325u64;
    for &b in bytes {
        state ^= b as u64;
        state = state.wrapping_mul(0x100000001b3);
    }
    state
}

fn read_u64(heap: &Heap, offset: usize) -> u64 {
    let bytes = unsafe { heap.read(offset, 8) };
    u64::from_le_bytes(bytes.try_into().unwrap())
}

unsafe fn read_cstr_bytes(heap: &Heap, offset: usize) -> &[u8] {
    let mut len = 0usize;
    loop {
        let byte = heap.read(offset + len, 1)[0];
        if byte == 0 {
            break;
        }
        len += 1;
    }
    heap.read(offset, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;
    use std::ffi::CString;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn test_heap() -> (CString, Heap) {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = CString::new(format!("/shm-heap-hashtable-{}-{}", std::process::id(), n)).unwrap();
        let base = 0x0000_4000_0000_0000usize + (n as usize) * 0x1000_0000;
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
    fn string_keys_put_get_delete() {
        let (path, heap) = test_heap();
        let mut table: HashTable<u64> = HashTable::new(&heap, KeyKind::String).unwrap();

        let hello = heap.allocate_string("hello").unwrap() as u64;
        let world = heap.allocate_string("world").unwrap() as u64;

        table.put(hello, 1).unwrap();
        table.put(world, 2).unwrap();
        assert_eq!(table.get(hello), Some(1));
        assert_eq!(table.get(world), Some(2));
        assert_eq!(table.len(), 2);

        let removed = table.delete(hello).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(table.get(hello), None);

        crate::heap::unlink(&path).unwrap();
    }

    #[test]
    fn nul_string_key_is_rejected() {
        let (path, heap) = test_heap();
        let mut table: HashTable<u64> = HashTable::new(&heap, KeyKind::String).unwrap();
        assert!(matches!(
            table.put(0, 1),
            Err(Error::NonHashableKey(_))
        ));
        crate::heap::unlink(&path).unwrap();
    }

    #[test]
    fn primitive_keys_use_identity() {
        let (path, heap) = test_heap();
        let mut table: HashTable<u64> = HashTable::new(&heap, KeyKind::Primitive).unwrap();
        table.put(42, 100).unwrap();
        table.put(7, 200).unwrap();
        assert_eq!(table.get(42), Some(100));
        assert_eq!(table.get(7), Some(200));
        assert_eq!(table.get(99), None);
        crate::heap::unlink(&path).unwrap();
    }

    #[test]
    fn struct_by_value_keys_use_deep_equality() {
        let (path, heap) = test_heap();
        let spec = Rc::new(FieldSpec::builder().primitive(0, 8).primitive(8, 8).build());
        let mut table: HashTable<u64> = HashTable::new(
            &heap,
            KeyKind::StructByValue {
                spec,
                size: 16,
                immutable: true,
            },
        )
        .unwrap();

        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        unsafe {
            heap.write(a, 16).unwrap().copy_from_slice(&[1i64.to_le_bytes(), 2i64.to_le_bytes()].concat());
            heap.write(b, 16).unwrap().copy_from_slice(&[1i64.to_le_bytes(), 2i64.to_le_bytes()].concat());
        }

        table.put(a as u64, 99).unwrap();
        // `b` is a distinct allocation with the same deep value.
        assert_eq!(table.get(b as u64), Some(99));

        crate::heap::unlink(&path).unwrap();
    }

    #[test]
    fn mutable_struct_value_key_is_rejected() {
        let (path, heap) = test_heap();
        let spec = Rc::new(FieldSpec::builder().primitive(0, 8).build());
        let result: Result<HashTable<u64>> = HashTable::new(
            &heap,
            KeyKind::StructByValue {
                spec,
                size: 8,
                immutable: false,
            },
        );
        assert!(matches!(result, Err(Error::NonHashableKey(_))));
        crate::heap::unlink(&path).unwrap();
    }

    /// A second handle built from `as_raw()` sees entries the first handle
    /// put, the way a reattaching process would.
    #[test]
    fn from_pointer_sees_existing_entries() {
        let (path, heap) = test_heap();
        let mut table: HashTable<u64> = HashTable::new(&heap, KeyKind::Primitive).unwrap();
        table.put(1, 10).unwrap();
        table.put(2, 20).unwrap();

        let offset = table.as_raw();
        let second: HashTable<u64> = unsafe { HashTable::from_pointer(&heap, KeyKind::Primitive, offset) };
        assert_eq!(second.get(1), Some(10));
        assert_eq!(second.get(2), Some(20));
        assert_eq!(second.len(), 2);

        crate::heap::unlink(&path).unwrap();
    }
}
