// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `Dict` and `DefaultDict`: typed facades over [`crate::hashtable::HashTable`]
//! choosing a key discipline per key type.

use crate::convert::Converter;
use crate::error::{Error, Result};
use crate::hashtable::{HashTable, KeyKind};
use crate::heap::Heap;

/// A dictionary whose key discipline (`KeyKind`) determines whether keys
/// are copied (strings) or borrowed in place (structs, primitives).
pub struct Dict<'h, K: Converter, V: Converter>
where
    V::Host: Copy,
{
    table: HashTable<'h, u64>,
    key_converter: K,
    value_converter: V,
}

impl<'h, K: Converter<Host = u64>, V: Converter> Dict<'h, K, V>
where
    V::Host: Copy,
{
    /// `key_converter` here only needs to turn a host key into its raw
    /// `u64` representation (an already-allocated string/struct offset, or
    /// an inline primitive); the *table*'s [`KeyKind`] governs hashing and
    /// equality, and string keys are copied by [`HashTable::put`] itself.
    pub fn new(heap: &'h Heap, kind: KeyKind, key_converter: K, value_converter: V) -> Result<Self> {
        Ok(Dict {
            table: HashTable::new(heap, kind)?,
            key_converter,
            value_converter,
        })
    }

    /// Reattaches to a dict a prior `new` call built, at the offset its
    /// `as_raw()` returned.
    ///
    /// # Safety
    /// See [`HashTable::from_pointer`]: `header_offset` must come from this
    /// same dict's `as_raw()`, and only the writer that built it may mutate
    /// through the result.
    pub unsafe fn from_pointer(
        heap: &'h Heap,
        kind: KeyKind,
        header_offset: usize,
        key_converter: K,
        value_converter: V,
    ) -> Self {
        Dict {
            table: HashTable::from_pointer(heap, kind, header_offset),
            key_converter,
            value_converter,
        }
    }

    pub fn as_raw(&self) -> usize {
        self.table.as_raw()
    }

    pub fn contains_key(&self, heap: &Heap, key: &K::Host) -> Result<bool> {
        let raw_key = self.key_converter.to_heap(heap, key)?;
        Ok(self.table.exists(raw_key))
    }

    pub fn get(&self, heap: &Heap, key: &K::Host) -> Result<V::Host> {
        let raw_key = self.key_converter.to_heap(heap, key)?;
        let raw_value = self.table.get(raw_key).ok_or(Error::KeyNotFound)?;
        self.value_converter.from_heap(heap, raw_value)
    }

    pub fn set(&mut self, heap: &Heap, key: &K::Host, value: &V::Host) -> Result<()> {
        let raw_key = self.key_converter.to_heap(heap, key)?;
        let raw_value = self.value_converter.to_heap(heap, value)?;
        self.table.put(raw_key, raw_value)
    }

    pub fn delete(&mut self, heap: &Heap, key: &K::Host) -> Result<()> {
        let raw_key = self.key_converter.to_heap(heap, key)?;
        self.table.delete(raw_key)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Snapshot of every key's raw representation, decoded through
    /// `key_converter`.
    pub fn keys(&self, heap: &Heap) -> Result<Vec<K::Host>> {
        self.table
            .keys()
            .into_iter()
            .map(|k| self.key_converter.from_heap(heap, k))
            .collect()
    }
}

/// Wraps a [`Dict`] with a zero-argument factory invoked on a missing-key
/// read: the read installs the produced value and returns it, restating a
/// `__missing__`-style default as a sum-type result plus local factory
/// invocation rather than exception-based control flow.
pub struct DefaultDict<'h, K: Converter<Host = u64>, V: Converter, F>
where
    V::Host: Copy,
    F: Fn() -> V::Host,
{
    dict: Dict<'h, K, V>,
    factory: F,
}

impl<'h, K: Converter<Host = u64>, V: Converter, F> DefaultDict<'h, K, V, F>
where
    V::Host: Copy,
    F: Fn() -> V::Host,
{
    pub fn new(heap: &'h Heap, kind: KeyKind, key_converter: K, value_converter: V, factory: F) -> Result<Self> {
        Ok(DefaultDict {
            dict: Dict::new(heap, kind, key_converter, value_converter)?,
            factory,
        })
    }

    pub fn contains_key(&self, heap: &Heap, key: &K::Host) -> Result<bool> {
        self.dict.contains_key(heap, key)
    }

    /// Reads `key`, invoking the factory and installing its result if
    /// absent. Only triggers the factory on a genuine miss, never on a hit.
    pub fn get_or_insert(&mut self, heap: &Heap, key: &K::Host) -> Result<V::Host>
    where
        K::Host: Clone,
    {
        match self.dict.get(heap, key) {
            Ok(v) => Ok(v),
            Err(Error::KeyNotFound) => {
                let value = (self.factory)();
                self.dict.set(heap, key, &value)?;
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;
    use crate::convert::{Primitive, StringConverter};
    use crate::fieldspec::FieldSpec;
    use std::ffi::CString;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn test_heap() -> (CString, Heap) {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = CString::new(format!("/shm-heap-dict-{}-{}", std::process::id(), n)).unwrap();
        let base = 0x0000_8000_0000_0000usize + (n as usize) * 0x1000_0000;
        let config = HeapConfig::builder()
            .base_addr(base)
            .arena_size(1 << 20)
            .rw_arena_size(4096)
            .root_capacity(64)
            .build();
        let heap = Heap::init(&path, config).unwrap();
        (path, heap)
    }

    struct StringKeyConverter;
    impl Converter for StringKeyConverter {
        type Host = u64;
        fn to_heap(&self, _heap: &Heap, value: &u64) -> Result<u64> {
            Ok(*value)
        }
        fn from_heap(&self, _heap: &Heap, raw: u64) -> Result<u64> {
            Ok(raw)
        }
    }

    /// A string-to-long dict with two entries, checking value lookups and
    /// sorted key iteration.
    #[test]
    fn s2_string_to_long_dict() {
        let (path, heap) = test_heap();
        let mut dict: Dict<StringKeyConverter, Primitive<i64>> = Dict::new(
            &heap,
            KeyKind::String,
            StringKeyConverter,
            Primitive::default(),
        )
        .unwrap();

        let hello = heap.allocate_string("hello").unwrap() as u64;
        let world = heap.allocate_string("world").unwrap() as u64;
        dict.set(&heap, &hello, &1).unwrap();
        dict.set(&heap, &world, &2).unwrap();

        assert_eq!(dict.get(&heap, &hello).unwrap(), 1);
        assert_eq!(dict.get(&heap, &world).unwrap(), 2);

        let string_conv = StringConverter;
        let mut names: Vec<String> = dict
            .keys(&heap)
            .unwrap()
            .into_iter()
            .map(|off| string_conv.from_heap(&heap, off).unwrap().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["hello".to_string(), "world".to_string()]);

        crate::heap::unlink(&path).unwrap();
    }

    /// A dict keyed by deep struct value: two distinct allocations with the
    /// same field values hash and compare equal as keys.
    #[test]
    fn s3_deep_key_struct_dict() {
        let (path, heap) = test_heap();
        let spec = Rc::new(FieldSpec::builder().primitive(0, 8).primitive(8, 8).build());
        let mut dict: Dict<StringKeyConverter, Primitive<i64>> = Dict::new(
            &heap,
            KeyKind::StructByValue {
                spec,
                size: 16,
                immutable: true,
            },
            StringKeyConverter,
            Primitive::default(),
        )
        .unwrap();

        let make_point = |x: i64, y: i64| {
            let off = heap.allocate(16).unwrap();
            unsafe {
                heap.write(off, 16)
                    .unwrap()
                    .copy_from_slice(&[x.to_le_bytes(), y.to_le_bytes()].concat());
            }
            off as u64
        };

        let p1 = make_point(1, 2);
        dict.set(&heap, &p1, &1).unwrap();

        let p1_again = make_point(1, 2); // distinct allocation, same deep value
        assert_eq!(dict.get(&heap, &p1_again).unwrap(), 1);

        let p2 = make_point(1, 3);
        assert!(matches!(dict.get(&heap, &p2), Err(Error::KeyNotFound)));

        crate::heap::unlink(&path).unwrap();
    }

    /// Defaultdict factory fires only on a miss, not on a pure lookup of a
    /// key the factory has already filled in.
    /// A dict reachable only through the root table keeps its entries (and
    /// keeps working at all) across a `collect()` -- the hashbrown bucket
    /// array backing it is itself heap-allocated, and the conservative
    /// scanner must trace into it the same as any other reachable object.
    #[test]
    fn rooted_dict_survives_collection() {
        let (path, heap) = test_heap();
        let mut dict: Dict<StringKeyConverter, Primitive<i64>> = Dict::new(
            &heap,
            KeyKind::String,
            StringKeyConverter,
            Primitive::default(),
        )
        .unwrap();

        let hello = heap.allocate_string("hello").unwrap() as u64;
        dict.set(&heap, &hello, &1).unwrap();

        let root = heap.root_add(dict.as_raw()).unwrap();
        heap.collect().unwrap();

        assert_eq!(dict.get(&heap, &hello).unwrap(), 1);
        drop(root);
        crate::heap::unlink(&path).unwrap();
    }

    #[test]
    fn s6_defaultdict_factory_fires_only_on_miss() {
        let (path, heap) = test_heap();
        let mut dict: DefaultDict<StringKeyConverter, Primitive<i64>, _> = DefaultDict::new(
            &heap,
            KeyKind::String,
            StringKeyConverter,
            Primitive::default(),
            || 42i64,
        )
        .unwrap();

        let x = heap.allocate_string("x").unwrap() as u64;
        assert_eq!(dict.get_or_insert(&heap, &x).unwrap(), 42);
        assert!(dict.contains_key(&heap, &x).unwrap());

        let y = heap.allocate_string("y").unwrap() as u64;
        assert!(!dict.contains_key(&heap, &y).unwrap());

        crate::heap::unlink(&path).unwrap();
    }

    /// A reader that only knows the offset `as_raw()` returned sees the same
    /// entries, the way a forked reader attaching to an existing dict would.
    #[test]
    fn reader_reattaches_via_as_raw_and_sees_existing_entries() {
        let (path, heap) = test_heap();
        let mut writer: Dict<StringKeyConverter, Primitive<i64>> = Dict::new(
            &heap,
            KeyKind::String,
            StringKeyConverter,
            Primitive::default(),
        )
        .unwrap();

        let hello = heap.allocate_string("hello").unwrap() as u64;
        writer.set(&heap, &hello, &7).unwrap();

        let offset = writer.as_raw();
        let reader: Dict<StringKeyConverter, Primitive<i64>> = unsafe {
            Dict::from_pointer(
                &heap,
                KeyKind::String,
                offset,
                StringKeyConverter,
                Primitive::default(),
            )
        };
        assert_eq!(reader.get(&heap, &hello).unwrap(), 7);
        assert_eq!(reader.len(), 1);

        crate::heap::unlink(&path).unwrap();
    }
}
