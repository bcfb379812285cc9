// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `ImmutableList`, `FixedSizeList` and `ResizableList`: the three list
//! variants sharing the `{size, length, offset, items}` header.

use super::{allocate_list, read_header, read_slot, write_header, write_slot};
use crate::convert::Converter;
use crate::error::{Error, Result};
use crate::heap::Heap;

/// Built once from an iterator and never mutated afterward. `offset` is
/// always `0` for a plain list (only [`super::deque::Deque`] uses it).
pub struct ImmutableList<'h, C: Converter> {
    heap: &'h Heap,
    header_offset: usize,
    converter: C,
}

impl<'h, C: Converter> ImmutableList<'h, C> {
    pub fn from_values(heap: &'h Heap, converter: C, values: &[C::Host]) -> Result<Self> {
        let header_offset = allocate_list(heap, values.len())?;
        let header = read_header(heap, header_offset);
        for (i, v) in values.iter().enumerate() {
            let raw = converter.to_heap(heap, v)?;
            write_slot(heap, header.items as usize, i, raw)?;
        }
        write_header(
            heap,
            header_offset,
            super::ListHeader {
                length: values.len() as i64,
                ..header
            },
        )?;
        Ok(ImmutableList {
            heap,
            header_offset,
            converter,
        })
    }

    /// Reattaches to a list a prior `from_values` call built, at the offset
    /// its `as_raw()`/`header_offset()` returned. Does not re-validate the
    /// header; a mismatched `C` reads nonsense rather than failing loudly.
    pub fn from_pointer(heap: &'h Heap, converter: C, header_offset: usize) -> Self {
        ImmutableList {
            heap,
            header_offset,
            converter,
        }
    }

    pub fn header_offset(&self) -> usize {
        self.header_offset
    }

    pub fn as_raw(&self) -> usize {
        self.header_offset
    }

    pub fn len(&self) -> usize {
        read_header(self.heap, self.header_offset).length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Result<C::Host> {
        let header = read_header(self.heap, self.header_offset);
        if index as i64 >= header.length {
            return Err(Error::KeyNotFound);
        }
        let raw = read_slot(self.heap, header.items as usize, index);
        self.converter.from_heap(self.heap, raw)
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<C::Host>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

/// Same layout as [`ImmutableList`], with in-place element replacement but
/// a length fixed at construction.
pub struct FixedSizeList<'h, C: Converter> {
    inner: ImmutableList<'h, C>,
}

impl<'h, C: Converter> FixedSizeList<'h, C> {
    pub fn from_values(heap: &'h Heap, converter: C, values: &[C::Host]) -> Result<Self> {
        Ok(FixedSizeList {
            inner: ImmutableList::from_values(heap, converter, values)?,
        })
    }

    /// Reattaches to a fixed-size list a prior `from_values` call built.
    pub fn from_pointer(heap: &'h Heap, converter: C, header_offset: usize) -> Self {
        FixedSizeList {
            inner: ImmutableList::from_pointer(heap, converter, header_offset),
        }
    }

    pub fn as_raw(&self) -> usize {
        self.inner.header_offset()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<C::Host> {
        self.inner.get(index)
    }

    pub fn set(&self, index: usize, value: &C::Host) -> Result<()> {
        let header = read_header(self.inner.heap, self.inner.header_offset);
        if index as i64 >= header.length {
            return Err(Error::KeyNotFound);
        }
        let raw = self.inner.converter.to_heap(self.inner.heap, value)?;
        write_slot(self.inner.heap, header.items as usize, index, raw)
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<C::Host>> + '_ {
        self.inner.iter()
    }
}

/// Appendable list with amortized-doubling capacity, via `heap.allocate`
/// (never in-place `realloc`: the GC arena has no realloc primitive, so
/// growth allocates a fresh buffer and copies, same as `Vec`'s own grow
/// strategy over a non-resizing allocator).
pub struct ResizableList<'h, C: Converter> {
    heap: &'h Heap,
    header_offset: usize,
    converter: C,
}

impl<'h, C: Converter> ResizableList<'h, C> {
    pub fn new(heap: &'h Heap, converter: C) -> Result<Self> {
        let header_offset = allocate_list(heap, 0)?;
        Ok(ResizableList {
            heap,
            header_offset,
            converter,
        })
    }

    /// Reattaches to a resizable list a prior `new` call built, at the
    /// offset its `as_raw()`/`header_offset()` returned.
    pub fn from_pointer(heap: &'h Heap, converter: C, header_offset: usize) -> Self {
        ResizableList {
            heap,
            header_offset,
            converter,
        }
    }

    pub fn header_offset(&self) -> usize {
        self.header_offset
    }

    pub fn as_raw(&self) -> usize {
        self.header_offset
    }

    pub fn len(&self) -> usize {
        read_header(self.heap, self.header_offset).length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Result<C::Host> {
        let header = read_header(self.heap, self.header_offset);
        if index as i64 >= header.length {
            return Err(Error::KeyNotFound);
        }
        let raw = read_slot(self.heap, header.items as usize, index);
        self.converter.from_heap(self.heap, raw)
    }

    fn grow(&self, min_capacity: usize) -> Result<()> {
        let header = read_header(self.heap, self.header_offset);
        let mut new_capacity = if header.size == 0 {
            1
        } else {
            header.size as usize * 2
        };
        while new_capacity < min_capacity {
            new_capacity *= 2;
        }
        let new_items = self.heap.allocate_array(new_capacity, 8)?;
        for i in 0..header.length as usize {
            let raw = read_slot(self.heap, header.items as usize, i);
            write_slot(self.heap, new_items, i, raw)?;
        }
        write_header(
            self.heap,
            self.header_offset,
            super::ListHeader {
                size: new_capacity as i64,
                items: new_items as i64,
                ..header
            },
        )
    }

    pub fn append(&self, value: &C::Host) -> Result<()> {
        let mut header = read_header(self.heap, self.header_offset);
        if header.length >= header.size {
            self.grow((header.length + 1) as usize)?;
            header = read_header(self.heap, self.header_offset);
        }
        let raw = self.converter.to_heap(self.heap, value)?;
        write_slot(self.heap, header.items as usize, header.length as usize, raw)?;
        write_header(
            self.heap,
            self.header_offset,
            super::ListHeader {
                length: header.length + 1,
                ..header
            },
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<C::Host>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;
    use crate::convert::Primitive;
    use std::ffi::CString;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn test_heap() -> (CString, Heap) {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = CString::new(format!("/shm-heap-list-{}-{}", std::process::id(), n)).unwrap();
        let base = 0x0000_6000_0000_0000usize + (n as usize) * 0x1000_0000;
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
    fn immutable_list_iterates_in_order() {
        let (path, heap) = test_heap();
        let list = ImmutableList::from_values(&heap, Primitive::<i64>::default(), &[10, 20, 30]).unwrap();
        let values: Vec<i64> = list.iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![10, 20, 30]);
        crate::heap::unlink(&path).unwrap();
    }

    #[test]
    fn from_pointer_reattaches_to_same_elements() {
        let (path, heap) = test_heap();
        let list = ImmutableList::from_values(&heap, Primitive::<i64>::default(), &[1, 2, 3]).unwrap();
        let offset = list.as_raw();
        let reattached = ImmutableList::from_pointer(&heap, Primitive::<i64>::default(), offset);
        let values: Vec<i64> = reattached.iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);
        crate::heap::unlink(&path).unwrap();
    }

    #[test]
    fn fixed_size_list_set_replaces_element() {
        let (path, heap) = test_heap();
        let list = FixedSizeList::from_values(&heap, Primitive::<i64>::default(), &[1, 2, 3]).unwrap();
        list.set(1, &99).unwrap();
        assert_eq!(list.get(1).unwrap(), 99);
        crate::heap::unlink(&path).unwrap();
    }

    #[test]
    fn resizable_list_append_grows_capacity() {
        let (path, heap) = test_heap();
        let list = ResizableList::new(&heap, Primitive::<i64>::default()).unwrap();
        for i in 0..10 {
            list.append(&i).unwrap();
        }
        assert_eq!(list.len(), 10);
        let values: Vec<i64> = list.iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
        crate::heap::unlink(&path).unwrap();
    }
}
