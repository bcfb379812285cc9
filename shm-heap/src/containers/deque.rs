// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `Deque`: a `ResizableList` whose `items` buffer is read as a ring
//! buffer. Logical index `i` maps to physical `(offset + i) mod size`.

use super::{allocate_list, read_header, read_slot, write_header, write_slot, ListHeader};
use crate::convert::Converter;
use crate::error::{Error, Result};
use crate::heap::Heap;

pub struct Deque<'h, C: Converter> {
    heap: &'h Heap,
    header_offset: usize,
    converter: C,
}

impl<'h, C: Converter> Deque<'h, C> {
    pub fn new(heap: &'h Heap, converter: C) -> Result<Self> {
        let header_offset = allocate_list(heap, 0)?;
        Ok(Deque {
            heap,
            header_offset,
            converter,
        })
    }

    /// Reattaches to a deque a prior `new` call built, at the offset its
    /// `as_raw()`/`header_offset()` returned.
    pub fn from_pointer(heap: &'h Heap, converter: C, header_offset: usize) -> Self {
        Deque {
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

    fn physical(&self, header: &ListHeader, logical_index: usize) -> usize {
        ((header.offset as usize + logical_index) % header.size.max(1) as usize) as usize
    }

    pub fn get(&self, index: usize) -> Result<C::Host> {
        let header = read_header(self.heap, self.header_offset);
        if index as i64 >= header.length {
            return Err(Error::KeyNotFound);
        }
        let phys = self.physical(&header, index);
        let raw = read_slot(self.heap, header.items as usize, phys);
        self.converter.from_heap(self.heap, raw)
    }

    /// Linearizes the ring into a fresh, larger buffer: copies in logical
    /// order starting at physical index 0 and resets `offset` to `0`. This
    /// is what keeps `(offset + i) mod size` valid immediately after a
    /// resize instead of having to carry the old wraparound forward.
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
            let phys = self.physical(&header, i);
            let raw = read_slot(self.heap, header.items as usize, phys);
            write_slot(self.heap, new_items, i, raw)?;
        }
        write_header(
            self.heap,
            self.header_offset,
            ListHeader {
                size: new_capacity as i64,
                offset: 0,
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
        let phys = self.physical(&header, header.length as usize);
        let raw = self.converter.to_heap(self.heap, value)?;
        write_slot(self.heap, header.items as usize, phys, raw)?;
        write_header(
            self.heap,
            self.header_offset,
            ListHeader {
                length: header.length + 1,
                ..header
            },
        )
    }

    /// Pops the oldest element. If the item type is pointer-backed, the
    /// vacated slot is cleared to `0`/NUL so a conservative GC scan never
    /// treats stale ring bytes as a root-reachable edge.
    pub fn pop_left(&self) -> Result<C::Host> {
        let header = read_header(self.heap, self.header_offset);
        if header.length == 0 {
            return Err(Error::KeyNotFound);
        }
        let phys = self.physical(&header, 0);
        let raw = read_slot(self.heap, header.items as usize, phys);
        let value = self.converter.from_heap(self.heap, raw)?;
        write_slot(self.heap, header.items as usize, phys, 0)?;
        let new_offset = (header.offset as usize + 1) % header.size.max(1) as usize;
        write_header(
            self.heap,
            self.header_offset,
            ListHeader {
                length: header.length - 1,
                offset: new_offset as i64,
                ..header
            },
        )?;
        Ok(value)
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
        let path = CString::new(format!("/shm-heap-deque-{}-{}", std::process::id(), n)).unwrap();
        let base = 0x0000_7000_0000_0000usize + (n as usize) * 0x1000_0000;
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
    fn from_pointer_reattaches_and_continues_appending() {
        let (path, heap) = test_heap();
        let deque = Deque::new(&heap, Primitive::<i64>::default()).unwrap();
        deque.append(&1).unwrap();
        deque.append(&2).unwrap();

        let offset = deque.as_raw();
        let reattached = Deque::from_pointer(&heap, Primitive::<i64>::default(), offset);
        assert_eq!(reattached.len(), 2);
        reattached.append(&3).unwrap();

        let values: Vec<i64> = deque.iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);
        crate::heap::unlink(&path).unwrap();
    }

    /// Append 1,2,3,4; size==4, offset==0; pop_left()==1; append(5); logical
    /// iteration yields [2,3,4,5].
    #[test]
    fn s1_ring_arithmetic() {
        let (path, heap) = test_heap();
        let deque = Deque::new(&heap, Primitive::<i64>::default()).unwrap();
        for v in [1i64, 2, 3, 4] {
            deque.append(&v).unwrap();
        }
        let header = read_header(&heap, deque.header_offset());
        assert_eq!(header.size, 4);
        assert_eq!(header.offset, 0);

        assert_eq!(deque.pop_left().unwrap(), 1);
        deque.append(&5).unwrap();

        let values: Vec<i64> = deque.iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![2, 3, 4, 5]);
        crate::heap::unlink(&path).unwrap();
    }

    #[test]
    fn ring_invariants_hold_after_mixed_ops() {
        let (path, heap) = test_heap();
        let deque = Deque::new(&heap, Primitive::<i64>::default()).unwrap();
        let mut model: std::collections::VecDeque<i64> = std::collections::VecDeque::new();
        let ops: &[(&str, i64)] = &[
            ("push", 1),
            ("push", 2),
            ("pop", 0),
            ("push", 3),
            ("push", 4),
            ("push", 5),
            ("pop", 0),
            ("pop", 0),
        ];
        for (op, v) in ops {
            match *op {
                "push" => {
                    deque.append(v).unwrap();
                    model.push_back(*v);
                }
                "pop" => {
                    let got = deque.pop_left().unwrap();
                    let want = model.pop_front().unwrap();
                    assert_eq!(got, want);
                }
                _ => unreachable!(),
            }
        }
        let header = read_header(&heap, deque.header_offset());
        assert!(header.offset >= 0 && (header.offset as usize) < header.size as usize);
        assert!(header.length <= header.size);
        assert_eq!(deque.len(), model.len());
        crate::heap::unlink(&path).unwrap();
    }
}
