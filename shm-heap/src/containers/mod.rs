// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed containers: thin facades over [`crate::heap::Heap`] and
//! [`crate::hashtable::HashTable`] that compose [`crate::convert::Converter`]
//! calls to move host values in and out of shared memory.

pub mod deque;
pub mod dict;
pub mod list;
pub mod set;
pub mod struct_;

use crate::error::Result;
use crate::heap::Heap;

/// The four `{size, length, offset, items}` words every list-shaped
/// container (`ImmutableList`, `FixedSizeList`, `ResizableList`, `Deque`)
/// shares.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct ListHeader {
    pub size: i64,
    pub length: i64,
    pub offset: i64,
    pub items: i64,
}

pub(crate) const HEADER_SIZE: usize = std::mem::size_of::<ListHeader>();
const SLOT_SIZE: usize = 8;

pub(crate) fn read_header(heap: &Heap, header_offset: usize) -> ListHeader {
    let bytes = unsafe { heap.read(header_offset, HEADER_SIZE) };
    ListHeader {
        size: i64::from_le_bytes(bytes[0..8].try_into().unwrap()),
        length: i64::from_le_bytes(bytes[8..16].try_into().unwrap()),
        offset: i64::from_le_bytes(bytes[16..24].try_into().unwrap()),
        items: i64::from_le_bytes(bytes[24..32].try_into().unwrap()),
    }
}

pub(crate) fn write_header(heap: &Heap, header_offset: usize, header: ListHeader) -> Result<()> {
    unsafe {
        let bytes = heap.write(header_offset, HEADER_SIZE)?;
        bytes[0..8].copy_from_slice(&header.size.to_le_bytes());
        bytes[8..16].copy_from_slice(&header.length.to_le_bytes());
        bytes[16..24].copy_from_slice(&header.offset.to_le_bytes());
        bytes[24..32].copy_from_slice(&header.items.to_le_bytes());
    }
    Ok(())
}

/// Allocates a fresh header plus an `items` buffer of `capacity` 8-byte
/// slots (zero-initialized, `length`/`offset` both `0`).
pub(crate) fn allocate_list(heap: &Heap, capacity: usize) -> Result<usize> {
    let header_offset = heap.allocate(HEADER_SIZE)?;
    let items_offset = if capacity == 0 {
        0
    } else {
        heap.allocate_array(capacity, SLOT_SIZE)?
    };
    write_header(
        heap,
        header_offset,
        ListHeader {
            size: capacity as i64,
            length: 0,
            offset: 0,
            items: items_offset as i64,
        },
    )?;
    Ok(header_offset)
}

pub(crate) fn read_slot(heap: &Heap, items_offset: usize, index: usize) -> u64 {
    let bytes = unsafe { heap.read(items_offset + index * SLOT_SIZE, SLOT_SIZE) };
    u64::from_le_bytes(bytes.try_into().unwrap())
}

pub(crate) fn write_slot(heap: &Heap, items_offset: usize, index: usize, value: u64) -> Result<()> {
    unsafe {
        heap.write(items_offset + index * SLOT_SIZE, SLOT_SIZE)?
            .copy_from_slice(&value.to_le_bytes());
    }
    Ok(())
}
