// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Byte-exact layout of the mapped heap image.
//!
//! ```text
//! +-------------------------------+---------------+-------------+----------+
//! |  GC arena (metadata + object   |  RW sub-arena |  root table | HeapInfo |
//! |  space, see heap::gc)          |  (heap::rw_arena) | (heap::root_table) | |
//! +-------------------------------+---------------+-------------+----------+
//! 0                          arena_size      +rw_size     +root_bytes  total
//! ```
//!
//! Every sub-region's size is derived from [`HeapConfig`], never hardcoded,
//! so a test heap and a production heap share the same layout code.

use crate::config::HeapConfig;

/// Magic cookie written into [`HeapInfo::magic`] by [`init`](crate::heap::Heap::init).
/// `open_readonly` rejects any mapping whose header does not carry this value.
pub const MAGIC: u64 = 0x5348_4d48_4541_5031; // "SHMHEAP1" in ASCII, read little-endian.

/// Size in bytes of a root-table slot (a raw heap offset, 0 meaning empty).
pub const ROOT_SLOT_SIZE: usize = 8;

/// The singleton record living at [`heap_info_offset`], identical for every
/// process that has the region mapped.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HeapInfo {
    /// Must equal [`MAGIC`] for the mapping to be considered valid.
    pub magic: u64,
    /// Offset, from the mapping base, of the NUL-terminated backing-file path
    /// string stored in the GC arena (0 before `init` has stored it).
    pub path_offset: u64,
    /// Offset, from the mapping base, of the RW sub-arena.
    pub rwmem_offset: u64,
    /// Size in bytes of the RW sub-arena.
    pub rwmem_size: u64,
}

pub const HEAP_INFO_SIZE: usize = std::mem::size_of::<HeapInfo>();

/// Offset of the RW sub-arena from the mapping base.
pub fn rw_arena_offset(cfg: &HeapConfig) -> usize {
    cfg.arena_size
}

/// Offset of the root table from the mapping base.
pub fn root_table_offset(cfg: &HeapConfig) -> usize {
    rw_arena_offset(cfg) + cfg.rw_arena_size
}

/// Size in bytes of the root table region.
pub fn root_table_bytes(cfg: &HeapConfig) -> usize {
    cfg.root_capacity * ROOT_SLOT_SIZE
}

/// Offset of the [`HeapInfo`] singleton from the mapping base.
pub fn heap_info_offset(cfg: &HeapConfig) -> usize {
    root_table_offset(cfg) + root_table_bytes(cfg)
}

/// Total size of the backing file / mapping.
pub fn total_size(cfg: &HeapConfig) -> usize {
    heap_info_offset(cfg) + HEAP_INFO_SIZE
}
