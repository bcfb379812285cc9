// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sizing configuration for a [`Heap`](crate::heap::Heap).
//!
//! Every size decision (arena size, root table capacity, RW sub-arena size,
//! the fixed mapping address) is threaded through this struct rather than
//! hardcoded, so tests can build small heaps without touching the production
//! constants.

/// The default fixed virtual address every production heap maps at.
///
/// Chosen well away from typical `mmap`/heap/stack placement on 64-bit Linux.
/// Tests that create multiple heaps in one process must override this with
/// [`HeapConfigBuilder::base_addr`] so the mappings don't collide.
pub const DEFAULT_BASE_ADDR: usize = 0x0000_1000_0000_0000;

/// Default size of the GC-managed object arena.
pub const DEFAULT_ARENA_SIZE: usize = 64 * 1024 * 1024; // 64 MiB

/// Default size of the bump-allocated RW sub-arena (mutex storage only).
pub const DEFAULT_RW_ARENA_SIZE: usize = 256 * 1024; // 256 KiB

/// Default number of slots in the root table.
pub const DEFAULT_ROOT_CAPACITY: usize = 4096;

/// Slack past the end of the configured arena that layout arithmetic is
/// allowed to land in before [`crate::heap::Heap::init`] treats it as a
/// configuration error. There is no fixed-offset library image here, so
/// `init` asserts that the arena, the RW sub-arena and
/// [`HeapInfo`](crate::heap::layout::HeapInfo) all land inside the mapped
/// region rather than checking linker-provided addresses.
pub const ARENA_GUARD_WINDOW: usize = 4096;

/// Sizing configuration for a [`Heap`](crate::heap::Heap).
///
/// Construct with [`HeapConfig::builder`]; every field has a production
/// default so `HeapConfig::builder().build()` is a valid, if minimal, config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    pub(crate) base_addr: usize,
    pub(crate) arena_size: usize,
    pub(crate) rw_arena_size: usize,
    pub(crate) root_capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            base_addr: DEFAULT_BASE_ADDR,
            arena_size: DEFAULT_ARENA_SIZE,
            rw_arena_size: DEFAULT_RW_ARENA_SIZE,
            root_capacity: DEFAULT_ROOT_CAPACITY,
        }
    }
}

impl HeapConfig {
    /// Starts a builder seeded with production defaults.
    pub fn builder() -> HeapConfigBuilder {
        HeapConfigBuilder {
            config: HeapConfig::default(),
        }
    }

    /// Total size of the backing file: arena followed by the RW sub-arena
    /// followed by the [`HeapInfo`](crate::heap::layout::HeapInfo) page.
    pub fn total_size(&self) -> usize {
        crate::heap::layout::total_size(self)
    }
}

/// Builder for [`HeapConfig`].
#[derive(Debug, Clone)]
pub struct HeapConfigBuilder {
    config: HeapConfig,
}

impl HeapConfigBuilder {
    /// Overrides the fixed mapping address. Tests that map more than one
    /// heap in a single process must give each a distinct, non-overlapping
    /// address.
    pub fn base_addr(mut self, addr: usize) -> Self {
        self.config.base_addr = addr;
        self
    }

    /// Overrides the GC arena size.
    pub fn arena_size(mut self, size: usize) -> Self {
        self.config.arena_size = size;
        self
    }

    /// Overrides the RW sub-arena size.
    pub fn rw_arena_size(mut self, size: usize) -> Self {
        self.config.rw_arena_size = size;
        self
    }

    /// Overrides the root table capacity.
    pub fn root_capacity(mut self, capacity: usize) -> Self {
        self.config.root_capacity = capacity;
        self
    }

    /// Finalizes the configuration.
    pub fn build(self) -> HeapConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let cfg = HeapConfig::default();
        assert!(cfg.total_size() > cfg.arena_size);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = HeapConfig::builder()
            .base_addr(0x7f00_0000_0000)
            .arena_size(4096)
            .rw_arena_size(4096)
            .root_capacity(8)
            .build();
        assert_eq!(cfg.base_addr, 0x7f00_0000_0000);
        assert_eq!(cfg.arena_size, 4096);
        assert_eq!(cfg.rw_arena_size, 4096);
        assert_eq!(cfg.root_capacity, 8);
    }
}
