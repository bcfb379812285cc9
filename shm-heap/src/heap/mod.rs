// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The `Heap`: a fixed-address shared-memory mapping, a conservative
//! mark/sweep collector over its object arena, a bump-allocated sub-arena
//! for mutex storage, and the root table anchoring collection.

pub mod gc;
pub mod layout;
pub mod root_table;
pub mod rw_arena;

use crate::config::HeapConfig;
use crate::error::{Error, Result};
use crate::lock::{RwLock, RwLockState};
use gc::Gc;
use layout::HeapInfo;
use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use root_table::{RootHandle, RootTable};
use rw_arena::RwArena;
use std::ffi::CStr;
use std::num::NonZeroUsize;
use std::os::unix::io::RawFd;
use std::sync::Mutex as StdMutex;
use tracing::{debug, trace};

/// Which operations a process is permitted to perform against a mapped
/// heap.
///
/// A heap starts `Uninitialized`, becomes `Writer` in the process that
/// calls [`Heap::init`], and becomes `Reader` in every process that instead
/// calls [`Heap::open_readonly`]. The distinction is enforced at every
/// mutating entry point, not just at construction, because the same `Heap`
/// value never changes role after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Writer,
    Reader,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Writer => write!(f, "writer"),
            Role::Reader => write!(f, "reader"),
        }
    }
}

/// RAII guard returned by [`Heap::disable`]; re-enables garbage collection
/// when dropped. Nests: the collector stays disabled until every
/// outstanding `GcGuard` for a heap has been dropped.
pub struct GcGuard<'a> {
    heap: &'a Heap,
}

impl Drop for GcGuard<'_> {
    fn drop(&mut self) {
        self.heap.gc.lock().unwrap().enable();
    }
}

/// A mapped shared-memory heap.
///
/// Owns the mapping for its lifetime; `Drop` unmaps it (and, for a writer
/// that created a named backing file, does *not* unlink it -- the whole
/// point of a named heap is that other processes open it after this one
/// returns).
pub struct Heap {
    base: *mut u8,
    total_size: usize,
    config: HeapConfig,
    role: Role,
    gc: StdMutex<Gc>,
    root_table: RootTable,
    rw_arena: RwArena,
    _fd: RawFd,
}

// The mapping is shared memory by construction; every access this type
// performs through `base` already goes through `Gc`'s own bitmaps/free list
// (single-process synchronized by `gc`'s mutex) or the root table's
// single-word atomic-equivalent slot writes, or a `lock.rs` robust mutex for
// anything genuinely cross-process.
unsafe impl Send for Heap {}
unsafe impl Sync for Heap {}

impl Heap {
    /// Creates a brand new heap backed by the named POSIX shared memory
    /// object at `path`, maps it at `config.base_addr`, and returns a
    /// `Writer`-role handle.
    ///
    /// `path` must start with a `/` per `shm_open(3)`. Fails if the object
    /// already exists.
    pub fn init(path: &CStr, config: HeapConfig) -> Result<Heap> {
        let total_size = config.total_size();
        debug!(path = ?path, total_size, "creating shared-memory heap");

        let fd = shm_open(
            path.to_bytes(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|e| Error::MapFailed(std::io::Error::from(e)))?;
        ftruncate(fd, total_size as libc::off_t)
            .map_err(|e| Error::MapFailed(std::io::Error::from(e)))?;

        let base = map_fixed(fd, config.base_addr, total_size, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE)?;

        Self::assert_layout_fits_guard_window(&config, total_size)?;

        let gc = Gc::new(0, config.arena_size);
        let root_table = RootTable::new(layout::root_table_offset(&config), config.root_capacity);
        let rw_arena = RwArena::new(layout::rw_arena_offset(&config), config.rw_arena_size);

        let heap_info_off = layout::heap_info_offset(&config);
        unsafe {
            let info = base.add(heap_info_off) as *mut HeapInfo;
            (*info).magic = layout::MAGIC;
            (*info).path_offset = 0;
            (*info).rwmem_offset = rw_arena.offset() as u64;
            (*info).rwmem_size = rw_arena.size() as u64;
        }

        Ok(Heap {
            base,
            total_size,
            config,
            role: Role::Writer,
            gc: StdMutex::new(gc),
            root_table,
            rw_arena,
            _fd: fd,
        })
    }

    /// Opens an existing heap at `path` read-write is not permitted by this
    /// call; the returned handle is always `Reader`-role. `config` must
    /// match the `HeapConfig` the writer used to call `init`, since the
    /// layout cannot be derived from the mapped bytes alone until after the
    /// `HeapInfo` is read.
    pub fn open_readonly(path: &CStr, config: HeapConfig) -> Result<Heap> {
        let total_size = config.total_size();
        let fd = shm_open(path.to_bytes(), OFlag::O_RDWR, Mode::empty())
            .map_err(|e| Error::MapFailed(std::io::Error::from(e)))?;

        // Map the whole region read-only, then re-mark just the RW
        // sub-arena read-write: readers observe the object arena as
        // protected memory, but the mutexes living in the RW sub-arena
        // must stay writable in every attached process.
        let base = map_fixed(fd, config.base_addr, total_size, ProtFlags::PROT_READ)?;

        let heap_info_off = layout::heap_info_offset(&config);
        let info = unsafe { &*(base.add(heap_info_off) as *const HeapInfo) };
        if info.magic != layout::MAGIC {
            unsafe { _ = munmap(base as *mut std::ffi::c_void, total_size) };
            return Err(Error::BadBackingFile);
        }

        let gc = Gc::new(0, config.arena_size);
        let root_table = RootTable::new(layout::root_table_offset(&config), config.root_capacity);
        let rw_arena = RwArena::new(layout::rw_arena_offset(&config), config.rw_arena_size);

        unsafe {
            mprotect_range(
                base,
                rw_arena.offset(),
                rw_arena.size(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            )?;
        }

        Ok(Heap {
            base,
            total_size,
            config,
            role: Role::Reader,
            gc: StdMutex::new(gc),
            root_table,
            rw_arena,
            _fd: fd,
        })
    }

    /// Guards against the RW sub-arena, root table or `HeapInfo` landing
    /// outside the mapped region.
    fn assert_layout_fits_guard_window(config: &HeapConfig, total_size: usize) -> Result<()> {
        let end = layout::heap_info_offset(config) + layout::HEAP_INFO_SIZE;
        if end > total_size || total_size - end > crate::config::ARENA_GUARD_WINDOW {
            return Err(Error::BadBackingFile);
        }
        Ok(())
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    fn require_writer(&self, op: &'static str) -> Result<()> {
        if self.role != Role::Writer {
            return Err(Error::WrongRole(op));
        }
        Ok(())
    }

    /// Allocates `size` zero-initialized bytes from the GC arena. Writers
    /// only: a reader has no business mutating the heap's allocation state.
    pub fn allocate(&self, size: usize) -> Result<usize> {
        self.require_writer("allocate")?;
        let mut gc = self.gc.lock().unwrap();
        unsafe { gc.allocate(self.base, size) }
    }

    /// Allocates `count` contiguous elements of `elem_size` bytes, for
    /// array-like containers.
    pub fn allocate_array(&self, count: usize, elem_size: usize) -> Result<usize> {
        self.allocate(count * elem_size)
    }

    /// Allocates and copies an owned NUL-terminated string into the arena.
    pub fn allocate_string(&self, s: &str) -> Result<usize> {
        let bytes = s.as_bytes();
        let off = self.allocate(bytes.len() + 1)?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.add(off), bytes.len());
            *self.base.add(off + bytes.len()) = 0;
        }
        Ok(off)
    }

    /// Bump-allocates raw storage in the RW sub-arena (mutex state only;
    /// never reclaimed). Writers only.
    pub fn allocate_rw(&self, size: usize, align: usize) -> Result<usize> {
        self.require_writer("allocate_rw")?;
        self.rw_arena.allocate(size, align)
    }

    /// Initializes a fresh [`RwLock`] in the RW sub-arena and returns its
    /// offset. Writers only.
    pub fn new_rwlock(&self) -> Result<usize> {
        let off = self.allocate_rw(
            std::mem::size_of::<RwLockState>(),
            std::mem::align_of::<RwLockState>(),
        )?;
        unsafe { RwLock::init_at(self.base.add(off) as *mut RwLockState)? };
        Ok(off)
    }

    /// Opens a previously-initialized `RwLock` at `offset`.
    ///
    /// # Safety
    /// `offset` must have come from a prior [`Heap::new_rwlock`] call on
    /// this same backing file.
    pub unsafe fn rwlock_at(&self, offset: usize) -> RwLock<'_> {
        RwLock::from_raw(self.base.add(offset) as *mut RwLockState, offset)
    }

    /// Runs one mark/sweep collection cycle, rooted at the current root
    /// table contents. No-op while disabled. Writers only: a reader must
    /// never mutate allocator state.
    pub fn collect(&self) -> Result<()> {
        self.require_writer("collect")?;
        let roots = unsafe { self.root_table.live_roots(self.base) };
        let mut gc = self.gc.lock().unwrap();
        unsafe { gc.collect(self.base, &roots) };
        Ok(())
    }

    /// Suspends collection until the returned guard is dropped.
    pub fn disable(&self) -> GcGuard<'_> {
        self.gc.lock().unwrap().disable();
        GcGuard { heap: self }
    }

    pub fn total_collections(&self) -> u64 {
        self.gc.lock().unwrap().total_collections()
    }

    /// Adds `heap_offset` to the root table, returning a handle that
    /// releases the slot on drop.
    pub fn root_add(&self, heap_offset: usize) -> Result<RootHandle> {
        let index = unsafe { self.root_table.add(self.base, heap_offset)? };
        Ok(RootHandle::new(
            self.base,
            layout::root_table_offset(&self.config),
            self.config.root_capacity,
            index,
            heap_offset,
        ))
    }

    /// Downgrades the object arena's pages to no access, in either role --
    /// this asserts quiescence (nothing is touching the arena) rather than
    /// gating a permission. Locks, the root table and the RW sub-arena are
    /// untouched; only `[0, arena_size)` is affected.
    pub fn protect(&self) -> Result<()> {
        unsafe { mprotect_range(self.base, 0, self.config.arena_size, ProtFlags::PROT_NONE) }
    }

    /// Restores the object arena to its role-appropriate protection
    /// (read-write for a writer, read-only for a reader).
    pub fn unprotect(&self) -> Result<()> {
        let prot = match self.role {
            Role::Writer => ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            Role::Reader => ProtFlags::PROT_READ,
        };
        unsafe { mprotect_range(self.base, 0, self.config.arena_size, prot) }
    }

    /// Conservatively tests whether `offset` is exactly the start of a
    /// currently live allocation.
    pub fn is_heap_pointer(&self, offset: usize) -> bool {
        if offset >= self.total_size {
            return false;
        }
        let gc = self.gc.lock().unwrap();
        unsafe { gc.is_heap_pointer(self.base, offset) }
    }

    /// Raw read access to `len` bytes at `offset`. Any role may read.
    ///
    /// # Safety
    /// `offset + len` must not exceed `total_size`, and the caller is
    /// responsible for any aliasing/lifetime discipline beyond that -- this
    /// is the escape hatch [`crate::containers`] builds typed views on.
    pub unsafe fn read(&self, offset: usize, len: usize) -> &[u8] {
        std::slice::from_raw_parts(self.base.add(offset), len)
    }

    /// Raw write access to `len` bytes at `offset`. Writers only.
    ///
    /// # Safety
    /// Same preconditions as [`Heap::read`].
    pub unsafe fn write(&self, offset: usize, len: usize) -> Result<&mut [u8]> {
        self.require_writer("write")?;
        Ok(std::slice::from_raw_parts_mut(self.base.add(offset), len))
    }

    pub fn base_addr(&self) -> usize {
        self.base as usize
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        trace!(base = self.base as usize, "unmapping heap");
        unsafe { _ = munmap(self.base as *mut std::ffi::c_void, self.total_size) };
    }
}

fn map_fixed(fd: RawFd, base_addr: usize, len: usize, prot: ProtFlags) -> Result<*mut u8> {
    let addr = NonZeroUsize::new(base_addr);
    let len = NonZeroUsize::new(len).expect("heap total_size must be nonzero");
    let ptr = unsafe { mmap(addr, len, prot, MapFlags::MAP_SHARED | MapFlags::MAP_FIXED, fd, 0) }
        .map_err(|e| Error::MapFailed(std::io::Error::from(e)))?;
    Ok(ptr as *mut u8)
}

/// Changes protection on `[base+offset, base+offset+len)` via raw
/// `libc::mprotect` (the same direct-FFI posture `datadog-alloc` and
/// `crashtracker`'s guard-page setup use -- no `nix` wrapper is pulled in
/// just for this one call).
///
/// # Safety
/// `baseatom+offset..+len` must lie within the mapping and not be
/// concurrently accessed by this process in a way that would fault under
/// the new protection.
unsafe fn mprotect_range(base: *mut u8, offset: usize, len: usize, prot: ProtFlags) -> Result<()> {
    let page_size = page_size::get();
    let addr = base.add(offset);
    let aligned_addr = ((addr as usize) / page_size * page_size) as *mut libc::c_void;
    let drift = addr as usize - aligned_addr as usize;
    let rc = libc::mprotect(aligned_addr, len + drift, prot.bits());
    if rc != 0 {
        return Err(Error::MapFailed(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Removes the named shared memory backing a heap. Only the process that
/// knows no reader will ever open it again should call this.
pub fn unlink(path: &CStr) -> Result<()> {
    shm_unlink(path.to_bytes()).map_err(|e| Error::MapFailed(std::io::Error::from(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn test_config() -> (CString, HeapConfig) {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = CString::new(format!("/shm-heap-test-{}-{}", std::process::id(), n)).unwrap();
        // Distinct base address per test so parallel tests don't collide.
        let base = 0x0000_2000_0000_0000usize + (n as usize) * 0x1000_0000;
        let config = HeapConfig::builder()
            .base_addr(base)
            .arena_size(1 << 20)
            .rw_arena_size(4096)
            .root_capacity(64)
            .build();
        (path, config)
    }

    #[test]
    fn init_then_open_readonly_round_trips() {
        let (path, config) = test_config();
        let writer = Heap::init(&path, config).unwrap();
        assert_eq!(writer.role(), Role::Writer);

        let reader = Heap::open_readonly(&path, config).unwrap();
        assert_eq!(reader.role(), Role::Reader);

        let off = writer.allocate(32).unwrap();
        assert!(writer.is_heap_pointer(off));

        drop(writer);
        drop(reader);
        unlink(&path).unwrap();
    }

    #[test]
    fn reader_cannot_allocate() {
        let (path, config) = test_config();
        let _writer = Heap::init(&path, config).unwrap();
        let reader = Heap::open_readonly(&path, config).unwrap();
        assert!(matches!(reader.allocate(16), Err(Error::WrongRole(_))));
        unlink(&path).unwrap();
    }

    #[test]
    fn protect_then_unprotect_restores_writer_access() {
        let (path, config) = test_config();
        let heap = Heap::init(&path, config).unwrap();
        let off = heap.allocate(32).unwrap();
        heap.protect().unwrap();
        heap.unprotect().unwrap();
        // Arena is writable again: a further allocation and a write at the
        // earlier offset must both succeed.
        unsafe { heap.write(off, 32).unwrap() };
        unlink(&path).unwrap();
    }

    #[test]
    fn reader_can_protect_and_unprotect_its_own_mapping() {
        let (path, config) = test_config();
        let _writer = Heap::init(&path, config).unwrap();
        let reader = Heap::open_readonly(&path, config).unwrap();
        reader.protect().unwrap();
        reader.unprotect().unwrap();
        unlink(&path).unwrap();
    }

    #[test]
    fn root_add_keeps_object_alive_across_collect() {
        let (path, config) = test_config();
        let heap = Heap::init(&path, config).unwrap();
        let off = heap.allocate(16).unwrap();
        let handle = heap.root_add(off).unwrap();
        heap.collect().unwrap();
        assert!(heap.is_heap_pointer(off));
        drop(handle);
        heap.collect().unwrap();
        assert!(!heap.is_heap_pointer(off));
        unlink(&path).unwrap();
    }

    /// A rooted allocation's address survives a collection; once un-rooted,
    /// two further collections reclaim it, and a subsequent allocation
    /// reuses its former address.
    #[test]
    fn s5_gc_reach_and_address_reuse() {
        let (path, config) = test_config();
        let heap = Heap::init(&path, config).unwrap();

        let a = heap.allocate_string("A").unwrap();
        let handle = heap.root_add(a).unwrap();
        heap.collect().unwrap();
        assert!(heap.is_heap_pointer(a), "rooted A must survive collection");

        let _b = heap.allocate_string("B").unwrap(); // non-root, unrelated allocation
        assert!(heap.is_heap_pointer(a), "A's address is stable across further allocation");

        drop(handle);
        heap.collect().unwrap();
        heap.collect().unwrap();
        assert!(!heap.is_heap_pointer(a), "unrooted A must be reclaimed");

        let c = heap.allocate_string("C").unwrap();
        assert_eq!(c, a, "C must occupy A's former address");

        unlink(&path).unwrap();
    }

    #[test]
    fn rwlock_round_trips() {
        let (path, config) = test_config();
        let heap = Heap::init(&path, config).unwrap();
        let off = heap.new_rwlock().unwrap();
        let lock = unsafe { heap.rwlock_at(off) };
        let r = lock.read().unwrap();
        drop(r);
        let w = lock.write().unwrap();
        drop(w);
        unlink(&path).unwrap();
    }
}
