// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Robust, recursive, process-shared mutexes, and the two-mutex read/write
//! lock built on top of them.
//!
//! No safe Rust crate exposes `PTHREAD_MUTEX_ROBUST` combined with
//! `PTHREAD_PROCESS_SHARED` and `PTHREAD_MUTEX_RECURSIVE`, so this talks to
//! `libc`'s pthread FFI directly, the same way `datadog-alloc`'s allocators
//! talk to `libc::mmap` directly where no higher-level crate fits.

use crate::error::{Error, Result};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

/// A `pthread_mutex_t` living at a fixed offset in shared memory.
///
/// Must be placed in memory shared between every process that locks it
/// (the RW sub-arena, see [`crate::heap::rw_arena`]) and initialized exactly
/// once, by whichever process calls [`Heap::init`](crate::heap::Heap::init).
/// Every other process maps the same bytes and calls [`Mutex::from_raw`].
#[repr(C)]
pub struct Mutex {
    raw: UnsafeCell<libc::pthread_mutex_t>,
}

// SAFETY: a pthread mutex configured PTHREAD_PROCESS_SHARED is explicitly
// designed to be operated on from multiple threads/processes concurrently;
// the synchronization it provides is exactly what makes this sound.
unsafe impl Send for Mutex {}
unsafe impl Sync for Mutex {}

/// RAII guard released by dropping it; also usable as a witness that the
/// lock is currently held, without carrying any data (this heap's locks
/// guard raw shared memory, not a typed `T`).
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
}

impl Mutex {
    /// Initializes a fresh mutex at `place`, which must be zeroed,
    /// `align_of::<libc::pthread_mutex_t>()`-aligned shared memory that
    /// outlives every `Mutex` built against it.
    ///
    /// # Safety
    /// Must be called exactly once per backing location, before any other
    /// process calls [`Mutex::from_raw`] against the same bytes.
    pub unsafe fn init_at(place: *mut libc::pthread_mutex_t) -> Result<&'static Mutex> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        check(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;
        let mut attr = attr.assume_init();
        check(libc::pthread_mutexattr_setpshared(
            &mut attr,
            libc::PTHREAD_PROCESS_SHARED,
        ))?;
        check(libc::pthread_mutexattr_settype(
            &mut attr,
            libc::PTHREAD_MUTEX_RECURSIVE,
        ))?;
        check(libc::pthread_mutexattr_setrobust(
            &mut attr,
            libc::PTHREAD_MUTEX_ROBUST,
        ))?;
        check(libc::pthread_mutex_init(place, &attr))?;
        libc::pthread_mutexattr_destroy(&mut attr);
        Ok(&*(place as *const Mutex))
    }

    /// Wraps an already-initialized mutex at `place` without touching it.
    /// Used by every process other than the one that called `init_at`.
    ///
    /// # Safety
    /// `place` must have been initialized by a prior `init_at` call (in this
    /// or another process mapping the same memory) and must outlive the
    /// returned reference.
    pub unsafe fn from_raw<'a>(place: *mut libc::pthread_mutex_t) -> &'a Mutex {
        &*(place as *const Mutex)
    }

    /// Locks the mutex, recursively if the calling thread already holds it.
    ///
    /// `offset` identifies this mutex's location in the mapping, purely for
    /// the `Err(Error::OwnerDead)` / log line below -- it is not stored and
    /// does not affect the lock itself; a bare test mutex with no real heap
    /// offset can pass `0`.
    ///
    /// Returns `Err(Error::OwnerDead)` if the previous owner died while
    /// holding the lock. This call makes the mutex consistent and releases
    /// it again before returning the error -- it does *not* hand back a
    /// guard for the caller's own critical section, since whatever state
    /// the dead owner left behind may be partially updated and the caller
    /// needs to decide what to do about that first. The mutex is fully
    /// usable again (by this call or any other) once this has been
    /// observed; the caller is expected to log it and call `lock()` again.
    pub fn lock(&self, offset: usize) -> Result<MutexGuard<'_>> {
        let rc = unsafe { libc::pthread_mutex_lock(self.raw.get()) };
        if rc == libc::EOWNERDEAD {
            unsafe {
                check(libc::pthread_mutex_consistent(self.raw.get()))?;
                check(libc::pthread_mutex_unlock(self.raw.get()))?;
            }
            tracing::warn!(offset, "lock owner died; mutex made consistent");
            return Err(Error::OwnerDead(offset));
        }
        check(rc)?;
        Ok(MutexGuard { mutex: self })
    }

    fn unlock(&self) {
        let rc = unsafe { libc::pthread_mutex_unlock(self.raw.get()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_unlock failed: {rc}");
        // Yield the scheduler right after release so a waiting peer on
        // another core gets a shot at the lock before this thread spins
        // back around and reacquires it.
        unsafe {
            libc::sched_yield();
        }
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

fn check(rc: i32) -> Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(Error::MapFailed(std::io::Error::from_raw_os_error(rc)))
    }
}

/// Layout of the two mutexes a [`RwLock`] needs, as it sits in shared
/// memory: a write mutex serializing writers against each other and against
/// readers, and a reader-count mutex serializing updates to `reader_count`.
#[repr(C)]
pub struct RwLockState {
    write_mutex: libc::pthread_mutex_t,
    reader_count_mutex: libc::pthread_mutex_t,
    reader_count: UnsafeCell<u64>,
}

unsafe impl Send for RwLockState {}
unsafe impl Sync for RwLockState {}

/// Multi-reader, single-writer lock built from two [`Mutex`]es: readers take
/// the write mutex only to publish the first-reader/last-reader transition,
/// not for the duration of the read.
pub struct RwLock<'a> {
    write_mutex: &'a Mutex,
    write_mutex_offset: usize,
    reader_count_mutex: &'a Mutex,
    reader_count_mutex_offset: usize,
    reader_count: &'a UnsafeCell<u64>,
}

/// Held by a reader; releases on drop. May decrement `reader_count` to zero
/// and release the write mutex on drop if this was the last reader.
pub struct ReadGuard<'a> {
    lock: &'a RwLock<'a>,
}

/// Held by a writer; releases the write mutex on drop.
pub struct WriteGuard<'a> {
    _guard: MutexGuard<'a>,
}

impl<'a> RwLock<'a> {
    /// Initializes both mutexes and the reader count at `place`.
    ///
    /// # Safety
    /// Must be called exactly once per backing location, before any other
    /// process calls [`RwLock::from_raw`] against the same bytes.
    pub unsafe fn init_at(place: *mut RwLockState) -> Result<()> {
        Mutex::init_at(std::ptr::addr_of_mut!((*place).write_mutex) as *mut _)?;
        Mutex::init_at(std::ptr::addr_of_mut!((*place).reader_count_mutex) as *mut _)?;
        *(*place).reader_count.get() = 0;
        Ok(())
    }

    /// Wraps already-initialized state at `place`, which sits `offset` bytes
    /// into the mapping.
    ///
    /// # Safety
    /// `place` must have been initialized by a prior `init_at` call and must
    /// outlive the returned `RwLock`.
    pub unsafe fn from_raw(place: *mut RwLockState, offset: usize) -> RwLock<'a> {
        let write_mutex_field = std::ptr::addr_of_mut!((*place).write_mutex);
        let reader_count_mutex_field = std::ptr::addr_of_mut!((*place).reader_count_mutex);
        let write_mutex_offset = offset + (write_mutex_field as usize - place as usize);
        let reader_count_mutex_offset =
            offset + (reader_count_mutex_field as usize - place as usize);
        RwLock {
            write_mutex: Mutex::from_raw(write_mutex_field as *mut _),
            write_mutex_offset,
            reader_count_mutex: Mutex::from_raw(reader_count_mutex_field as *mut _),
            reader_count_mutex_offset,
            reader_count: &(*place).reader_count,
        }
    }

    /// Acquires a read lock. Blocks only behind an active writer, or behind
    /// another reader's first-reader transition.
    pub fn read(&self) -> Result<ReadGuard<'_>> {
        let _held = self.reader_count_mutex.lock(self.reader_count_mutex_offset)?;
        let count = unsafe { &mut *self.reader_count.get() };
        if *count == 0 {
            // First reader: hold the write mutex for the duration of the
            // read window so no writer can start.
            std::mem::forget(self.write_mutex.lock(self.write_mutex_offset)?);
        }
        *count += 1;
        Ok(ReadGuard { lock: self })
    }

    /// Acquires the write lock, excluding every other reader and writer.
    pub fn write(&self) -> Result<WriteGuard<'_>> {
        let guard = self.write_mutex.lock(self.write_mutex_offset)?;
        Ok(WriteGuard { _guard: guard })
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let held = self
            .lock
            .reader_count_mutex
            .lock(self.lock.reader_count_mutex_offset);
        let Ok(_held) = held else { return };
        let count = unsafe { &mut *self.lock.reader_count.get() };
        *count -= 1;
        if *count == 0 {
            // Last reader: release the write mutex held since the first
            // reader's transition. `forget` in `read()` means this is the
            // only place that unlock happens.
            self.lock.write_mutex.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;

    fn make_mutex() -> (Box<MaybeUninit<libc::pthread_mutex_t>>, &'static Mutex) {
        let mut storage: Box<MaybeUninit<libc::pthread_mutex_t>> = Box::new(MaybeUninit::zeroed());
        let m = unsafe { Mutex::init_at(storage.as_mut_ptr()).unwrap() };
        (storage, m)
    }

    #[test]
    fn recursive_lock_does_not_deadlock_same_thread() {
        let (_storage, mutex) = make_mutex();
        let g1 = mutex.lock(0).unwrap();
        let g2 = mutex.lock(0).unwrap();
        drop(g2);
        drop(g1);
    }

    /// A thread that locks the mutex and exits without unlocking leaves it
    /// owner-dead; the kernel's per-thread robust-mutex list makes this
    /// observable even within one process (Linux does not require the whole
    /// process to die, only the owning thread), so this doesn't need a real
    /// `fork()` to exercise.
    #[test]
    fn owner_dead_is_recovered_after_owning_thread_exits_without_unlocking() {
        let mut storage: Box<MaybeUninit<libc::pthread_mutex_t>> = Box::new(MaybeUninit::zeroed());
        let place = storage.as_mut_ptr();
        // SAFETY: `storage` outlives the thread below and the raw pointer
        // access on the main thread afterward.
        let place_addr = place as usize;
        unsafe { Mutex::init_at(place) }.unwrap();

        std::thread::spawn(move || {
            let place = place_addr as *mut libc::pthread_mutex_t;
            let mutex = unsafe { Mutex::from_raw(place) };
            let guard = mutex.lock(0).unwrap();
            std::mem::forget(guard); // never unlocked
        })
        .join()
        .unwrap();

        let mutex = unsafe { Mutex::from_raw(place) };
        assert!(matches!(mutex.lock(0), Err(Error::OwnerDead(0))));
        // The lock wrapper already called `pthread_mutex_consistent`
        // while recovering, so a subsequent lock acquires normally.
        let g = mutex.lock(0).unwrap();
        drop(g);
    }

    #[test]
    fn rwlock_allows_concurrent_reads() {
        let mut storage: Box<MaybeUninit<RwLockState>> = Box::new(MaybeUninit::zeroed());
        unsafe { RwLock::init_at(storage.as_mut_ptr()).unwrap() };
        let lock = unsafe { RwLock::from_raw(storage.as_mut_ptr(), 0) };
        let r1 = lock.read().unwrap();
        let r2 = lock.read().unwrap();
        drop(r1);
        drop(r2);
        let w = lock.write().unwrap();
        drop(w);
    }
}
