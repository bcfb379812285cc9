// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Crate-wide error taxonomy.
//!
//! Every fallible operation in this crate returns [`Result<T>`], an alias
//! around a single [`Error`] enum. There is one variant per failure kind
//! that a caller can meaningfully distinguish; see each variant's doc
//! comment for the recovery policy.

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Every error this crate can return.
///
/// Recovery policy is documented per variant. [`Error::OwnerDead`] is the
/// only variant a caller is expected to recover from locally; the rest are
/// either programmer-contract violations or resource exhaustion that the
/// caller must handle (or propagate).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operation was attempted in a role that does not permit it (e.g.
    /// calling `allocate` from a reader, or calling `init` twice with two
    /// different paths). Never recovered locally -- this is a programmer
    /// contract violation.
    #[error("operation not permitted in current role: {0}")]
    WrongRole(&'static str),

    /// Mapping the backing file at the fixed base address failed, or the
    /// mapping call itself failed. Fatal: the heap is unusable.
    #[error("failed to map backing file at fixed address: {0}")]
    MapFailed(#[source] std::io::Error),

    /// The backing file exists but does not look like a heap image (magic
    /// mismatch, truncated header). Fatal: the heap is unusable.
    #[error("backing file is not a valid heap image")]
    BadBackingFile,

    /// The GC arena (or the RW sub-arena) has no space left for the
    /// requested allocation. Callers may retry after `collect()`, but nothing
    /// in this crate auto-retries.
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        requested: usize,
        available: usize,
    },

    /// Every root-table slot is occupied.
    #[error("root table is full (capacity {capacity})")]
    NoRootSpace { capacity: usize },

    /// A dict/set lookup or delete targeted a key that is not present.
    #[error("key not found")]
    KeyNotFound,

    /// A key was used that this crate cannot give a stable deep hash/compare
    /// for: a mutable struct by value, or a NUL string pointer as a dict key.
    #[error("key type is not hashable: {0}")]
    NonHashableKey(&'static str),

    /// A robust mutex reported that its previous owner died while holding
    /// it. Recovered locally by the lock wrapper (it calls
    /// `pthread_mutex_consistent` and returns this error so the caller can
    /// log it); the mutex is fully usable again once this has been observed.
    /// Carries the recovered mutex's offset from the mapping base, so a
    /// caller logging this across several locks can tell which one.
    #[error("lock owner died before releasing (mutex at offset {0}); state has been made consistent")]
    OwnerDead(usize),
}
