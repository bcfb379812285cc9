// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A typed, garbage-collected, cross-process shared-memory heap.
//!
//! A single writer process maps a backing file at a fixed virtual address,
//! allocates and garbage-collects typed objects (strings, structs, lists,
//! deques, dicts, sets) inside it, and any number of reader processes map
//! the same file read-only and observe the same pointers. See
//! [`heap::Heap`] for the entry point, [`containers`] for the typed views
//! built on top of it, and [`lock`] for the robust cross-process
//! synchronization primitives the writer/reader split relies on.
//!
//! This crate does not install a `tracing` subscriber; wire one up in the
//! host binary to see the `debug`/`warn` spans emitted around role
//! transitions, GC cycles, and lock recovery.

pub mod config;
pub mod containers;
pub mod convert;
pub mod error;
pub mod fieldspec;
pub mod hashtable;
pub mod heap;
pub mod lock;
pub mod registry;

pub use config::HeapConfig;
pub use error::{Error, Result};
pub use heap::{Heap, Role};
