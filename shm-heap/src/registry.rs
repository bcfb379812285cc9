// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The type registry: resolves the cyclic-reference problem between
//! converters, container types, and struct field declarations by keying
//! every declared type under an opaque C type name that can be referenced
//! before it is fully built.
//!
//! A field whose declared type is `"Point*"` is registered by name, not by
//! a direct `Rc<StructSpec>` reference, so two structs may point at each
//! other (or at a container that itself nests them) without needing a
//! two-pass declaration order.

use crate::fieldspec::FieldSpec;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// What a registered C type name resolves to.
#[derive(Clone)]
pub enum TypeEntry {
    /// An immutable struct's field-spec, for deep hash/compare.
    Struct(Rc<FieldSpec>),
    /// A container type registered under an opaque alias so struct fields
    /// may reference it before it's fully constructed.
    Opaque,
}

/// Process-wide (really: per-`Heap`) registry of declared C type names.
///
/// A lazy type table: entries are added as `struct(...)`/`list(...)`/...
/// declarations run, and field declarations that reference a
/// not-yet-registered name are resolved the first time they're actually
/// walked, not at declaration time.
#[derive(Default)]
pub struct Registry {
    entries: RefCell<HashMap<String, TypeEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers `name`, replacing any prior entry. Struct declarations and
    /// container declarations both call this once, at build time.
    pub fn register_type(&self, name: impl Into<String>, entry: TypeEntry) {
        self.entries.borrow_mut().insert(name.into(), entry);
    }

    /// Looks up a previously registered type by its C name.
    pub fn type_of(&self, name: &str) -> Option<TypeEntry> {
        self.entries.borrow().get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }
}
