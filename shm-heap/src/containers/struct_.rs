// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `StructSpec`: a declarative mapping between a C-layout record and a host
//! value, per field kind (`primitive | string-pointer | struct-pointer |
//! array-of-chars | container-pointer | double`).
//!
//! Every field gets a read accessor; mutable structs additionally get a
//! write accessor. Immutable structs instead derive a [`FieldSpec`] from
//! their own field declarations, exposing a structural key, hash and
//! equality -- the same deep-walk machinery [`crate::hashtable::HashTable`]
//! uses for struct-keyed dicts.

use crate::convert::ArrayOfChar;
use crate::error::{Error, Result};
use crate::fieldspec::FieldSpec;
use crate::heap::Heap;
use crate::registry::{Registry, TypeEntry};
use std::cmp::Ordering;
use std::rc::Rc;

/// Byte width of an inline primitive field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveWidth {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
}

impl PrimitiveWidth {
    fn size(self) -> usize {
        match self {
            PrimitiveWidth::I8 | PrimitiveWidth::U8 => 1,
            PrimitiveWidth::I16 | PrimitiveWidth::U16 => 2,
            PrimitiveWidth::I32 | PrimitiveWidth::U32 => 4,
            PrimitiveWidth::I64 | PrimitiveWidth::U64 => 8,
        }
    }
}

/// What one declared field actually is, and how it translates to/from a
/// [`FieldValue`].
#[derive(Clone)]
pub enum FieldKind {
    Primitive(PrimitiveWidth),
    Double,
    /// A heap-allocated NUL-terminated string pointer; `None` is a NUL
    /// pointer.
    StringPointer,
    /// A pointer to another struct. `pointee` is the pointee's own spec when
    /// known locally (enabling deep field-spec derivation and the
    /// immutable-referencing-mutable registration check); `None` for a
    /// forward/opaque reference resolved later through the registry, in
    /// which case the field hashes/compares by pointer identity only.
    StructPointer { pointee: Option<Rc<StructSpec>> },
    /// An inline fixed-size character buffer.
    ArrayOfChars { capacity: usize },
    /// A pointer to a list/dict/set/deque; always nocopy, always hashed by
    /// pointer identity (containers are never immutable).
    ContainerPointer,
}

/// A value read out of (or to be written into) one struct field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    I64(i64),
    U64(u64),
    Double(f64),
    Str(Option<String>),
    StructPointer(Option<usize>),
    ArrayOfChars(String),
    ContainerPointer(Option<usize>),
}

struct Field {
    name: String,
    offset: usize,
    kind: FieldKind,
}

/// A declared struct type: its layout, and whether it permits mutation.
pub struct StructSpec {
    name: String,
    size: usize,
    immutable: bool,
    fields: Vec<Field>,
}

impl StructSpec {
    pub fn builder(name: impl Into<String>, size: usize, immutable: bool) -> StructSpecBuilder {
        StructSpecBuilder {
            name: name.into(),
            size,
            immutable,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    fn field(&self, name: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or(Error::KeyNotFound)
    }

    pub fn read(&self, heap: &Heap, struct_offset: usize, field_name: &str) -> Result<FieldValue> {
        let field = self.field(field_name)?;
        let off = struct_offset + field.offset;
        Ok(match &field.kind {
            FieldKind::Primitive(width) => {
                let bytes = unsafe { heap.read(off, width.size()) };
                FieldValue::I64(sign_extend(bytes, *width))
            }
            FieldKind::Double => {
                let bytes = unsafe { heap.read(off, 8) };
                FieldValue::Double(f64::from_bits(u64::from_le_bytes(bytes.try_into().unwrap())))
            }
            FieldKind::StringPointer => {
                let ptr = read_u64(heap, off);
                FieldValue::Str(if ptr == 0 {
                    None
                } else {
                    Some(unsafe { read_cstr_string(heap, ptr as usize) })
                })
            }
            FieldKind::StructPointer { .. } => {
                let ptr = read_u64(heap, off);
                FieldValue::StructPointer(if ptr == 0 { None } else { Some(ptr as usize) })
            }
            FieldKind::ArrayOfChars { capacity } => {
                let accessor = ArrayOfChar {
                    offset: field.offset,
                    capacity: *capacity,
                };
                FieldValue::ArrayOfChars(accessor.read(heap, struct_offset))
            }
            FieldKind::ContainerPointer => {
                let ptr = read_u64(heap, off);
                FieldValue::ContainerPointer(if ptr == 0 { None } else { Some(ptr as usize) })
            }
        })
    }

    /// Writes `value` into `field_name`. Fails with [`Error::WrongRole`] if
    /// this struct is declared immutable -- there is no write accessor for
    /// an immutable struct.
    pub fn write(&self, heap: &Heap, struct_offset: usize, field_name: &str, value: &FieldValue) -> Result<()> {
        if self.immutable {
            return Err(Error::WrongRole("write on immutable struct"));
        }
        let field = self.field(field_name)?;
        let off = struct_offset + field.offset;
        match (&field.kind, value) {
            (FieldKind::Primitive(width), FieldValue::I64(v)) => {
                let bytes = v.to_le_bytes();
                unsafe { heap.write(off, width.size())?.copy_from_slice(&bytes[..width.size()]) };
            }
            (FieldKind::Double, FieldValue::Double(v)) => {
                unsafe { heap.write(off, 8)?.copy_from_slice(&v.to_bits().to_le_bytes()) };
            }
            (FieldKind::StringPointer, FieldValue::Str(s)) => {
                let raw = match s {
                    None => 0,
                    Some(s) => heap.allocate_string(s)? as u64,
                };
                unsafe { heap.write(off, 8)?.copy_from_slice(&raw.to_le_bytes()) };
            }
            (FieldKind::StructPointer { .. }, FieldValue::StructPointer(p)) => {
                let raw = p.map(|o| o as u64).unwrap_or(0);
                unsafe { heap.write(off, 8)?.copy_from_slice(&raw.to_le_bytes()) };
            }
            (FieldKind::ArrayOfChars { capacity }, FieldValue::ArrayOfChars(s)) => {
                let accessor = ArrayOfChar {
                    offset: field.offset,
                    capacity: *capacity,
                };
                accessor.write(heap, struct_offset, s)?;
            }
            (FieldKind::ContainerPointer, FieldValue::ContainerPointer(p)) => {
                let raw = p.map(|o| o as u64).unwrap_or(0);
                unsafe { heap.write(off, 8)?.copy_from_slice(&raw.to_le_bytes()) };
            }
            _ => return Err(Error::NonHashableKey("field kind/value mismatch")),
        }
        Ok(())
    }

    /// The structural key: every declared field's value, in declaration
    /// order. Only meaningful for immutable structs, but callable on any.
    pub fn key(&self, heap: &Heap, struct_offset: usize) -> Result<Vec<FieldValue>> {
        self.fields
            .iter()
            .map(|f| self.read(heap, struct_offset, &f.name))
            .collect()
    }

    /// Deep hash over the structural key. Only meaningful for an immutable
    /// struct; [`crate::hashtable::HashTable::new`] rejects building a
    /// `StructByValue`/`StructByPointer`-keyed table over a mutable struct
    /// with `Error::NonHashableKey` before any key of that type is ever
    /// hashed through this method, provided the caller passes that struct's
    /// own [`StructSpec::is_immutable`] into `KeyKind`'s `immutable` field.
    pub fn hash(&self, heap: &Heap, struct_offset: usize) -> u64 {
        self.field_spec().deep_hash(heap, struct_offset)
    }

    pub fn compare(&self, heap: &Heap, a_offset: usize, b_offset: usize) -> Ordering {
        self.field_spec().deep_compare(heap, a_offset, b_offset)
    }

    /// Derives a [`FieldSpec`] by introspecting this struct's own field
    /// declarations. A `StructPointer` field with no locally-known pointee
    /// is hashed by its raw pointer value (an opaque forward reference, not
    /// a deep walk).
    pub fn field_spec(&self) -> Rc<FieldSpec> {
        let mut builder = FieldSpec::builder();
        for field in &self.fields {
            builder = match &field.kind {
                FieldKind::Primitive(width) => builder.primitive(field.offset, width.size()),
                FieldKind::Double => builder.primitive(field.offset, 8),
                FieldKind::StringPointer => builder.string(field.offset),
                FieldKind::ArrayOfChars { capacity } => builder.primitive(field.offset, *capacity),
                FieldKind::ContainerPointer => builder.primitive(field.offset, 8),
                FieldKind::StructPointer { pointee: Some(sub) } => {
                    builder.pointer(field.offset, 1, sub.field_spec())
                }
                FieldKind::StructPointer { pointee: None } => builder.primitive(field.offset, 8),
            };
        }
        Rc::new(builder.build())
    }

    /// Registers this struct under its own C type name: `Struct(spec)` if
    /// immutable, `Opaque` otherwise (mutable structs get pointer-identity
    /// references only, never a deep field-spec).
    pub fn register(self: &Rc<Self>, registry: &Registry) {
        if self.immutable {
            registry.register_type(self.name.clone(), TypeEntry::Struct(self.field_spec()));
        } else {
            registry.register_type(self.name.clone(), TypeEntry::Opaque);
        }
    }
}

/// Builds a [`StructSpec`] in declaration order.
pub struct StructSpecBuilder {
    name: String,
    size: usize,
    immutable: bool,
    fields: Vec<Field>,
}

impl StructSpecBuilder {
    pub fn primitive(mut self, name: impl Into<String>, offset: usize, width: PrimitiveWidth) -> Self {
        self.fields.push(Field {
            name: name.into(),
            offset,
            kind: FieldKind::Primitive(width),
        });
        self
    }

    pub fn double(mut self, name: impl Into<String>, offset: usize) -> Self {
        self.fields.push(Field {
            name: name.into(),
            offset,
            kind: FieldKind::Double,
        });
        self
    }

    pub fn string_pointer(mut self, name: impl Into<String>, offset: usize) -> Self {
        self.fields.push(Field {
            name: name.into(),
            offset,
            kind: FieldKind::StringPointer,
        });
        self
    }

    /// Declares a struct-pointer field. Panics -- a registration-time
    /// programmer-contract violation, not a runtime error -- if this struct
    /// is immutable and `pointee` is a known, mutable struct: an immutable
    /// struct's deep hash/compare must never walk through mutable state.
    pub fn struct_pointer(
        mut self,
        name: impl Into<String>,
        offset: usize,
        pointee: Option<Rc<StructSpec>>,
    ) -> Self {
        if self.immutable {
            if let Some(sub) = &pointee {
                assert!(
                    sub.immutable,
                    "immutable struct `{}` cannot declare a field referencing mutable struct `{}`",
                    self.name, sub.name
                );
            }
        }
        self.fields.push(Field {
            name: name.into(),
            offset,
            kind: FieldKind::StructPointer { pointee },
        });
        self
    }

    pub fn array_of_chars(mut self, name: impl Into<String>, offset: usize, capacity: usize) -> Self {
        self.fields.push(Field {
            name: name.into(),
            offset,
            kind: FieldKind::ArrayOfChars { capacity },
        });
        self
    }

    pub fn container_pointer(mut self, name: impl Into<String>, offset: usize) -> Self {
        self.fields.push(Field {
            name: name.into(),
            offset,
            kind: FieldKind::ContainerPointer,
        });
        self
    }

    pub fn build(self) -> Rc<StructSpec> {
        Rc::new(StructSpec {
            name: self.name,
            size: self.size,
            immutable: self.immutable,
            fields: self.fields,
        })
    }
}

fn sign_extend(bytes: &[u8], width: PrimitiveWidth) -> i64 {
    match width {
        PrimitiveWidth::I8 => i8::from_le_bytes(bytes.try_into().unwrap()) as i64,
        PrimitiveWidth::U8 => bytes[0] as i64,
        PrimitiveWidth::I16 => i16::from_le_bytes(bytes.try_into().unwrap()) as i64,
        PrimitiveWidth::U16 => u16::from_le_bytes(bytes.try_into().unwrap()) as i64,
        PrimitiveWidth::I32 => i32::from_le_bytes(bytes.try_into().unwrap()) as i64,
        PrimitiveWidth::U32 => u32::from_le_bytes(bytes.try_into().unwrap()) as i64,
        PrimitiveWidth::I64 => i64::from_le_bytes(bytes.try_into().unwrap()),
        PrimitiveWidth::U64 => u64::from_le_bytes(bytes.try_into().unwrap()) as i64,
    }
}

fn read_u64(heap: &Heap, offset: usize) -> u64 {
    let bytes = unsafe { heap.read(offset, 8) };
    u64::from_le_bytes(bytes.try_into().unwrap())
}

unsafe fn read_cstr_string(heap: &Heap, offset: usize) -> String {
    let mut len = 0usize;
    loop {
        let byte = heap.read(offset + len, 1)[0];
        if byte == 0 {
            break;
        }
        len += 1;
    }
    String::from_utf8_lossy(heap.read(offset, len)).into_owned()
}
