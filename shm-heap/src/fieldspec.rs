// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The field-spec engine: a data-driven description of how to walk a
//! struct/pointer/array/string tree to compute a deep hash and a deep
//! lexicographic comparison.
//!
//! A [`FieldSpec`] is a `Vec` of [`FieldDescriptor`]s terminated implicitly
//! by the `Vec`'s own length, with no sentinel `Stop` variant needed.

use crate::heap::Heap;

/// One field of an immutable struct's deep hash/compare walk.
#[derive(Debug, Clone)]
pub enum FieldDescriptor {
    /// Inline bytes at `offset..offset+size` within the struct.
    Primitive { offset: usize, size: usize },
    /// A NUL-terminated string pointer stored at `offset`. A NUL pointer
    /// hashes to `0` and sorts before every non-NUL string.
    String { offset: usize },
    /// A pointer at `offset` to `length` contiguous records described by
    /// `sub_spec`.
    Pointer {
        offset: usize,
        length: usize,
        sub_spec: std::rc::Rc<FieldSpec>,
    },
    /// A pointer at `offset` to a dynamically-sized run of records
    /// described by `sub_spec`, whose length lives at `length_offset`
    /// within the *owning* struct (read as a `u64`).
    Array {
        offset: usize,
        length_offset: usize,
        sub_spec: std::rc::Rc<FieldSpec>,
    },
}

/// An ordered sequence of field descriptors for one immutable struct type.
#[derive(Debug, Clone, Default)]
pub struct FieldSpec {
    fields: Vec<FieldDescriptor>,
}

impl FieldSpec {
    pub fn builder() -> FieldSpecBuilder {
        FieldSpecBuilder { fields: Vec::new() }
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// FNV-1a-style deep hash of the struct at `offset` in `heap`.
    pub fn deep_hash(&self, heap: &Heap, offset: usize) -> u64 {
        let mut state = FNV_OFFSET_BASIS;
        self.mix_hash(heap, offset, &mut state);
        state
    }

    fn mix_hash(&self, heap: &Heap, base: usize, state: &mut u64) {
        for field in &self.fields {
            match field {
                FieldDescriptor::Primitive { offset, size } => {
                    let bytes = unsafe { heap.read(base + offset, *size) };
                    mix_bytes(state, bytes);
                }
                FieldDescriptor::String { offset } => {
                    let ptr = read_u64(heap, base + offset);
                    if ptr == 0 {
                        mix_u64(state, 0);
                    } else {
                        let s = unsafe { read_cstr(heap, ptr as usize) };
                        mix_bytes(state, s);
                    }
                }
                FieldDescriptor::Pointer {
                    offset,
                    length,
                    sub_spec,
                } => {
                    let ptr = read_u64(heap, base + offset) as usize;
                    let elem_size = sub_spec.record_size_hint();
                    for i in 0..*length {
                        sub_spec.mix_hash(heap, ptr + i * elem_size, state);
                    }
                }
                FieldDescriptor::Array {
                    offset,
                    length_offset,
                    sub_spec,
                } => {
                    let ptr = read_u64(heap, base + offset) as usize;
                    let length = read_u64(heap, base + length_offset) as usize;
                    let elem_size = sub_spec.record_size_hint();
                    mix_u64(state, length as u64);
                    for i in 0..length {
                        sub_spec.mix_hash(heap, ptr + i * elem_size, state);
                    }
                }
            }
        }
    }

    /// Lexicographic deep compare of the structs at `a_offset` and
    /// `b_offset`. Returns the usual `Ordering`.
    pub fn deep_compare(
        &self,
        heap: &Heap,
        a_offset: usize,
        b_offset: usize,
    ) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        for field in &self.fields {
            let ord = match field {
                FieldDescriptor::Primitive { offset, size } => {
                    let a = unsafe { heap.read(a_offset + offset, *size) };
                    let b = unsafe { heap.read(b_offset + offset, *size) };
                    a.cmp(b)
                }
                FieldDescriptor::String { offset } => {
                    let a_ptr = read_u64(heap, a_offset + offset);
                    let b_ptr = read_u64(heap, b_offset + offset);
                    match (a_ptr, b_ptr) {
                        (0, 0) => Ordering::Equal,
                        (0, _) => Ordering::Less,
                        (_, 0) => Ordering::Greater,
                        (a_ptr, b_ptr) => {
                            let a = unsafe { read_cstr(heap, a_ptr as usize) };
                            let b = unsafe { read_cstr(heap, b_ptr as usize) };
                            a.cmp(b)
                        }
                    }
                }
                FieldDescriptor::Pointer {
                    offset,
                    length,
                    sub_spec,
                } => {
                    let a_ptr = read_u64(heap, a_offset + offset) as usize;
                    let b_ptr = read_u64(heap, b_offset + offset) as usize;
                    let elem_size = sub_spec.record_size_hint();
                    let mut ord = Ordering::Equal;
                    for i in 0..*length {
                        ord = sub_spec.deep_compare(
                            heap,
                            a_ptr + i * elem_size,
                            b_ptr + i * elem_size,
                        );
                        if ord != Ordering::Equal {
                            break;
                        }
                    }
                    ord
                }
                FieldDescriptor::Array {
                    offset,
                    length_offset,
                    sub_spec,
                } => {
                    let a_ptr = read_u64(heap, a_offset + offset) as usize;
                    let b_ptr = read_u64(heap, b_offset + offset) as usize;
                    let a_len = read_u64(heap, a_offset + length_offset) as usize;
                    let b_len = read_u64(heap, b_offset + length_offset) as usize;
                    let elem_size = sub_spec.record_size_hint();
                    let common = a_len.min(b_len);
                    let mut ord = Ordering::Equal;
                    for i in 0..common {
                        ord = sub_spec.deep_compare(
                            heap,
                            a_ptr + i * elem_size,
                            b_ptr + i * elem_size,
                        );
                        if ord != Ordering::Equal {
                            break;
                        }
                    }
                    if ord == Ordering::Equal {
                        ord = a_len.cmp(&b_len);
                    }
                    ord
                }
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Size in bytes of one record of this spec's owning struct, used to
    /// stride through `Pointer`/`Array` runs. Computed as the maximum of
    /// each field's own extent, since the spec does not separately carry
    /// the struct's total size.
    fn record_size_hint(&self) -> usize {
        self.fields
            .iter()
            .map(|f| match f {
                FieldDescriptor::Primitive { offset, size } => offset + size,
                FieldDescriptor::String { offset } => offset + 8,
                FieldDescriptor::Pointer { offset, .. } => offset + 8,
                FieldDescriptor::Array { offset, .. } => offset + 8,
            })
            .max()
            .unwrap_or(0)
    }
}

/// Builds a [`FieldSpec`] in declaration order.
pub struct FieldSpecBuilder {
    fields: Vec<FieldDescriptor>,
}

impl FieldSpecBuilder {
    pub fn primitive(mut self, offset: usize, size: usize) -> Self {
        self.fields.push(FieldDescriptor::Primitive { offset, size });
        self
    }

    pub fn string(mut self, offset: usize) -> Self {
        self.fields.push(FieldDescriptor::String { offset });
        self
    }

    pub fn pointer(mut self, offset: usize, length: usize, sub_spec: std::rc::Rc<FieldSpec>) -> Self {
        self.fields.push(FieldDescriptor::Pointer {
            offset,
            length,
            sub_spec,
        });
        self
    }

    pub fn array(
        mut self,
        offset: usize,
        length_offset: usize,
        sub_spec: std::rc::Rc<FieldSpec>,
    ) -> Self {
        self.fields.push(FieldDescriptor::Array {
            offset,
            length_offset,
            sub_spec,
        });
        self
    }

    pub fn build(self) -> FieldSpec {
        FieldSpec {
            fields: self.fields,
        }
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn mix_bytes(state: &mut u64, bytes: &[u8]) {
    for &b in bytes {
        *state ^= b as u64;
        *state = state.wrapping_mul(FNV_PRIME);
    }
}

fn mix_u64(state: &mut u64, value: u64) {
    mix_bytes(state, &value.to_le_bytes());
}

fn read_u64(heap: &Heap, offset: usize) -> u64 {
    let bytes = unsafe { heap.read(offset, 8) };
    u64::from_le_bytes(bytes.try_into().unwrap())
}

unsafe fn read_cstr(heap: &Heap, offset: usize) -> &[u8] {
    let mut len = 0usize;
    loop {
        let byte = heap.read(offset + len, 1)[0];
        if byte == 0 {
            break;
        }
        len += 1;
    }
    heap.read(offset, len)
}
