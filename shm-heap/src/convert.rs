// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Converters: the translation layer between host values and the raw heap
//! words a struct field or container slot actually stores.
//!
//! Every typed container (`struct_`, `list`, `dict`, ...) composes converter
//! calls rather than touching heap bytes directly; this is the layer that
//! makes the round-trip property (`from_heap(to_heap(v)) == v`) a property
//! of one small trait instead of something every container has to reprove.

use crate::error::Result;
use crate::heap::Heap;

/// One field slot's translation between a host value `T` and the `u64`-ish
/// raw heap word(s) backing it.
///
/// `write` returns the raw value to store (a pointer, an inline primitive,
/// or a bit-reinterpreted double); `read` is the inverse. Slots are always
/// 8 bytes wide except [`ArrayOfChar`], which owns its own fixed-size
/// buffer inline.
pub trait Converter {
    type Host;

    fn to_heap(&self, heap: &Heap, value: &Self::Host) -> Result<u64>;
    fn from_heap(&self, heap: &Heap, raw: u64) -> Result<Self::Host>;
}

/// Identity: the raw heap word *is* the host value (used for container
/// pointers threaded straight through without semantic translation).
pub struct Dummy;

impl Converter for Dummy {
    type Host = u64;
    fn to_heap(&self, _heap: &Heap, value: &u64) -> Result<u64> {
        Ok(*value)
    }
    fn from_heap(&self, _heap: &Heap, raw: u64) -> Result<u64> {
        Ok(raw)
    }
}

/// A heap-allocated, NUL-terminated string. A NUL pointer round-trips to
/// `None`.
pub struct StringConverter;

impl Converter for StringConverter {
    type Host = Option<String>;

    fn to_heap(&self, heap: &Heap, value: &Option<String>) -> Result<u64> {
        match value {
            None => Ok(0),
            Some(s) => Ok(heap.allocate_string(s)? as u64),
        }
    }

    fn from_heap(&self, heap: &Heap, raw: u64) -> Result<Option<String>> {
        if raw == 0 {
            return Ok(None);
        }
        let bytes = unsafe { read_cstr(heap, raw as usize) };
        Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
    }
}

/// A fixed-size inline character buffer (`char[N]`), NUL-terminated within
/// the field itself rather than pointed to.
pub struct ArrayOfChar {
    pub offset: usize,
    pub capacity: usize,
}

impl ArrayOfChar {
    /// Writes `value` (truncated to `capacity - 1` bytes) plus a NUL
    /// terminator directly into the struct at `struct_offset`.
    pub fn write(&self, heap: &Heap, struct_offset: usize, value: &str) -> Result<()> {
        let bytes = value.as_bytes();
        let n = bytes.len().min(self.capacity.saturating_sub(1));
        unsafe {
            let field = heap.write(struct_offset + self.offset, self.capacity)?;
            field[..n].copy_from_slice(&bytes[..n]);
            field[n] = 0;
            for b in &mut field[n + 1..] {
                *b = 0;
            }
        }
        Ok(())
    }

    pub fn read(&self, heap: &Heap, struct_offset: usize) -> String {
        let bytes = unsafe { heap.read(struct_offset + self.offset, self.capacity) };
        let nul = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..nul]).into_owned()
    }
}

/// An inline primitive, widened through a scratch `u64` cell. `N` is the
/// primitive's byte width (1, 2, 4 or 8); signedness is handled by the
/// caller's choice of `T`.
pub struct Primitive<T> {
    _marker: std::marker::PhantomData<T>,
}

impl<T> Default for Primitive<T> {
    fn default() -> Self {
        Primitive {
            _marker: std::marker::PhantomData,
        }
    }
}

macro_rules! impl_primitive_converter {
    ($t:ty) => {
        impl Converter for Primitive<$t> {
            type Host = $t;
            fn to_heap(&self, _heap: &Heap, value: &$t) -> Result<u64> {
                Ok(*value as u64)
            }
            fn from_heap(&self, _heap: &Heap, raw: u64) -> Result<$t> {
                Ok(raw as $t)
            }
        }
    };
}

impl_primitive_converter!(i8);
impl_primitive_converter!(u8);
impl_primitive_converter!(i16);
impl_primitive_converter!(u16);
impl_primitive_converter!(i32);
impl_primitive_converter!(u32);
impl_primitive_converter!(i64);
impl_primitive_converter!(u64);

/// `f64`, bit-reinterpreted into the pointer-width slot.
pub struct DoubleConverter;

impl Converter for DoubleConverter {
    type Host = f64;
    fn to_heap(&self, _heap: &Heap, value: &f64) -> Result<u64> {
        Ok(value.to_bits())
    }
    fn from_heap(&self, _heap: &Heap, raw: u64) -> Result<f64> {
        Ok(f64::from_bits(raw))
    }
}

/// A pointer to a heap-resident struct, read/written as its raw offset.
/// `from_heap`/`to_heap` here hand back the offset itself (`0` meaning
/// absent); the struct layer wraps it into a typed handle.
pub struct StructPtr;

impl Converter for StructPtr {
    type Host = Option<usize>;
    fn to_heap(&self, _heap: &Heap, value: &Option<usize>) -> Result<u64> {
        Ok(value.map(|o| o as u64).unwrap_or(0))
    }
    fn from_heap(&self, _heap: &Heap, raw: u64) -> Result<Option<usize>> {
        Ok(if raw == 0 { None } else { Some(raw as usize) })
    }
}

/// A pointer to a struct materialized inline (by value) rather than via an
/// extra indirection; translation is identical to [`StructPtr`] since both
/// ultimately store an offset, but kept distinct to document the structs
/// they're meant for.
pub type StructByVal = StructPtr;

/// Like [`StructPtr`] but documents that the pointee's true type is erased
/// behind an opaque C-style alias, allowing containers to reference each
/// other before every type is fully registered; see [`crate::registry`].
pub type GenericTypePtr = StructPtr;

/// Seconds-since-epoch stored as a double; `NaN` means absent.
pub struct DateTimeConverter;

impl Converter for DateTimeConverter {
    type Host = Option<f64>;
    fn to_heap(&self, _heap: &Heap, value: &Option<f64>) -> Result<u64> {
        Ok(value.unwrap_or(f64::NAN).to_bits())
    }
    fn from_heap(&self, _heap: &Heap, raw: u64) -> Result<Option<f64>> {
        let v = f64::from_bits(raw);
        Ok(if v.is_nan() { None } else { Some(v) })
    }
}

/// Whole days since epoch, same absent-via-`NaN` discipline as
/// [`DateTimeConverter`].
pub type DateConverter = DateTimeConverter;

/// `i64`, with `i64::MIN` reserved as the "absent" sentinel.
pub struct LongOrNone;

impl Converter for LongOrNone {
    type Host = Option<i64>;
    fn to_heap(&self, _heap: &Heap, value: &Option<i64>) -> Result<u64> {
        Ok(value.unwrap_or(i64::MIN) as u64)
    }
    fn from_heap(&self, _heap: &Heap, raw: u64) -> Result<Option<i64>> {
        let v = raw as i64;
        Ok(if v == i64::MIN { None } else { Some(v) })
    }
}

/// A signed byte: `0`/`1` for `false`/`true`, `-1` for absent.
pub struct BoolOrNone;

impl Converter for BoolOrNone {
    type Host = Option<bool>;
    fn to_heap(&self, _heap: &Heap, value: &Option<bool>) -> Result<u64> {
        Ok(match value {
            None => 0xFFu64,
            Some(false) => 0,
            Some(true) => 1,
        })
    }
    fn from_heap(&self, _heap: &Heap, raw: u64) -> Result<Option<bool>> {
        Ok(match raw as u8 as i8 {
            -1 => None,
            0 => Some(false),
            _ => Some(true),
        })
    }
}

/// `f64`, `NaN` meaning absent.
pub struct DoubleOrNone;

impl Converter for DoubleOrNone {
    type Host = Option<f64>;
    fn to_heap(&self, _heap: &Heap, value: &Option<f64>) -> Result<u64> {
        Ok(value.unwrap_or(f64::NAN).to_bits())
    }
    fn from_heap(&self, _heap: &Heap, raw: u64) -> Result<Option<f64>> {
        let v = f64::from_bits(raw);
        Ok(if v.is_nan() { None } else { Some(v) })
    }
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
