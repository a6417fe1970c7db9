//! Fixed-width scalar I/O.
//!
//! Every scalar field goes through [`WireScalar`], whose width is an associated
//! constant of the Rust type itself. A `u64` field can only be written by the
//! `u64` impl (`put_u64_le`) and read by the same impl (`get_u64_le`); there is
//! no width parameter to get wrong.

use crate::core::registry::FieldKind;
use crate::error::{constants, EngineError, Result};
use bytes::{Buf, BufMut};

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// A little-endian scalar with a width fixed by its type
pub trait WireScalar: Copy + sealed::Sealed {
    /// Encoded width in bytes
    const WIDTH: usize;
    /// Layout tag this scalar encodes
    const KIND: FieldKind;

    fn put<B: BufMut>(self, buf: &mut B);

    /// Read without bounds checking; use [`read_scalar`].
    fn get<B: Buf>(buf: &mut B) -> Self;
}

macro_rules! wire_scalar {
    ($ty:ty, $kind:ident, $put:ident, $get:ident) => {
        const _: () = assert!(matches!(
            FieldKind::$kind.fixed_width(),
            Some(width) if width == std::mem::size_of::<$ty>()
        ));

        impl WireScalar for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            const KIND: FieldKind = FieldKind::$kind;

            #[inline]
            fn put<B: BufMut>(self, buf: &mut B) {
                buf.$put(self);
            }

            #[inline]
            fn get<B: Buf>(buf: &mut B) -> Self {
                buf.$get()
            }
        }
    };
}

wire_scalar!(u8, U8, put_u8, get_u8);
wire_scalar!(u16, U16, put_u16_le, get_u16_le);
wire_scalar!(u32, U32, put_u32_le, get_u32_le);
wire_scalar!(u64, U64, put_u64_le, get_u64_le);

#[inline]
pub fn write_scalar<T: WireScalar, B: BufMut>(buf: &mut B, value: T) {
    value.put(buf);
}

/// Read one scalar, failing with `Corrupt` if fewer than `T::WIDTH` bytes remain
#[inline]
pub fn read_scalar<T: WireScalar>(cursor: &mut &[u8]) -> Result<T> {
    if cursor.remaining() < T::WIDTH {
        return Err(EngineError::Corrupt(format!(
            "{}: {} needs {} bytes, {} left",
            constants::ERR_TRUNCATED_SCALAR,
            T::KIND.name(),
            T::WIDTH,
            cursor.remaining()
        )));
    }
    Ok(T::get(cursor))
}

/// A single field value, tagged with its exact width
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Bytes(Vec<u8>),
}

impl FieldValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::U8(_) => "u8",
            FieldValue::U16(_) => "u16",
            FieldValue::U32(_) => "u32",
            FieldValue::U64(_) => "u64",
            FieldValue::Bytes(_) => "bytes",
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            FieldValue::U8(v) => Some(v.into()),
            FieldValue::U16(v) => Some(v.into()),
            FieldValue::U32(v) => Some(v.into()),
            FieldValue::U64(v) => Some(v),
            FieldValue::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        FieldValue::U8(v)
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::U16(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::U32(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::U64(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(v: &[u8]) -> Self {
        FieldValue::Bytes(v.to_vec())
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Bytes(v.as_bytes().to_vec())
    }
}
