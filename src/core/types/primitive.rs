//! Primitive codec: conversion between the closed primitive set and raw bytes
//!
//! Dispatch happens two ways. The sealed [`Primitive`] trait resolves the
//! codec at compile time for typed reads and writes. [`PrimitiveTag`] and
//! [`PrimitiveValue`] carry the tag explicitly for callers that only know the
//! type at runtime. All encodings use native byte order.

use super::address::Address;
use super::error::{MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem::size_of;
use std::str::FromStr;

/// Byte width of the platform's default character (a UTF-16 code unit)
pub const CHAR_WIDTH: usize = 2;

/// A single platform character code unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct WideChar(pub u16);

impl From<u16> for WideChar {
    fn from(unit: u16) -> Self {
        WideChar(unit)
    }
}

/// Closed set of primitive types understood by the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveTag {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Char,
    Address,
}

impl PrimitiveTag {
    /// Every tag, in declaration order
    pub const ALL: [PrimitiveTag; 13] = [
        PrimitiveTag::Bool,
        PrimitiveTag::I8,
        PrimitiveTag::U8,
        PrimitiveTag::I16,
        PrimitiveTag::U16,
        PrimitiveTag::I32,
        PrimitiveTag::U32,
        PrimitiveTag::I64,
        PrimitiveTag::U64,
        PrimitiveTag::F32,
        PrimitiveTag::F64,
        PrimitiveTag::Char,
        PrimitiveTag::Address,
    ];

    /// Encoded width in bytes
    pub const fn size(self) -> usize {
        match self {
            PrimitiveTag::Bool | PrimitiveTag::I8 | PrimitiveTag::U8 => 1,
            PrimitiveTag::I16 | PrimitiveTag::U16 => 2,
            PrimitiveTag::I32 | PrimitiveTag::U32 | PrimitiveTag::F32 => 4,
            PrimitiveTag::I64 | PrimitiveTag::U64 | PrimitiveTag::F64 => 8,
            PrimitiveTag::Char => CHAR_WIDTH,
            PrimitiveTag::Address => size_of::<usize>(),
        }
    }

    /// Whether the bulk array path accepts this tag.
    ///
    /// Unsigned 16/32/64-bit widths, `bool` and `address` are rejected.
    pub const fn supports_bulk_copy(self) -> bool {
        matches!(
            self,
            PrimitiveTag::I8
                | PrimitiveTag::U8
                | PrimitiveTag::I16
                | PrimitiveTag::I32
                | PrimitiveTag::I64
                | PrimitiveTag::F32
                | PrimitiveTag::F64
                | PrimitiveTag::Char
        )
    }

    /// Lowercase tag name
    pub const fn name(self) -> &'static str {
        match self {
            PrimitiveTag::Bool => "bool",
            PrimitiveTag::I8 => "i8",
            PrimitiveTag::U8 => "u8",
            PrimitiveTag::I16 => "i16",
            PrimitiveTag::U16 => "u16",
            PrimitiveTag::I32 => "i32",
            PrimitiveTag::U32 => "u32",
            PrimitiveTag::I64 => "i64",
            PrimitiveTag::U64 => "u64",
            PrimitiveTag::F32 => "f32",
            PrimitiveTag::F64 => "f64",
            PrimitiveTag::Char => "char",
            PrimitiveTag::Address => "address",
        }
    }
}

impl fmt::Display for PrimitiveTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PrimitiveTag {
    type Err = MemoryError;

    fn from_str(s: &str) -> MemoryResult<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        PrimitiveTag::ALL
            .into_iter()
            .find(|tag| tag.name() == wanted)
            .ok_or_else(|| MemoryError::UnsupportedType(s.to_string()))
    }
}

/// A primitive value tagged with its type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PrimitiveValue {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(WideChar),
    Address(Address),
}

impl PrimitiveValue {
    /// Tag of the contained value
    pub fn tag(&self) -> PrimitiveTag {
        match self {
            PrimitiveValue::Bool(_) => PrimitiveTag::Bool,
            PrimitiveValue::I8(_) => PrimitiveTag::I8,
            PrimitiveValue::U8(_) => PrimitiveTag::U8,
            PrimitiveValue::I16(_) => PrimitiveTag::I16,
            PrimitiveValue::U16(_) => PrimitiveTag::U16,
            PrimitiveValue::I32(_) => PrimitiveTag::I32,
            PrimitiveValue::U32(_) => PrimitiveTag::U32,
            PrimitiveValue::I64(_) => PrimitiveTag::I64,
            PrimitiveValue::U64(_) => PrimitiveTag::U64,
            PrimitiveValue::F32(_) => PrimitiveTag::F32,
            PrimitiveValue::F64(_) => PrimitiveTag::F64,
            PrimitiveValue::Char(_) => PrimitiveTag::Char,
            PrimitiveValue::Address(_) => PrimitiveTag::Address,
        }
    }

    /// Encoded width in bytes
    pub fn size(&self) -> usize {
        self.tag().size()
    }

    /// Encodes the value into a fresh buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            PrimitiveValue::Bool(v) => v.to_bytes(),
            PrimitiveValue::I8(v) => v.to_bytes(),
            PrimitiveValue::U8(v) => v.to_bytes(),
            PrimitiveValue::I16(v) => v.to_bytes(),
            PrimitiveValue::U16(v) => v.to_bytes(),
            PrimitiveValue::I32(v) => v.to_bytes(),
            PrimitiveValue::U32(v) => v.to_bytes(),
            PrimitiveValue::I64(v) => v.to_bytes(),
            PrimitiveValue::U64(v) => v.to_bytes(),
            PrimitiveValue::F32(v) => v.to_bytes(),
            PrimitiveValue::F64(v) => v.to_bytes(),
            PrimitiveValue::Char(v) => v.to_bytes(),
            PrimitiveValue::Address(v) => v.to_bytes(),
        }
    }

    /// Decodes a value of the given tag from the front of `bytes`
    pub fn from_bytes(tag: PrimitiveTag, bytes: &[u8]) -> MemoryResult<Self> {
        Ok(match tag {
            PrimitiveTag::Bool => PrimitiveValue::Bool(bool::from_bytes(bytes)?),
            PrimitiveTag::I8 => PrimitiveValue::I8(i8::from_bytes(bytes)?),
            PrimitiveTag::U8 => PrimitiveValue::U8(u8::from_bytes(bytes)?),
            PrimitiveTag::I16 => PrimitiveValue::I16(i16::from_bytes(bytes)?),
            PrimitiveTag::U16 => PrimitiveValue::U16(u16::from_bytes(bytes)?),
            PrimitiveTag::I32 => PrimitiveValue::I32(i32::from_bytes(bytes)?),
            PrimitiveTag::U32 => PrimitiveValue::U32(u32::from_bytes(bytes)?),
            PrimitiveTag::I64 => PrimitiveValue::I64(i64::from_bytes(bytes)?),
            PrimitiveTag::U64 => PrimitiveValue::U64(u64::from_bytes(bytes)?),
            PrimitiveTag::F32 => PrimitiveValue::F32(f32::from_bytes(bytes)?),
            PrimitiveTag::F64 => PrimitiveValue::F64(f64::from_bytes(bytes)?),
            PrimitiveTag::Char => PrimitiveValue::Char(WideChar::from_bytes(bytes)?),
            PrimitiveTag::Address => PrimitiveValue::Address(Address::from_bytes(bytes)?),
        })
    }
}

impl fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveValue::Bool(v) => write!(f, "{}", v),
            PrimitiveValue::I8(v) => write!(f, "{}", v),
            PrimitiveValue::U8(v) => write!(f, "{}", v),
            PrimitiveValue::I16(v) => write!(f, "{}", v),
            PrimitiveValue::U16(v) => write!(f, "{}", v),
            PrimitiveValue::I32(v) => write!(f, "{}", v),
            PrimitiveValue::U32(v) => write!(f, "{}", v),
            PrimitiveValue::I64(v) => write!(f, "{}", v),
            PrimitiveValue::U64(v) => write!(f, "{}", v),
            PrimitiveValue::F32(v) => write!(f, "{}", v),
            PrimitiveValue::F64(v) => write!(f, "{}", v),
            PrimitiveValue::Char(v) => match char::from_u32(v.0 as u32) {
                Some(c) => write!(f, "{}", c),
                None => write!(f, "\\u{{{:04x}}}", v.0),
            },
            PrimitiveValue::Address(v) => write!(f, "{}", v),
        }
    }
}

/// Encodes `value` as `tag`, rejecting a value of any other tag
pub fn encode(tag: PrimitiveTag, value: &PrimitiveValue) -> MemoryResult<Vec<u8>> {
    if value.tag() != tag {
        return Err(MemoryError::UnsupportedType(format!(
            "cannot encode a {} value as {}",
            value.tag(),
            tag
        )));
    }
    Ok(value.to_bytes())
}

/// Decodes a value of `tag` from `bytes`
pub fn decode(tag: PrimitiveTag, bytes: &[u8]) -> MemoryResult<PrimitiveValue> {
    PrimitiveValue::from_bytes(tag, bytes)
}

mod sealed {
    pub trait Sealed {}
}

/// A type from the closed primitive set.
///
/// Sealed: only the thirteen primitive types implement it.
pub trait Primitive: Copy + sealed::Sealed + 'static {
    /// Runtime tag of this type
    const TAG: PrimitiveTag;
    /// Encoded width in bytes
    const SIZE: usize = Self::TAG.size();

    /// Writes the encoding into `out`, which is exactly `SIZE` bytes long
    fn encode_into(self, out: &mut [u8]);

    /// Reads a value from `bytes`, which is exactly `SIZE` bytes long
    fn decode_exact(bytes: &[u8]) -> Self;

    /// Wraps the value in its tagged form
    fn into_value(self) -> PrimitiveValue;

    /// Unwraps a tagged value of the same type
    fn from_value(value: &PrimitiveValue) -> Option<Self>;

    /// Encodes the value into a fresh buffer
    fn to_bytes(self) -> Vec<u8> {
        let mut out = vec![0u8; Self::SIZE];
        self.encode_into(&mut out);
        out
    }

    /// Decodes a value from the front of `bytes`
    fn from_bytes(bytes: &[u8]) -> MemoryResult<Self> {
        if bytes.len() < Self::SIZE {
            return Err(MemoryError::buffer_too_small(Self::SIZE, bytes.len()));
        }
        Ok(Self::decode_exact(&bytes[..Self::SIZE]))
    }
}

/// Element types accepted by the bulk array path
pub trait ArrayElement: Primitive {}

macro_rules! numeric_primitive {
    ($($ty:ty => $tag:ident),* $(,)?) => {$(
        impl sealed::Sealed for $ty {}

        impl Primitive for $ty {
            const TAG: PrimitiveTag = PrimitiveTag::$tag;

            fn encode_into(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_ne_bytes());
            }

            fn decode_exact(bytes: &[u8]) -> Self {
                let mut raw = [0u8; size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(raw)
            }

            fn into_value(self) -> PrimitiveValue {
                PrimitiveValue::$tag(self)
            }

            fn from_value(value: &PrimitiveValue) -> Option<Self> {
                match value {
                    PrimitiveValue::$tag(v) => Some(*v),
                    _ => None,
                }
            }
        }
    )*};
}

numeric_primitive! {
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

impl sealed::Sealed for bool {}

impl Primitive for bool {
    const TAG: PrimitiveTag = PrimitiveTag::Bool;

    fn encode_into(self, out: &mut [u8]) {
        out[0] = self as u8;
    }

    fn decode_exact(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn into_value(self) -> PrimitiveValue {
        PrimitiveValue::Bool(self)
    }

    fn from_value(value: &PrimitiveValue) -> Option<Self> {
        match value {
            PrimitiveValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl sealed::Sealed for WideChar {}

impl Primitive for WideChar {
    const TAG: PrimitiveTag = PrimitiveTag::Char;

    fn encode_into(self, out: &mut [u8]) {
        out.copy_from_slice(&self.0.to_ne_bytes());
    }

    fn decode_exact(bytes: &[u8]) -> Self {
        WideChar(u16::from_ne_bytes([bytes[0], bytes[1]]))
    }

    fn into_value(self) -> PrimitiveValue {
        PrimitiveValue::Char(self)
    }

    fn from_value(value: &PrimitiveValue) -> Option<Self> {
        match value {
            PrimitiveValue::Char(v) => Some(*v),
            _ => None,
        }
    }
}

impl sealed::Sealed for Address {}

impl Primitive for Address {
    const TAG: PrimitiveTag = PrimitiveTag::Address;

    fn encode_into(self, out: &mut [u8]) {
        out.copy_from_slice(&self.0.to_ne_bytes());
    }

    // Pointer reinterpretation: the width follows the host's pointer size.
    fn decode_exact(bytes: &[u8]) -> Self {
        let mut raw = [0u8; size_of::<usize>()];
        raw.copy_from_slice(bytes);
        Address(usize::from_ne_bytes(raw))
    }

    fn into_value(self) -> PrimitiveValue {
        PrimitiveValue::Address(self)
    }

    fn from_value(value: &PrimitiveValue) -> Option<Self> {
        match value {
            PrimitiveValue::Address(v) => Some(*v),
            _ => None,
        }
    }
}

impl ArrayElement for i8 {}
impl ArrayElement for u8 {}
impl ArrayElement for i16 {}
impl ArrayElement for i32 {}
impl ArrayElement for i64 {}
impl ArrayElement for f32 {}
impl ArrayElement for f64 {}
impl ArrayElement for WideChar {}
