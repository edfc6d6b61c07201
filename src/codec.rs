//! Typed codec
//!
//! Encodes typed keys and values to bytes and back. Iteration order is the
//! byte-lexicographic order of encoded keys, so encodings are chosen to make
//! that order match the logical one:
//!
//! - unsigned integers: fixed-width big-endian (`1u32 < 256u32` as bytes)
//! - signed integers: fixed-width big-endian with the sign bit flipped
//! - strings and byte vectors: raw content, no length prefix, so
//!   `"1" < "11" < "2"`
//! - fixed arrays (hashes): raw bytes
//! - tuples: concatenation, for tag-prefixed keys such as `(b'b', hash)`
//!
//! Strings, byte vectors and [`Bincode`] values consume the rest of the
//! input when decoded, so they may only appear as the last field of a
//! composite.

use std::fmt;

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Failure to encode a value or to decode stored bytes as a type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Unexpected end of input: needed {needed} bytes, {available} available")]
    UnexpectedEnd { needed: usize, available: usize },

    #[error("{0} trailing bytes after decoded value")]
    TrailingBytes(usize),

    #[error("Invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("Invalid bool byte: 0x{0:02x}")]
    InvalidBool(u8),

    #[error("Invalid char byte: 0x{0:02x}")]
    InvalidChar(u8),

    #[error("Bincode decode failed: {0}")]
    Bincode(String),

    #[error("Cannot encode value: {0}")]
    Encode(String),
}

impl CodecError {
    /// True when stored bytes did not match the requested shape
    pub fn is_decode(&self) -> bool {
        !matches!(self, CodecError::Encode(_))
    }
}

// =============================================================================
// Traits
// =============================================================================

/// A type that can be written as key or value bytes
pub trait Encode {
    /// Append the encoding of `self` to `out`
    fn encode_to(&self, out: &mut Vec<u8>) -> Result<(), CodecError>;
}

/// A type that can be read back from key or value bytes
pub trait Decode: Sized {
    /// Decode from the front of `input`, advancing it past the consumed bytes
    fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError>;
}

/// Encode a value into a fresh buffer
pub fn encode<T: Encode + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    value.encode_to(&mut out)?;
    Ok(out)
}

/// Decode a value that must span all of `bytes`
pub fn decode_exact<T: Decode>(bytes: &[u8]) -> Result<T, CodecError> {
    let mut input = bytes;
    let value = T::decode_from(&mut input)?;
    if !input.is_empty() {
        return Err(CodecError::TrailingBytes(input.len()));
    }
    Ok(value)
}

/// Split `n` bytes off the front of `input`
fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], CodecError> {
    if input.len() < n {
        return Err(CodecError::UnexpectedEnd {
            needed: n,
            available: input.len(),
        });
    }
    let (head, tail) = input.split_at(n);
    *input = tail;
    Ok(head)
}

/// Take everything left in `input`
fn take_rest<'a>(input: &mut &'a [u8]) -> &'a [u8] {
    std::mem::take(input)
}

// =============================================================================
// Integers
// =============================================================================

macro_rules! impl_unsigned {
    ($($ty:ty),*) => {$(
        impl Encode for $ty {
            fn encode_to(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
                out.extend_from_slice(&self.to_be_bytes());
                Ok(())
            }
        }

        impl Decode for $ty {
            fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
                let bytes = take(input, std::mem::size_of::<$ty>())?;
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                Ok(<$ty>::from_be_bytes(buf))
            }
        }
    )*};
}

impl_unsigned!(u8, u16, u32, u64, u128);

macro_rules! impl_signed {
    ($($ty:ty => $uty:ty),*) => {$(
        impl Encode for $ty {
            fn encode_to(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
                // Flipping the sign bit orders negatives before positives
                let flipped = (*self as $uty) ^ (1 << (<$uty>::BITS - 1));
                flipped.encode_to(out)
            }
        }

        impl Decode for $ty {
            fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
                let flipped = <$uty>::decode_from(input)?;
                Ok((flipped ^ (1 << (<$uty>::BITS - 1))) as $ty)
            }
        }
    )*};
}

impl_signed!(i32 => u32, i64 => u64);

// =============================================================================
// Scalars
// =============================================================================

impl Encode for bool {
    fn encode_to(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.push(u8::from(*self));
        Ok(())
    }
}

impl Decode for bool {
    fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
        match take(input, 1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidBool(other)),
        }
    }
}

/// One-byte record tags (`'b'`, `'c'`, `'l'`, ...). Only ASCII is accepted.
impl Encode for char {
    fn encode_to(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        if !self.is_ascii() {
            return Err(CodecError::Encode(format!(
                "char {:?} does not fit in one byte",
                self
            )));
        }
        out.push(*self as u8);
        Ok(())
    }
}

impl Decode for char {
    fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
        let byte = take(input, 1)?[0];
        if !byte.is_ascii() {
            return Err(CodecError::InvalidChar(byte));
        }
        Ok(char::from(byte))
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode_to(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.extend_from_slice(self);
        Ok(())
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
        let bytes = take(input, N)?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(bytes);
        Ok(buf)
    }
}

// =============================================================================
// Variable-Length Content
// =============================================================================

impl Encode for str {
    fn encode_to(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl Encode for String {
    fn encode_to(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.as_str().encode_to(out)
    }
}

impl Decode for String {
    fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
        let bytes = take_rest(input);
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

impl Encode for [u8] {
    fn encode_to(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.extend_from_slice(self);
        Ok(())
    }
}

impl Encode for Vec<u8> {
    fn encode_to(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.as_slice().encode_to(out)
    }
}

impl Decode for Vec<u8> {
    fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(take_rest(input).to_vec())
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode_to(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        (**self).encode_to(out)
    }
}

// =============================================================================
// Composites
// =============================================================================

macro_rules! impl_tuple {
    ($($name:ident . $idx:tt),+) => {
        impl<$($name: Encode),+> Encode for ($($name,)+) {
            fn encode_to(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
                $(self.$idx.encode_to(out)?;)+
                Ok(())
            }
        }

        impl<$($name: Decode),+> Decode for ($($name,)+) {
            fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
                Ok(($($name::decode_from(input)?,)+))
            }
        }
    };
}

impl_tuple!(A.0, B.1);
impl_tuple!(A.0, B.1, C.2);

/// Any serde type, stored with bincode (big-endian, fixed-width integers).
///
/// Meant for record values; consumes the rest of the input when decoded.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Bincode<T>(pub T);

impl<T> Bincode<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for Bincode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

impl<T: Serialize> Encode for Bincode<T> {
    fn encode_to(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        bincode_options()
            .serialize_into(out, &self.0)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }
}

impl<T: DeserializeOwned> Decode for Bincode<T> {
    fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
        let bytes = take_rest(input);
        bincode_options()
            .deserialize(bytes)
            .map(Bincode)
            .map_err(|e| CodecError::Bincode(e.to_string()))
    }
}
