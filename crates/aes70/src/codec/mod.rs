// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OCP.1 binary codec.
//!
//! Values are written in field order with no tags: both peers must agree on
//! the schema. Integers are big-endian at their natural width, strings carry
//! a `u16` count of Unicode scalar values and lists a `u16` element count.
//!
//! ```
//! use aes70::codec::{decode, encode};
//!
//! let bytes = encode(&("gain".to_string(), -6i16)).unwrap();
//! assert_eq!(bytes, [0x00, 0x04, b'g', b'a', b'i', b'n', 0xFF, 0xFA]);
//! let (name, value): (String, i16) = decode(&bytes).unwrap();
//! assert_eq!((name.as_str(), value), ("gain", -6));
//! ```

mod decoder;
mod encoder;
mod primitives;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use primitives::Blob;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while encoding or decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A value needed more bytes than the buffer had left.
    #[error("buffer too short at offset {offset}: needed {needed} bytes, {remaining} remaining")]
    TooShort {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    /// String payload was not valid UTF-8.
    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidString { offset: usize },

    /// A structure type re-entered itself while being encoded.
    #[error("recursive type {0} while encoding")]
    RecursiveType(&'static str),

    /// A string or list is too long for its 16-bit length tag.
    #[error("length {len} does not fit a 16-bit length tag")]
    LengthOverflow { len: usize },

    /// A decoded value is outside the set the type accepts.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Bytes were left over after a complete value was decoded.
    #[error("{remaining} trailing bytes after value")]
    TrailingBytes { remaining: usize },
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Byte order of multi-byte integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    Big,
    Little,
}

/// How variable-length values announce their length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthTagging {
    /// A `u16` count precedes the value.
    Tagged16,
    /// No count is written; decoding consumes the rest of the buffer.
    Untagged,
}

/// Codec configuration.
///
/// OCP.1 fixes every knob, see [`CodecConfig::WIRE`]. Other configurations
/// only exist for payloads that never cross the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    pub endianness: Endianness,
    pub string_length_tagging: LengthTagging,
    pub array_length_tagging: LengthTagging,
}

impl CodecConfig {
    /// The OCP.1 wire encoding: big-endian, length-tagged strings and lists.
    pub const WIRE: CodecConfig = CodecConfig {
        endianness: Endianness::Big,
        string_length_tagging: LengthTagging::Tagged16,
        array_length_tagging: LengthTagging::Tagged16,
    };
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self::WIRE
    }
}

/// A value with an OCP.1 encoding.
pub trait Encode {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()>;
}

/// A value that can be read back from its OCP.1 encoding.
pub trait Decode: Sized {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self>;
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        (**self).encode(enc)
    }
}

impl<T: Encode + ?Sized> Encode for Box<T> {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        (**self).encode(enc)
    }
}

/// Encode `value` with the wire configuration.
pub fn encode<T: Encode + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    encode_with_config(value, CodecConfig::WIRE)
}

/// Encode `value` with an explicit configuration.
pub fn encode_with_config<T: Encode + ?Sized>(
    value: &T,
    config: CodecConfig,
) -> CodecResult<Vec<u8>> {
    let mut enc = Encoder::with_config(config);
    value.encode(&mut enc)?;
    Ok(enc.into_bytes())
}

/// Decode exactly one `T` from `bytes`; leftover bytes are an error.
pub fn decode<T: Decode>(bytes: &[u8]) -> CodecResult<T> {
    decode_with_config(bytes, CodecConfig::WIRE)
}

/// Decode exactly one `T` from `bytes` with an explicit configuration.
pub fn decode_with_config<T: Decode>(bytes: &[u8], config: CodecConfig) -> CodecResult<T> {
    let mut dec = Decoder::with_config(bytes, config);
    let value = T::decode(&mut dec)?;
    dec.finish()?;
    Ok(value)
}

/// Implement [`Encode`] and [`Decode`] for a plain structure by encoding its
/// fields in declaration order. The structure takes part in cycle detection.
macro_rules! oca_struct {
    ($ty:ident { $($field:ident),+ $(,)? }) => {
        impl $crate::codec::Encode for $ty {
            fn encode(
                &self,
                enc: &mut $crate::codec::Encoder,
            ) -> $crate::codec::CodecResult<()> {
                enc.nested::<Self, _>(|enc| {
                    $( $crate::codec::Encode::encode(&self.$field, enc)?; )+
                    Ok(())
                })
            }
        }

        impl $crate::codec::Decode for $ty {
            fn decode(
                dec: &mut $crate::codec::Decoder<'_>,
            ) -> $crate::codec::CodecResult<Self> {
                Ok(Self {
                    $( $field: $crate::codec::Decode::decode(dec)?, )+
                })
            }
        }
    };
}

pub(crate) use oca_struct;
