// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Codec impls for primitives, strings, lists, blobs and tuples.

use super::{CodecResult, Decode, Decoder, Encode, Encoder};

macro_rules! impl_codec_int {
    ($type:ty, $write:ident, $read:ident) => {
        impl Encode for $type {
            fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
                enc.$write(*self);
                Ok(())
            }
        }

        impl Decode for $type {
            fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
                dec.$read()
            }
        }
    };
}

impl_codec_int!(u8, write_u8, read_u8);
impl_codec_int!(u16, write_u16, read_u16);
impl_codec_int!(u32, write_u32, read_u32);
impl_codec_int!(u64, write_u64, read_u64);
impl_codec_int!(i8, write_i8, read_i8);
impl_codec_int!(i16, write_i16, read_i16);
impl_codec_int!(i32, write_i32, read_i32);
impl_codec_int!(i64, write_i64, read_i64);
impl_codec_int!(f32, write_f32, read_f32);
impl_codec_int!(f64, write_f64, read_f64);
impl_codec_int!(bool, write_bool, read_bool);

impl Encode for str {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        enc.write_string(self)
    }
}

impl Encode for String {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        enc.write_string(self)
    }
}

impl Decode for String {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        dec.read_string()
    }
}

impl<T: Encode> Encode for [T] {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        enc.write_length(self.len(), enc.config().array_length_tagging)?;
        for item in self {
            item.encode(enc)?;
        }
        Ok(())
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        self.as_slice().encode(enc)
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        dec.read_list()
    }
}

/// Length-tagged opaque bytes (`OcaBlob`).
///
/// Distinct from `Vec<u8>` only in intent; both share the same encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Blob(pub Vec<u8>);

impl Blob {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Blob {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Encode for Blob {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        enc.write_blob(&self.0)
    }
}

impl Decode for Blob {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        dec.read_blob().map(Blob)
    }
}

impl Encode for () {
    fn encode(&self, _enc: &mut Encoder) -> CodecResult<()> {
        Ok(())
    }
}

impl Decode for () {
    fn decode(_dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Ok(())
    }
}

macro_rules! impl_codec_tuple {
    ($($name:ident),+) => {
        impl<$($name: Encode),+> Encode for ($($name,)+) {
            #[allow(non_snake_case)]
            fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
                let ($($name,)+) = self;
                $( $name.encode(enc)?; )+
                Ok(())
            }
        }

        impl<$($name: Decode),+> Decode for ($($name,)+) {
            fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
                Ok(($($name::decode(dec)?,)+))
            }
        }
    };
}

impl_codec_tuple!(A);
impl_codec_tuple!(A, B);
impl_codec_tuple!(A, B, C);
impl_codec_tuple!(A, B, C, D);
