// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Growable write buffer with cycle tracking.

use super::{CodecConfig, CodecError, CodecResult, Endianness, LengthTagging};

/// Generate an integer writer honouring the configured byte order.
macro_rules! impl_write_int {
    ($name:ident, $type:ty) => {
        pub fn $name(&mut self, value: $type) {
            match self.config.endianness {
                Endianness::Big => self.buf.extend_from_slice(&value.to_be_bytes()),
                Endianness::Little => self.buf.extend_from_slice(&value.to_le_bytes()),
            }
        }
    };
}

/// Output side of the codec.
///
/// Structures call [`Encoder::nested`] around their fields so that a type
/// which (directly or through other structures) contains itself is reported
/// instead of recursing without bound.
pub struct Encoder {
    buf: Vec<u8>,
    config: CodecConfig,
    chain: Vec<&'static str>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::with_config(CodecConfig::WIRE)
    }

    pub fn with_config(config: CodecConfig) -> Self {
        Self {
            buf: Vec::with_capacity(64),
            config,
            chain: Vec::new(),
        }
    }

    pub fn config(&self) -> CodecConfig {
        self.config
    }

    impl_write_int!(write_u8, u8);
    impl_write_int!(write_u16, u16);
    impl_write_int!(write_u32, u32);
    impl_write_int!(write_u64, u64);
    impl_write_int!(write_i8, i8);
    impl_write_int!(write_i16, i16);
    impl_write_int!(write_i32, i32);
    impl_write_int!(write_i64, i64);

    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    /// Append raw bytes without any length tag.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Write a length tag according to `tagging`.
    pub fn write_length(&mut self, len: usize, tagging: LengthTagging) -> CodecResult<()> {
        match tagging {
            LengthTagging::Tagged16 => {
                let tag = u16::try_from(len).map_err(|_| CodecError::LengthOverflow { len })?;
                self.write_u16(tag);
            }
            LengthTagging::Untagged => {}
        }
        Ok(())
    }

    /// Write a string as scalar count + UTF-8 bytes.
    pub fn write_string(&mut self, value: &str) -> CodecResult<()> {
        self.write_length(value.chars().count(), self.config.string_length_tagging)?;
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Write a byte blob as `u16` byte count + bytes.
    pub fn write_blob(&mut self, data: &[u8]) -> CodecResult<()> {
        self.write_length(data.len(), self.config.array_length_tagging)?;
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Run `f` with `T` pushed on the nesting chain.
    ///
    /// Fails with [`CodecError::RecursiveType`] if `T` is already being
    /// encoded further up the chain.
    pub fn nested<T: ?Sized, F>(&mut self, f: F) -> CodecResult<()>
    where
        F: FnOnce(&mut Encoder) -> CodecResult<()>,
    {
        let name = std::any::type_name::<T>();
        if self.chain.contains(&name) {
            return Err(CodecError::RecursiveType(name));
        }
        self.chain.push(name);
        let result = f(self);
        self.chain.pop();
        result
    }

    /// Overwrite four bytes at `offset` with `value` in the configured order.
    ///
    /// Used by the framer to back-patch size fields.
    pub fn patch_u32(&mut self, offset: usize, value: u32) -> CodecResult<()> {
        let remaining = self.buf.len().saturating_sub(offset);
        if remaining < 4 {
            return Err(CodecError::TooShort {
                offset,
                needed: 4,
                remaining,
            });
        }
        let bytes = match self.config.endianness {
            Endianness::Big => value.to_be_bytes(),
            Endianness::Little => value.to_le_bytes(),
        };
        self.buf[offset..offset + 4].copy_from_slice(&bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}
