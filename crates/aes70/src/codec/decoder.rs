// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Forward-only read cursor.

use super::{CodecConfig, CodecError, CodecResult, Decode, Endianness, LengthTagging};

/// Generate an integer reader honouring the configured byte order.
macro_rules! impl_read_int {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> CodecResult<$type> {
            let mut bytes = [0u8; $size];
            bytes.copy_from_slice(self.read_bytes($size)?);
            Ok(match self.config.endianness {
                Endianness::Big => <$type>::from_be_bytes(bytes),
                Endianness::Little => <$type>::from_le_bytes(bytes),
            })
        }
    };
}

/// Input side of the codec. Never moves backwards.
pub struct Decoder<'a> {
    buf: &'a [u8],
    offset: usize,
    config: CodecConfig,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_config(buf, CodecConfig::WIRE)
    }

    pub fn with_config(buf: &'a [u8], config: CodecConfig) -> Self {
        Self {
            buf,
            offset: 0,
            config,
        }
    }

    pub fn config(&self) -> CodecConfig {
        self.config
    }

    impl_read_int!(read_u8, u8, 1);
    impl_read_int!(read_u16, u16, 2);
    impl_read_int!(read_u32, u32, 4);
    impl_read_int!(read_u64, u64, 8);
    impl_read_int!(read_i8, i8, 1);
    impl_read_int!(read_i16, i16, 2);
    impl_read_int!(read_i32, i32, 4);
    impl_read_int!(read_i64, i64, 8);

    pub fn read_f32(&mut self) -> CodecResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> CodecResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_bool(&mut self) -> CodecResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidValue(format!(
                "boolean byte {other:#04x} at offset {}",
                self.offset - 1
            ))),
        }
    }

    /// Borrow the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(CodecError::TooShort {
                offset: self.offset,
                needed: len,
                remaining,
            });
        }
        let slice = &self.buf[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Borrow everything that is left.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.offset..];
        self.offset = self.buf.len();
        slice
    }

    /// Read a length tag; `None` means untagged (consume to end).
    pub fn read_length(&mut self, tagging: LengthTagging) -> CodecResult<Option<usize>> {
        match tagging {
            LengthTagging::Tagged16 => Ok(Some(usize::from(self.read_u16()?))),
            LengthTagging::Untagged => Ok(None),
        }
    }

    /// Read a string whose tag counts Unicode scalar values.
    pub fn read_string(&mut self) -> CodecResult<String> {
        let start = self.offset;
        let bytes = match self.read_length(self.config.string_length_tagging)? {
            Some(count) => {
                let begin = self.offset;
                for _ in 0..count {
                    let lead = self.read_bytes(1)?[0];
                    let width = utf8_width(lead).ok_or(CodecError::InvalidString {
                        offset: self.offset - 1,
                    })?;
                    self.read_bytes(width - 1)?;
                }
                &self.buf[begin..self.offset]
            }
            None => self.read_rest(),
        };
        let text_offset = start + (self.offset - start - bytes.len());
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidString {
                offset: text_offset,
            })
    }

    /// Read a byte blob.
    pub fn read_blob(&mut self) -> CodecResult<Vec<u8>> {
        match self.read_length(self.config.array_length_tagging)? {
            Some(len) => Ok(self.read_bytes(len)?.to_vec()),
            None => Ok(self.read_rest().to_vec()),
        }
    }

    /// Read a list: the count read first bounds the element loop.
    pub fn read_list<T: Decode>(&mut self) -> CodecResult<Vec<T>> {
        match self.read_length(self.config.array_length_tagging)? {
            Some(count) => {
                // Every element takes at least one byte, so cap the reservation.
                let mut items = Vec::with_capacity(count.min(self.remaining()));
                for _ in 0..count {
                    items.push(T::decode(self)?);
                }
                Ok(items)
            }
            None => {
                let mut items = Vec::new();
                while !self.is_empty() {
                    items.push(T::decode(self)?);
                }
                Ok(items)
            }
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fail unless the whole buffer has been consumed.
    pub fn finish(&self) -> CodecResult<()> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(CodecError::TrailingBytes { remaining }),
        }
    }
}

/// Byte width of a UTF-8 sequence from its lead byte.
fn utf8_width(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_bytes_reports_offset() {
        let data = [1u8, 2, 3];
        let mut dec = Decoder::new(&data);
        dec.read_u16().unwrap();
        assert_eq!(
            dec.read_u16().unwrap_err(),
            CodecError::TooShort {
                offset: 2,
                needed: 2,
                remaining: 1
            }
        );
    }

    #[test]
    fn test_read_rest_empties_cursor() {
        let data = [0xAAu8, 1, 2, 3];
        let mut dec = Decoder::new(&data);
        assert_eq!(dec.read_u8().unwrap(), 0xAA);
        assert_eq!(dec.read_rest(), &[1, 2, 3]);
        assert!(dec.is_empty());
        assert!(dec.finish().is_ok());
    }

    #[test]
    fn test_overlong_list_count_fails_cleanly() {
        // Claims 0xFFFF elements with only two bytes of payload.
        let data = [0xFFu8, 0xFF, 0x00, 0x01];
        let mut dec = Decoder::new(&data);
        assert!(matches!(
            dec.read_list::<u16>(),
            Err(CodecError::TooShort { .. })
        ));
    }

    #[test]
    fn test_utf8_width_table() {
        assert_eq!(utf8_width(b'a'), Some(1));
        assert_eq!(utf8_width(0xC3), Some(2));
        assert_eq!(utf8_width(0xE2), Some(3));
        assert_eq!(utf8_width(0xF0), Some(4));
        assert_eq!(utf8_width(0x80), None);
        assert_eq!(utf8_width(0xFF), None);
    }
}
