// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PDU framing.
//!
//! ```text
//! +------+---------+---------+---------+--------------+----------------+
//! | sync | version | pduSize | pduType | messageCount | messages ...   |
//! |  u8  |   u16   |   u32   |   u8    |     u16      |                |
//! +------+---------+---------+---------+--------------+----------------+
//!          \_______________ pduSize bytes ______________________________/
//! ```
//!
//! Messages follow each other without padding. Sized messages are split on
//! their leading `u32` size field; a keepalive PDU carries exactly one body.

use thiserror::Error;

use crate::codec::{CodecError, Decoder, Encode, Encoder};
use crate::transport::Transport;

use super::constants::{PduType, PDU_HEADER_SIZE, PROTOCOL_VERSION, SYNC};
use super::message::Message;

/// Framing errors. A session that hits one is torn down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PduError {
    #[error("PDU of {len} bytes is shorter than the header")]
    TooShort { len: usize },

    #[error("bad sync byte {0:#04x}")]
    BadSync(u8),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    #[error("PDU size field {declared} disagrees with {actual} bytes")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("PDU of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("unknown PDU type {0}")]
    UnknownType(u8),

    #[error("PDU carries no messages")]
    Empty,

    #[error("message {index} declares {size} bytes with {remaining} available")]
    BadMessageSize {
        index: usize,
        size: usize,
        remaining: usize,
    },

    #[error("{remaining} bytes left after the last message")]
    TrailingBytes { remaining: usize },

    #[error("{found} message in a {expected} PDU")]
    TypeMismatch { expected: PduType, found: PduType },

    #[error("too many messages for one PDU: {0}")]
    TooManyMessages(usize),

    #[error("keepalive PDU must carry exactly one message, got {0}")]
    KeepAliveCount(u16),

    #[error("message decode failed: {0}")]
    Codec(#[from] CodecError),
}

/// A decoded PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub pdu_type: PduType,
    pub messages: Vec<Message>,
}

impl Pdu {
    pub fn new(pdu_type: PduType, messages: Vec<Message>) -> Self {
        Self { pdu_type, messages }
    }

    /// A PDU holding a single message.
    pub fn single(message: Message) -> Self {
        Self {
            pdu_type: message.pdu_type(),
            messages: vec![message],
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PduError> {
        encode_pdu(self.pdu_type, &self.messages)
    }
}

/// Frame `messages` into one PDU of type `pdu_type`.
///
/// Each sized message's size field is patched to its encoded length, then
/// the PDU size is patched.
pub fn encode_pdu(pdu_type: PduType, messages: &[Message]) -> Result<Vec<u8>, PduError> {
    if messages.is_empty() {
        return Err(PduError::Empty);
    }
    let count =
        u16::try_from(messages.len()).map_err(|_| PduError::TooManyMessages(messages.len()))?;

    let mut enc = Encoder::new();
    enc.write_u8(SYNC);
    enc.write_u16(PROTOCOL_VERSION);
    enc.write_u32(0);
    enc.write_u8(pdu_type as u8);
    enc.write_u16(count);

    for message in messages {
        let found = message.pdu_type();
        if found != pdu_type {
            return Err(PduError::TypeMismatch {
                expected: pdu_type,
                found,
            });
        }
        let start = enc.len();
        message.encode(&mut enc)?;
        if message.is_sized() {
            let size = size_field(enc.len() - start)?;
            enc.patch_u32(start, size)?;
        }
    }

    let pdu_size = size_field(enc.len() - 1)?;
    enc.patch_u32(3, pdu_size)?;
    Ok(enc.into_bytes())
}

fn size_field(len: usize) -> Result<u32, PduError> {
    u32::try_from(len).map_err(|_| PduError::TooLarge {
        size: len,
        max: u32::MAX as usize,
    })
}

/// Parsed PDU header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduHeader {
    /// Bytes after the sync byte, header included.
    pub pdu_size: usize,
    pub pdu_type: u8,
    pub message_count: u16,
}

impl PduHeader {
    /// Validate and parse the fixed header at the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, PduError> {
        if bytes.len() < PDU_HEADER_SIZE {
            return Err(PduError::TooShort { len: bytes.len() });
        }
        if bytes[0] != SYNC {
            return Err(PduError::BadSync(bytes[0]));
        }
        let mut dec = Decoder::new(&bytes[1..PDU_HEADER_SIZE]);
        let version = dec.read_u16()?;
        if version != PROTOCOL_VERSION {
            return Err(PduError::UnsupportedVersion(version));
        }
        let pdu_size = dec.read_u32()? as usize;
        if pdu_size < PDU_HEADER_SIZE - 1 {
            return Err(PduError::SizeMismatch {
                declared: pdu_size,
                actual: PDU_HEADER_SIZE - 1,
            });
        }
        Ok(Self {
            pdu_size,
            pdu_type: dec.read_u8()?,
            message_count: dec.read_u16()?,
        })
    }

    /// Total bytes on the wire, sync included.
    pub fn frame_len(&self) -> usize {
        self.pdu_size + 1
    }
}

/// Decode a complete PDU.
pub fn decode_pdu(bytes: &[u8]) -> Result<Pdu, PduError> {
    let header = PduHeader::parse(bytes)?;
    if header.frame_len() != bytes.len() {
        return Err(PduError::SizeMismatch {
            declared: header.pdu_size,
            actual: bytes.len() - 1,
        });
    }
    let pdu_type = PduType::from_u8(header.pdu_type).ok_or(PduError::UnknownType(header.pdu_type))?;
    if header.message_count == 0 {
        return Err(PduError::Empty);
    }

    let body = &bytes[PDU_HEADER_SIZE..];
    if pdu_type == PduType::KeepAlive {
        if header.message_count != 1 {
            return Err(PduError::KeepAliveCount(header.message_count));
        }
        let mut dec = Decoder::new(body);
        let message = Message::decode_as(pdu_type, &mut dec)?;
        return Ok(Pdu::new(pdu_type, vec![message]));
    }

    let mut messages = Vec::with_capacity(usize::from(header.message_count));
    let mut offset = 0;
    for index in 0..usize::from(header.message_count) {
        let remaining = body.len() - offset;
        if remaining < 4 {
            return Err(PduError::BadMessageSize {
                index,
                size: 4,
                remaining,
            });
        }
        let size = u32::from_be_bytes([
            body[offset],
            body[offset + 1],
            body[offset + 2],
            body[offset + 3],
        ]) as usize;
        if size < 4 || size > remaining {
            return Err(PduError::BadMessageSize {
                index,
                size,
                remaining,
            });
        }
        let mut dec = Decoder::new(&body[offset..offset + size]);
        let message = Message::decode_as(pdu_type, &mut dec)?;
        dec.finish()?;
        messages.push(message);
        offset += size;
    }

    if offset != body.len() {
        return Err(PduError::TrailingBytes {
            remaining: body.len() - offset,
        });
    }
    Ok(Pdu::new(pdu_type, messages))
}

/// Read the bytes of one PDU from a transport: header first, then exactly
/// the advertised remainder.
pub async fn read_frame(transport: &dyn Transport, max_size: usize) -> crate::Result<Vec<u8>> {
    let mut frame = transport.read(PDU_HEADER_SIZE).await?;
    let header = PduHeader::parse(&frame)?;
    let frame_len = header.frame_len();
    if frame_len > max_size {
        return Err(PduError::TooLarge {
            size: frame_len,
            max: max_size,
        }
        .into());
    }
    if frame_len > PDU_HEADER_SIZE {
        let rest = transport.read(frame_len - PDU_HEADER_SIZE).await?;
        frame.extend_from_slice(&rest);
    }
    Ok(frame)
}

/// Read and decode one PDU from a transport.
pub async fn read_pdu(transport: &dyn Transport, max_size: usize) -> crate::Result<Pdu> {
    let frame = read_frame(transport, max_size).await?;
    Ok(decode_pdu(&frame)?)
}

/// Space-separated hex dump for trace logging.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{Command, KeepAlive, Response};
    use crate::types::{MethodId, Status};

    fn command(handle: u32, params: Vec<u8>) -> Message {
        Message::CommandRrq(Command::new(
            handle,
            100,
            MethodId::new(1, 1),
            u8::from(!params.is_empty()),
            params,
        ))
    }

    #[test]
    fn test_header_and_sizes_patched() {
        let bytes = encode_pdu(PduType::CommandRrq, &[command(1, vec![])]).unwrap();
        assert_eq!(bytes[0], SYNC);
        assert_eq!(&bytes[1..3], &[0, 1]);
        let pdu_size = u32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]) as usize;
        assert_eq!(pdu_size, bytes.len() - 1);
        assert_eq!(bytes[7], PduType::CommandRrq as u8);
        assert_eq!(&bytes[8..10], &[0, 1]);
        // Command size field patched to 17.
        assert_eq!(&bytes[10..14], &[0, 0, 0, 17]);
    }

    #[test]
    fn test_multi_message_order_preserved() {
        let messages: Vec<Message> = (1..=3).map(|h| command(h, vec![h as u8; h as usize])).collect();
        let bytes = encode_pdu(PduType::CommandRrq, &messages).unwrap();
        let pdu = decode_pdu(&bytes).unwrap();
        assert_eq!(pdu.messages.len(), 3);
        for (i, msg) in pdu.messages.iter().enumerate() {
            let Message::CommandRrq(cmd) = msg else {
                panic!("unexpected message {msg:?}");
            };
            assert_eq!(cmd.handle, i as u32 + 1);
            assert_eq!(cmd.parameters.len(), i + 1);
            assert_eq!(cmd.command_size as usize, 17 + i + 1);
        }
    }

    #[test]
    fn test_keepalive_pdu() {
        let pdu = Pdu::single(Message::KeepAlive(KeepAlive::Seconds(1)));
        let bytes = pdu.encode().unwrap();
        assert_eq!(bytes, [0x3B, 0, 1, 0, 0, 0, 11, 4, 0, 1, 0, 1]);
        assert_eq!(decode_pdu(&bytes).unwrap(), pdu);

        let ms = Pdu::single(Message::KeepAlive(KeepAlive::Milliseconds(250)));
        assert_eq!(decode_pdu(&ms.encode().unwrap()).unwrap(), ms);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let err = encode_pdu(
            PduType::Response,
            &[Message::Response(Response::status_only(1, Status::Ok)), command(2, vec![])],
        )
        .unwrap_err();
        assert!(matches!(err, PduError::TypeMismatch { .. }));
        assert_eq!(encode_pdu(PduType::Response, &[]).unwrap_err(), PduError::Empty);
    }

    #[test]
    fn test_bad_sync_and_short() {
        let mut bytes = encode_pdu(PduType::CommandRrq, &[command(1, vec![])]).unwrap();
        assert!(matches!(decode_pdu(&bytes[..5]), Err(PduError::TooShort { len: 5 })));
        bytes[0] = 0x3C;
        assert_eq!(decode_pdu(&bytes).unwrap_err(), PduError::BadSync(0x3C));
    }

    #[test]
    fn test_size_mismatch_and_trailing() {
        let bytes = encode_pdu(PduType::CommandRrq, &[command(1, vec![9])]).unwrap();

        let mut longer = bytes.clone();
        longer.push(0);
        assert!(matches!(decode_pdu(&longer), Err(PduError::SizeMismatch { .. })));

        // Claim two messages while carrying one.
        let mut miscount = bytes.clone();
        miscount[9] = 2;
        assert!(matches!(
            decode_pdu(&miscount),
            Err(PduError::BadMessageSize { index: 1, .. })
        ));

        // Shrink the message size so a byte is left over.
        let mut trailing = bytes;
        trailing[13] -= 1;
        assert!(decode_pdu(&trailing).is_err());
    }

    #[test]
    fn test_unknown_type_and_zero_count() {
        let mut bytes = encode_pdu(PduType::CommandRrq, &[command(1, vec![])]).unwrap();
        bytes[7] = 9;
        assert_eq!(decode_pdu(&bytes).unwrap_err(), PduError::UnknownType(9));
        bytes[7] = 1;
        bytes[8] = 0;
        bytes[9] = 0;
        assert_eq!(decode_pdu(&bytes).unwrap_err(), PduError::Empty);
    }

    #[test]
    fn test_wrong_version() {
        let mut bytes = Pdu::single(Message::KeepAlive(KeepAlive::Seconds(1)))
            .encode()
            .unwrap();
        bytes[2] = 2;
        assert_eq!(decode_pdu(&bytes).unwrap_err(), PduError::UnsupportedVersion(2));
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x3B, 0x00, 0xFF]), "3b 00 ff");
        assert_eq!(hex_dump(&[]), "");
    }
}
