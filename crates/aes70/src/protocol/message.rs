// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OCP.1 message bodies.
//!
//! Sized messages carry their own leading size field. The codec writes it
//! verbatim; [`encode_pdu`](super::encode_pdu) patches it to the true length
//! when the message is framed.

use crate::codec::{Blob, CodecResult, Decode, Decoder, Encode, Encoder};
use crate::types::{Event, EventId, ExceptionType, MethodId, NotificationType, ONo, Status};

use super::constants::PduType;

/// Encoded size of the fixed part of a [`Command`].
pub const COMMAND_HEADER_SIZE: usize = 17;
/// Encoded size of the fixed part of a [`Response`].
pub const RESPONSE_HEADER_SIZE: usize = 10;
/// Encoded size of the fixed part of a [`Notification1`] with an empty context.
pub const NOTIFICATION1_HEADER_SIZE: usize = 23;
/// Encoded size of the fixed part of a [`Notification2`].
pub const NOTIFICATION2_HEADER_SIZE: usize = 13;

// ============================================================================
// Parameters
// ============================================================================

/// A method's parameter list: encodes as the concatenated parameters and
/// knows how many there are.
pub trait ParamList: Encode {
    fn param_count(&self) -> u8;
}

impl ParamList for () {
    fn param_count(&self) -> u8 {
        0
    }
}

macro_rules! impl_param_list_tuple {
    ($count:expr; $($name:ident),+) => {
        impl<$($name: Encode),+> ParamList for ($($name,)+) {
            fn param_count(&self) -> u8 {
                $count
            }
        }
    };
}

impl_param_list_tuple!(1; A);
impl_param_list_tuple!(2; A, B);
impl_param_list_tuple!(3; A, B, C);
impl_param_list_tuple!(4; A, B, C, D);

/// Encoded parameters plus their count, as carried by commands and responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    pub count: u8,
    pub bytes: Vec<u8>,
}

impl Parameters {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn encode<P: ParamList + ?Sized>(params: &P) -> CodecResult<Self> {
        Ok(Self {
            count: params.param_count(),
            bytes: crate::codec::encode(params)?,
        })
    }
}

// ============================================================================
// Command
// ============================================================================

/// A method invocation on one target object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub command_size: u32,
    pub handle: u32,
    pub target_ono: ONo,
    pub method_id: MethodId,
    pub param_count: u8,
    /// Encoded parameters, opaque to the framer.
    pub parameters: Vec<u8>,
}

impl Command {
    pub fn new(
        handle: u32,
        target_ono: ONo,
        method_id: MethodId,
        param_count: u8,
        parameters: Vec<u8>,
    ) -> Self {
        Self {
            command_size: 0,
            handle,
            target_ono,
            method_id,
            param_count,
            parameters,
        }
    }

    /// Decode the parameters as a single value (usually a tuple).
    pub fn decode_params<T: Decode>(&self) -> CodecResult<T> {
        crate::codec::decode(&self.parameters)
    }
}

impl Encode for Command {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        enc.write_u32(self.command_size);
        enc.write_u32(self.handle);
        enc.write_u32(self.target_ono);
        self.method_id.encode(enc)?;
        enc.write_u8(self.param_count);
        enc.write_bytes(&self.parameters);
        Ok(())
    }
}

impl Decode for Command {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Ok(Self {
            command_size: dec.read_u32()?,
            handle: dec.read_u32()?,
            target_ono: dec.read_u32()?,
            method_id: MethodId::decode(dec)?,
            param_count: dec.read_u8()?,
            parameters: dec.read_rest().to_vec(),
        })
    }
}

// ============================================================================
// Response
// ============================================================================

/// Answer to a [`Command`] sent with [`PduType::CommandRrq`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub response_size: u32,
    pub handle: u32,
    pub status: Status,
    pub param_count: u8,
    pub parameters: Vec<u8>,
}

impl Response {
    pub fn new(handle: u32, status: Status, param_count: u8, parameters: Vec<u8>) -> Self {
        Self {
            response_size: 0,
            handle,
            status,
            param_count,
            parameters,
        }
    }

    /// A response carrying only a status.
    pub fn status_only(handle: u32, status: Status) -> Self {
        Self::new(handle, status, 0, Vec::new())
    }

    pub fn decode_params<T: Decode>(&self) -> CodecResult<T> {
        crate::codec::decode(&self.parameters)
    }
}

impl Encode for Response {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        enc.write_u32(self.response_size);
        enc.write_u32(self.handle);
        self.status.encode(enc)?;
        enc.write_u8(self.param_count);
        enc.write_bytes(&self.parameters);
        Ok(())
    }
}

impl Decode for Response {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Ok(Self {
            response_size: dec.read_u32()?,
            handle: dec.read_u32()?,
            status: Status::decode(dec)?,
            param_count: dec.read_u8()?,
            parameters: dec.read_rest().to_vec(),
        })
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Version 1 event notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification1 {
    pub notification_size: u32,
    /// Subscriber object the notification is addressed to.
    pub target_ono: ONo,
    /// Subscriber method.
    pub method_id: MethodId,
    pub param_count: u8,
    /// Subscriber context, echoed back from the subscription.
    pub context: Blob,
    pub event: Event,
    /// Event-specific parameters, raw.
    pub event_parameters: Vec<u8>,
}

impl Encode for Notification1 {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        enc.write_u32(self.notification_size);
        enc.write_u32(self.target_ono);
        self.method_id.encode(enc)?;
        enc.write_u8(self.param_count);
        self.context.encode(enc)?;
        self.event.encode(enc)?;
        enc.write_bytes(&self.event_parameters);
        Ok(())
    }
}

impl Decode for Notification1 {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Ok(Self {
            notification_size: dec.read_u32()?,
            target_ono: dec.read_u32()?,
            method_id: MethodId::decode(dec)?,
            param_count: dec.read_u8()?,
            context: Blob::decode(dec)?,
            event: Event::decode(dec)?,
            event_parameters: dec.read_rest().to_vec(),
        })
    }
}

/// Exception payload of a version 2 notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionData {
    pub exception_type: ExceptionType,
    pub try_again: bool,
    pub exception_data: Blob,
}

impl Encode for ExceptionData {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        enc.nested::<Self, _>(|enc| {
            self.exception_type.encode(enc)?;
            enc.write_bool(self.try_again);
            self.exception_data.encode(enc)
        })
    }
}

impl Decode for ExceptionData {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Ok(Self {
            exception_type: ExceptionType::decode(dec)?,
            try_again: dec.read_bool()?,
            exception_data: Blob::decode(dec)?,
        })
    }
}

/// Data of a version 2 notification, tagged by notification type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification2Data {
    /// Event parameters, raw.
    Event(Vec<u8>),
    Exception(ExceptionData),
}

/// Version 2 notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification2 {
    pub notification_size: u32,
    pub event: Event,
    pub data: Notification2Data,
}

impl Notification2 {
    pub fn notification_type(&self) -> NotificationType {
        match self.data {
            Notification2Data::Event(_) => NotificationType::Event,
            Notification2Data::Exception(_) => NotificationType::Exception,
        }
    }
}

impl Encode for Notification2 {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        enc.write_u32(self.notification_size);
        self.event.encode(enc)?;
        self.notification_type().encode(enc)?;
        match &self.data {
            Notification2Data::Event(params) => enc.write_bytes(params),
            Notification2Data::Exception(data) => data.encode(enc)?,
        }
        Ok(())
    }
}

impl Decode for Notification2 {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let notification_size = dec.read_u32()?;
        let event = Event::decode(dec)?;
        let data = match NotificationType::decode(dec)? {
            NotificationType::Event => Notification2Data::Event(dec.read_rest().to_vec()),
            NotificationType::Exception => Notification2Data::Exception(ExceptionData::decode(dec)?),
        };
        Ok(Self {
            notification_size,
            event,
            data,
        })
    }
}

// ============================================================================
// KeepAlive
// ============================================================================

/// Heartbeat announcement. The variant follows from the body length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAlive {
    /// 16-bit heartbeat period in seconds.
    Seconds(u16),
    /// 32-bit heartbeat period in milliseconds.
    Milliseconds(u32),
}

impl KeepAlive {
    /// Pick the compact variant when the interval is a whole number of seconds.
    pub fn for_interval(interval: std::time::Duration) -> Self {
        let millis = interval.as_millis();
        if millis % 1000 == 0 {
            if let Ok(secs) = u16::try_from(millis / 1000) {
                return KeepAlive::Seconds(secs);
            }
        }
        KeepAlive::Milliseconds(u32::try_from(millis).unwrap_or(u32::MAX))
    }

    pub fn interval(&self) -> std::time::Duration {
        match *self {
            KeepAlive::Seconds(s) => std::time::Duration::from_secs(u64::from(s)),
            KeepAlive::Milliseconds(ms) => std::time::Duration::from_millis(u64::from(ms)),
        }
    }
}

impl Encode for KeepAlive {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        match *self {
            KeepAlive::Seconds(s) => enc.write_u16(s),
            KeepAlive::Milliseconds(ms) => enc.write_u32(ms),
        }
        Ok(())
    }
}

impl Decode for KeepAlive {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        match dec.remaining() {
            2 => Ok(KeepAlive::Seconds(dec.read_u16()?)),
            4 => Ok(KeepAlive::Milliseconds(dec.read_u32()?)),
            n => Err(crate::codec::CodecError::InvalidValue(format!(
                "keepalive body of {n} bytes"
            ))),
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// Any OCP.1 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Command without a response.
    Command(Command),
    /// Command requiring a response.
    CommandRrq(Command),
    Response(Response),
    Notification1(Notification1),
    Notification2(Notification2),
    KeepAlive(KeepAlive),
}

impl Message {
    /// PDU type a message of this kind travels in.
    pub fn pdu_type(&self) -> PduType {
        match self {
            Message::Command(_) => PduType::Command,
            Message::CommandRrq(_) => PduType::CommandRrq,
            Message::Response(_) => PduType::Response,
            Message::Notification1(_) => PduType::Notification1,
            Message::Notification2(_) => PduType::Notification2,
            Message::KeepAlive(_) => PduType::KeepAlive,
        }
    }

    /// Whether the message starts with a `u32` size field.
    pub fn is_sized(&self) -> bool {
        !matches!(self, Message::KeepAlive(_))
    }

    /// Decode one message body of the given PDU type.
    pub fn decode_as(pdu_type: PduType, dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Ok(match pdu_type {
            PduType::Command => Message::Command(Command::decode(dec)?),
            PduType::CommandRrq => Message::CommandRrq(Command::decode(dec)?),
            PduType::Response => Message::Response(Response::decode(dec)?),
            PduType::Notification1 => Message::Notification1(Notification1::decode(dec)?),
            PduType::Notification2 => Message::Notification2(Notification2::decode(dec)?),
            PduType::KeepAlive => Message::KeepAlive(KeepAlive::decode(dec)?),
        })
    }
}

impl Encode for Message {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        match self {
            Message::Command(c) | Message::CommandRrq(c) => c.encode(enc),
            Message::Response(r) => r.encode(enc),
            Message::Notification1(n) => n.encode(enc),
            Message::Notification2(n) => n.encode(enc),
            Message::KeepAlive(k) => k.encode(enc),
        }
    }
}

/// Event notification as seen by the controller side, independent of version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNotification {
    pub event: Event,
    /// Subscriber context echoed from the subscription (empty for v2).
    pub context: Blob,
    /// Raw event parameters, empty for exceptions.
    pub parameters: Vec<u8>,
    /// Set for v2 exception notifications.
    pub exception: Option<ExceptionData>,
}

impl EventNotification {
    pub fn event_id(&self) -> EventId {
        self.event.event_id
    }

    /// Decode the event parameters as a single value.
    pub fn decode_params<T: Decode>(&self) -> CodecResult<T> {
        crate::codec::decode(&self.parameters)
    }
}

impl From<Notification1> for EventNotification {
    fn from(n: Notification1) -> Self {
        Self {
            event: n.event,
            context: n.context,
            parameters: n.event_parameters,
            exception: None,
        }
    }
}

impl From<Notification2> for EventNotification {
    fn from(n: Notification2) -> Self {
        let (parameters, exception) = match n.data {
            Notification2Data::Event(params) => (params, None),
            Notification2Data::Exception(data) => (Vec::new(), Some(data)),
        };
        Self {
            event: n.event,
            context: Blob::default(),
            parameters,
            exception,
        }
    }
}
