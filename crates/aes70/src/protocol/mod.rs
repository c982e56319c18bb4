// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OCP.1 messages and PDU framing.

pub mod constants;
pub mod message;
pub mod pdu;

pub use constants::{PduType, DATAGRAM_MAX_PDU_SIZE, DEFAULT_MAX_PDU_SIZE, PDU_HEADER_SIZE};
pub use message::{
    Command, EventNotification, ExceptionData, KeepAlive, Message, Notification1, Notification2,
    Notification2Data, ParamList, Parameters, Response,
};
pub use pdu::{decode_pdu, encode_pdu, hex_dump, read_frame, read_pdu, Pdu, PduError, PduHeader};
