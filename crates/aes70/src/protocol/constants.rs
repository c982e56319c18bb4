// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OCP.1 framing constants and well-known method identifiers.

use std::fmt;

/// First byte of every PDU.
pub const SYNC: u8 = 0x3B;

/// OCP.1 protocol version carried in every header.
pub const PROTOCOL_VERSION: u16 = 1;

/// sync(1) + protocolVersion(2) + pduSize(4) + pduType(1) + messageCount(2).
pub const PDU_HEADER_SIZE: usize = 10;

/// Largest PDU accepted from a stream transport.
pub const DEFAULT_MAX_PDU_SIZE: usize = 16 * 1024 * 1024;

/// Largest PDU accepted from a datagram transport.
pub const DATAGRAM_MAX_PDU_SIZE: usize = 1500;

/// PDU type tag. Every message in a PDU shares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PduType {
    /// Command, no response expected.
    Command = 0,
    /// Command, response required.
    CommandRrq = 1,
    Notification1 = 2,
    Response = 3,
    KeepAlive = 4,
    Notification2 = 5,
}

impl PduType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Command),
            1 => Some(Self::CommandRrq),
            2 => Some(Self::Notification1),
            3 => Some(Self::Response),
            4 => Some(Self::KeepAlive),
            5 => Some(Self::Notification2),
            _ => None,
        }
    }
}

impl fmt::Display for PduType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Command => "Command",
            Self::CommandRrq => "CommandRrq",
            Self::Notification1 => "Notification",
            Self::Response => "Response",
            Self::KeepAlive => "KeepAlive",
            Self::Notification2 => "Notification2",
        };
        f.write_str(name)
    }
}

/// `OcaRoot` methods, answered for every object.
pub mod root {
    use crate::types::MethodId;

    pub const GET_CLASS_IDENTIFICATION: MethodId = MethodId::new(1, 1);
    pub const GET_LOCKABLE: MethodId = MethodId::new(1, 2);
    pub const LOCK: MethodId = MethodId::new(1, 3);
    pub const UNLOCK: MethodId = MethodId::new(1, 4);
    pub const GET_ROLE: MethodId = MethodId::new(1, 5);
    pub const LOCK_READONLY: MethodId = MethodId::new(1, 6);
}

/// `OcaBlock` methods served by the root block.
pub mod block {
    use crate::types::MethodId;

    pub const GET_MEMBERS: MethodId = MethodId::new(3, 5);
    pub const GET_MEMBERS_RECURSIVE: MethodId = MethodId::new(3, 6);
}

/// `OcaSubscriptionManager` methods.
pub mod subscription_manager {
    use crate::types::MethodId;

    pub const ADD_SUBSCRIPTION: MethodId = MethodId::new(3, 1);
    pub const REMOVE_SUBSCRIPTION: MethodId = MethodId::new(3, 2);
    pub const DISABLE_NOTIFICATIONS: MethodId = MethodId::new(3, 3);
    pub const RE_ENABLE_NOTIFICATIONS: MethodId = MethodId::new(3, 4);
    pub const ADD_PROPERTY_CHANGE_SUBSCRIPTION: MethodId = MethodId::new(3, 5);
    pub const REMOVE_PROPERTY_CHANGE_SUBSCRIPTION: MethodId = MethodId::new(3, 6);
    pub const GET_MAXIMUM_SUBSCRIBER_CONTEXT_LENGTH: MethodId = MethodId::new(3, 7);
    pub const ADD_SUBSCRIPTION2: MethodId = MethodId::new(3, 8);
    pub const REMOVE_SUBSCRIPTION2: MethodId = MethodId::new(3, 9);
}
