// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-level error type.

use std::time::Duration;

use thiserror::Error;

use crate::codec::CodecError;
use crate::protocol::PduError;
use crate::transport::TransportError;
use crate::types::{ClassIdentification, ONo, Status};

/// Errors surfaced by connections, devices and their helpers.
#[derive(Debug, Error)]
pub enum Error {
    /// Value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A PDU was malformed. The session that read it is torn down.
    #[error("framing error: {0}")]
    Pdu(#[from] PduError),

    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The device answered with a non-OK status.
    #[error("device returned status {0}")]
    Status(Status),

    /// No response arrived in time.
    #[error("command {handle} timed out after {after:?}")]
    Timeout { handle: u32, after: Duration },

    /// The session is not (or no longer) connected.
    #[error("not connected")]
    NotConnected,

    /// The subscription already exists.
    #[error("already subscribed")]
    AlreadySubscribed,

    /// No such subscription.
    #[error("not subscribed")]
    NotSubscribed,

    /// A cached proxy was invalidated by a reconnect.
    #[error("object {0} was invalidated")]
    ObjectInvalidated(ONo),

    /// No factory is registered for the class or any of its ancestors.
    #[error("no class registered for {0}")]
    UnknownClass(ClassIdentification),

    /// The object number is already taken.
    #[error("object number {0} already registered")]
    DuplicateObject(ONo),

    /// Object number 0 is reserved.
    #[error("object number 0 is reserved")]
    InvalidObjectNumber,

    /// The object number is not registered.
    #[error("object number {0} not registered")]
    UnknownObject(ONo),

    /// All reconnect attempts failed.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

impl Error {
    /// The status to send on the wire for a device-side failure.
    pub fn to_status(&self) -> Status {
        match self {
            Error::Status(status) => *status,
            Error::Codec(_) => Status::BadFormat,
            Error::AlreadySubscribed | Error::NotSubscribed => Status::InvalidRequest,
            Error::UnknownObject(_) => Status::BadONo,
            Error::Timeout { .. } => Status::Timeout,
            _ => Status::DeviceError,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_errors_map_to_invalid_request() {
        assert_eq!(Error::AlreadySubscribed.to_status(), Status::InvalidRequest);
        assert_eq!(Error::NotSubscribed.to_status(), Status::InvalidRequest);
    }

    #[test]
    fn test_status_passthrough() {
        assert_eq!(Error::Status(Status::Locked).to_status(), Status::Locked);
        assert_eq!(Error::NotConnected.to_status(), Status::DeviceError);
    }

    #[test]
    fn test_display() {
        let err = Error::Timeout {
            handle: 7,
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "command 7 timed out after 250ms");
    }
}
