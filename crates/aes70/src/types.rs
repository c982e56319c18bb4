// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OCA data types shared by the controller and device halves.

use std::fmt;
use std::str::FromStr;

use crate::codec::{oca_struct, Blob, CodecError, CodecResult, Decode, Decoder, Encode, Encoder};
use crate::protocol::ParamList;

/// Object number, unique within one device.
pub type ONo = u32;

/// Well-known object numbers.
pub mod ono {
    use super::ONo;

    pub const INVALID: ONo = 0;
    pub const DEVICE_MANAGER: ONo = 1;
    pub const SECURITY_MANAGER: ONo = 2;
    pub const FIRMWARE_MANAGER: ONo = 3;
    pub const SUBSCRIPTION_MANAGER: ONo = 4;
    pub const POWER_MANAGER: ONo = 5;
    pub const NETWORK_MANAGER: ONo = 6;
    pub const MEDIA_CLOCK_MANAGER: ONo = 7;
    pub const LIBRARY_MANAGER: ONo = 8;
    pub const AUDIO_PROCESSING_MANAGER: ONo = 9;
    pub const DEVICE_TIME_MANAGER: ONo = 10;
    pub const TASK_MANAGER: ONo = 11;
    pub const CODING_MANAGER: ONo = 12;
    pub const DIAGNOSTIC_MANAGER: ONo = 13;
    pub const ROOT_BLOCK: ONo = 100;
    /// First number handed out by dynamic allocation.
    pub const FIRST_DYNAMIC: ONo = 4096;

    /// True for the reserved manager range.
    pub fn is_manager(ono: ONo) -> bool {
        (DEVICE_MANAGER..=DIAGNOSTIC_MANAGER).contains(&ono)
    }
}

// ============================================================================
// Member identifiers
// ============================================================================

macro_rules! level_index_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            pub def_level: u16,
            pub index: u16,
        }

        impl $name {
            pub const fn new(def_level: u16, index: u16) -> Self {
                Self { def_level, index }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}.{}", self.def_level, self.index)
            }
        }

        impl Encode for $name {
            fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
                enc.write_u16(self.def_level);
                enc.write_u16(self.index);
                Ok(())
            }
        }

        impl Decode for $name {
            fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
                Ok(Self {
                    def_level: dec.read_u16()?,
                    index: dec.read_u16()?,
                })
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let (level, index) = s
                    .split_once('.')
                    .ok_or_else(|| format!("expected <level>.<index>, got {s:?}"))?;
                Ok(Self {
                    def_level: level.parse().map_err(|e| format!("{s:?}: {e}"))?,
                    index: index.parse().map_err(|e| format!("{s:?}: {e}"))?,
                })
            }
        }
    };
}

level_index_id!(
    /// Method identifier: definition level and index within that level.
    MethodId
);
level_index_id!(
    /// Event identifier.
    EventId
);
level_index_id!(
    /// Property identifier.
    PropertyId
);

/// `OcaRoot.PropertyChanged`.
pub const PROPERTY_CHANGED: EventId = EventId::new(1, 1);

// ============================================================================
// Class identification
// ============================================================================

/// Dotted class identifier, e.g. `1.1.3` for `OcaBlock`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ClassId(pub Vec<u16>);

impl ClassId {
    pub fn new(fields: impl Into<Vec<u16>>) -> Self {
        Self(fields.into())
    }

    /// The class this one derives from, or `None` at `OcaRoot`.
    pub fn parent(&self) -> Option<ClassId> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(ClassId(self.0[..self.0.len() - 1].to_vec()))
    }

    /// True when `self` is `other` or one of its descendants.
    pub fn is_a(&self, other: &ClassId) -> bool {
        self.0.starts_with(&other.0)
    }

    pub fn fields(&self) -> &[u16] {
        &self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{field}")?;
        }
        Ok(())
    }
}

impl FromStr for ClassId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split('.')
            .map(|part| {
                part.parse::<u16>()
                    .map_err(|e| format!("invalid class id {s:?}: {e}"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(ClassId)
    }
}

impl Encode for ClassId {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        self.0.encode(enc)
    }
}

impl Decode for ClassId {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Vec::<u16>::decode(dec).map(ClassId)
    }
}

/// Well-known class identifiers.
pub mod class {
    use super::ClassId;

    pub fn root() -> ClassId {
        ClassId::new([1])
    }

    pub fn worker() -> ClassId {
        ClassId::new([1, 1])
    }

    pub fn block() -> ClassId {
        ClassId::new([1, 1, 3])
    }

    pub fn manager() -> ClassId {
        ClassId::new([1, 3])
    }

    pub fn subscription_manager() -> ClassId {
        ClassId::new([1, 3, 4])
    }
}

/// Class ID plus class version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassIdentification {
    pub class_id: ClassId,
    pub class_version: u16,
}

oca_struct!(ClassIdentification {
    class_id,
    class_version
});

impl ClassIdentification {
    pub fn new(class_id: ClassId, class_version: u16) -> Self {
        Self {
            class_id,
            class_version,
        }
    }
}

impl fmt::Display for ClassIdentification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.class_id, self.class_version)
    }
}

/// Object number with its class, as listed by `OcaBlock.GetMembers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectIdentification {
    pub ono: ONo,
    pub class_identification: ClassIdentification,
}

oca_struct!(ObjectIdentification {
    ono,
    class_identification
});

/// A block member together with the block that contains it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMember {
    pub member: ObjectIdentification,
    pub container: ONo,
}

oca_struct!(BlockMember { member, container });

// ============================================================================
// Events and subscriptions
// ============================================================================

/// An event as raised by one emitter object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event {
    pub emitter_ono: ONo,
    pub event_id: EventId,
}

oca_struct!(Event {
    emitter_ono,
    event_id
});

impl Event {
    pub const fn new(emitter_ono: ONo, event_id: EventId) -> Self {
        Self {
            emitter_ono,
            event_id,
        }
    }
}

/// Object number plus method: the subscriber of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OcaMethod {
    pub ono: ONo,
    pub method_id: MethodId,
}

oca_struct!(OcaMethod { ono, method_id });

macro_rules! u8_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl $name {
            pub fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn as_u8(self) -> u8 {
                self as u8
            }
        }

        impl Encode for $name {
            fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
                enc.write_u8(*self as u8);
                Ok(())
            }
        }

        impl Decode for $name {
            fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
                let raw = dec.read_u8()?;
                Self::from_u8(raw).ok_or_else(|| {
                    CodecError::InvalidValue(format!(
                        concat!("unknown ", stringify!($name), " {}"),
                        raw
                    ))
                })
            }
        }
    };
}

u8_enum! {
    /// How notifications for a subscription travel.
    pub enum DeliveryMode {
        /// Over the controller's own reliable connection.
        Normal = 1,
        /// Fire-and-forget datagrams.
        Lightweight = 2,
    }
}

u8_enum! {
    /// What changed in a property-changed event.
    pub enum PropertyChangeType {
        CurrentChanged = 1,
        MinChanged = 2,
        MaxChanged = 3,
        ItemAdded = 4,
        ItemChanged = 5,
        ItemDeleted = 6,
    }
}

u8_enum! {
    /// Lock state of an object as reported to controllers.
    pub enum LockState {
        NoLock = 0,
        LockNoWrite = 1,
        LockNoReadWrite = 2,
    }
}

u8_enum! {
    /// Kind of a version 2 notification.
    pub enum NotificationType {
        Event = 0,
        Exception = 1,
    }
}

u8_enum! {
    /// Why a version 2 subscription ended.
    pub enum ExceptionType {
        Unspecified = 0,
        CancelledByDevice = 1,
        ObjectDeleted = 2,
        DeviceError = 3,
    }
}

// ============================================================================
// Subscription manager parameters
// ============================================================================

/// Parameters of `AddSubscription` (3.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddSubscriptionParams {
    pub event: Event,
    pub subscriber: OcaMethod,
    pub context: Blob,
    pub delivery_mode: DeliveryMode,
    pub destination: Blob,
}

oca_struct!(AddSubscriptionParams {
    event,
    subscriber,
    context,
    delivery_mode,
    destination
});

/// Parameters of `RemoveSubscription` (3.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveSubscriptionParams {
    pub event: Event,
    pub subscriber: OcaMethod,
}

oca_struct!(RemoveSubscriptionParams { event, subscriber });

/// Parameters of `AddPropertyChangeSubscription` (3.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddPropertyChangeSubscriptionParams {
    pub emitter: ONo,
    pub property: PropertyId,
    pub subscriber: OcaMethod,
    pub context: Blob,
    pub delivery_mode: DeliveryMode,
    pub destination: Blob,
}

oca_struct!(AddPropertyChangeSubscriptionParams {
    emitter,
    property,
    subscriber,
    context,
    delivery_mode,
    destination
});

/// Parameters of `RemovePropertyChangeSubscription` (3.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovePropertyChangeSubscriptionParams {
    pub emitter: ONo,
    pub property: PropertyId,
    pub subscriber: OcaMethod,
}

oca_struct!(RemovePropertyChangeSubscriptionParams {
    emitter,
    property,
    subscriber
});

/// Parameters of `AddSubscription2` / `RemoveSubscription2` (3.8, 3.9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription2Params {
    pub event: Event,
    pub delivery_mode: DeliveryMode,
    pub destination: Blob,
}

oca_struct!(Subscription2Params {
    event,
    delivery_mode,
    destination
});

macro_rules! param_count {
    ($($ty:ident => $count:expr),+ $(,)?) => {
        $(
            impl ParamList for $ty {
                fn param_count(&self) -> u8 {
                    $count
                }
            }
        )+
    };
}

param_count! {
    AddSubscriptionParams => 5,
    RemoveSubscriptionParams => 2,
    AddPropertyChangeSubscriptionParams => 6,
    RemovePropertyChangeSubscriptionParams => 3,
    Subscription2Params => 3,
}

// ============================================================================
// Status codes
// ============================================================================

u8_enum! {
    /// `OcaStatus`: result code carried by every response.
    pub enum Status {
        Ok = 0,
        ProtocolVersionError = 1,
        DeviceError = 2,
        Locked = 3,
        BadFormat = 4,
        BadONo = 5,
        ParameterError = 6,
        ParameterOutOfRange = 7,
        NotImplemented = 8,
        InvalidRequest = 9,
        ProcessingFailed = 10,
        BadMethod = 11,
        PartiallySucceeded = 12,
        Timeout = 13,
        BufferOverflow = 14,
        PermissionDenied = 15,
        OutOfMemory = 16,
    }
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "OK",
            Status::ProtocolVersionError => "ProtocolVersionError",
            Status::DeviceError => "DeviceError",
            Status::Locked => "Locked",
            Status::BadFormat => "BadFormat",
            Status::BadONo => "BadONo",
            Status::ParameterError => "ParameterError",
            Status::ParameterOutOfRange => "ParameterOutOfRange",
            Status::NotImplemented => "NotImplemented",
            Status::InvalidRequest => "InvalidRequest",
            Status::ProcessingFailed => "ProcessingFailed",
            Status::BadMethod => "BadMethod",
            Status::PartiallySucceeded => "PartiallySucceeded",
            Status::Timeout => "Timeout",
            Status::BufferOverflow => "BufferOverflow",
            Status::PermissionDenied => "PermissionDenied",
            Status::OutOfMemory => "OutOfMemory",
        };
        f.write_str(name)
    }
}

impl std::error::Error for Status {}

impl From<CodecError> for Status {
    /// Undecodable parameters are the caller's fault.
    fn from(_: CodecError) -> Self {
        Status::BadFormat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};

    #[test]
    fn test_class_id_parse_display() {
        let id: ClassId = "1.1.3".parse().unwrap();
        assert_eq!(id, class::block());
        assert_eq!(id.to_string(), "1.1.3");
        assert!("1.x".parse::<ClassId>().is_err());
    }

    #[test]
    fn test_class_id_parent_chain() {
        let id = class::subscription_manager();
        assert_eq!(id.parent(), Some(class::manager()));
        assert_eq!(class::root().parent(), None);
        assert!(id.is_a(&class::manager()));
        assert!(!id.is_a(&class::worker()));
    }

    #[test]
    fn test_class_identification_wire() {
        let ident = ClassIdentification::new(class::block(), 2);
        assert_eq!(
            encode(&ident).unwrap(),
            [0x00, 0x03, 0x00, 0x01, 0x00, 0x01, 0x00, 0x03, 0x00, 0x02]
        );
        assert_eq!(decode::<ClassIdentification>(&encode(&ident).unwrap()).unwrap(), ident);
    }

    #[test]
    fn test_method_id_from_str() {
        assert_eq!("3.5".parse::<MethodId>().unwrap(), MethodId::new(3, 5));
        assert!("35".parse::<MethodId>().is_err());
        assert_eq!(MethodId::new(1, 2).to_string(), "1.2");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::from_u8(5), Some(Status::BadONo));
        assert_eq!(Status::OutOfMemory.as_u8(), 16);
        assert_eq!(Status::from_u8(17), None);
        assert!(matches!(
            decode::<Status>(&[0xFE]),
            Err(CodecError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_well_known_onos() {
        assert!(ono::is_manager(ono::SUBSCRIPTION_MANAGER));
        assert!(!ono::is_manager(ono::ROOT_BLOCK));
        assert!(!ono::is_manager(ono::INVALID));
    }
}
