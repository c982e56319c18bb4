// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device-side object contract.
//!
//! Every addressable object implements [`OcaObject`]. The controller answers
//! the common `OcaRoot` methods (class identification, lockable, lock,
//! unlock, role, lock read-only) itself and hands everything else to
//! [`OcaObject::handle_command`].

use std::sync::Arc;

use crate::codec::Encode;
use crate::protocol::{Command, Parameters};
use crate::types::{ClassIdentification, MethodId, ONo, PropertyChangeType, PropertyId, Status};

use super::Device;

/// Identifies one controller session on a device.
pub type ControllerId = u64;

/// Access class of a method, used for lock enforcement.
///
/// A read-only lock held by another controller only lets getters through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Getter,
    Setter,
    Action,
}

/// Per-command context passed to handlers.
pub struct CommandContext<'a> {
    /// Object the command targets.
    pub ono: ONo,
    /// Controller that sent the command.
    pub controller: ControllerId,
    pub device: &'a Device,
}

impl CommandContext<'_> {
    /// Announce a property change of the target object.
    pub fn property_changed<V: Encode + ?Sized>(
        &self,
        property: PropertyId,
        value: &V,
        change_type: PropertyChangeType,
    ) -> usize {
        self.device
            .notify_property_changed(self.ono, property, value, change_type)
    }
}

/// An object hosted by a device.
pub trait OcaObject: Send + Sync + 'static {
    fn class_identification(&self) -> ClassIdentification;

    fn role(&self) -> String {
        String::new()
    }

    fn lockable(&self) -> bool {
        true
    }

    /// Access class of `method`; unknown methods count as actions.
    fn method_kind(&self, _method: MethodId) -> MethodKind {
        MethodKind::Action
    }

    /// Execute a class-specific method.
    ///
    /// A returned status becomes a status-only response. Panics are caught
    /// by the controller and reported as `DeviceError`.
    fn handle_command(
        &self,
        command: &Command,
        ctx: &CommandContext<'_>,
    ) -> Result<Parameters, Status>;
}

/// Builds an object from its role, for [`Device::construct`].
pub type ObjectFactory = Arc<dyn Fn(&str) -> Arc<dyn OcaObject> + Send + Sync>;
