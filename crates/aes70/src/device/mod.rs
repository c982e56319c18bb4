// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device side: object registry, controller sessions and event fan-out.
//!
//! # Example
//!
//! ```rust,no_run
//! use aes70::device::{Device, DeviceConfig};
//! use aes70::transport::TcpTransportListener;
//!
//! # async fn example() -> aes70::Result<()> {
//! let device = Device::new(DeviceConfig::default())?;
//! let listener = TcpTransportListener::bind("0.0.0.0:65000".parse().unwrap()).await?;
//! device.serve(listener).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod controller;
mod dispatch;
mod endpoint;
mod object;
mod registry;
mod root_block;
mod subscription;

pub use config::DeviceConfig;
pub use controller::{ControllerInfo, ControllerTable, SendOutcome};
pub use dispatch::DispatchTable;
pub use object::{CommandContext, ControllerId, MethodKind, ObjectFactory, OcaObject};
pub use registry::ObjectRegistry;
pub use root_block::Block;
pub use subscription::{
    NotificationVersion, Subscriber, SubscriptionManager, SubscriptionTable, SubscriptionTarget,
};

use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::debug;

use crate::codec::Encode;
use crate::error::Result;
use crate::protocol::constants::root;
use crate::protocol::{Command, Parameters};
use crate::transport::{Transport, TransportListener};
use crate::types::{
    ono, ClassIdentification, Event, LockState, ONo, PropertyChangeType, PropertyId, Status,
};

/// A device: its objects, its controllers and its subscriptions.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    config: DeviceConfig,
    registry: ObjectRegistry,
    controllers: Arc<ControllerTable>,
    subscriptions: Arc<SubscriptionManager>,
}

impl Device {
    /// Create a device with its root block and subscription manager.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let controllers = Arc::new(ControllerTable::new());
        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::clone(&controllers),
            config.max_subscriber_context_length,
        ));
        let registry = ObjectRegistry::new();
        registry.register(ono::ROOT_BLOCK, Arc::new(Block::root()), None)?;
        registry.register(
            ono::SUBSCRIPTION_MANAGER,
            Arc::clone(&subscriptions) as Arc<dyn OcaObject>,
            Some(ono::ROOT_BLOCK),
        )?;
        Ok(Self {
            inner: Arc::new(DeviceInner {
                config,
                registry,
                controllers,
                subscriptions,
            }),
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.inner.registry
    }

    pub fn controllers(&self) -> &ControllerTable {
        &self.inner.controllers
    }

    pub fn subscription_manager(&self) -> &SubscriptionManager {
        &self.inner.subscriptions
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    /// Register `object` at `ono` as a member of the root block.
    pub fn register_object(&self, ono: ONo, object: Arc<dyn OcaObject>) -> Result<()> {
        self.register_object_in(ono, object, ono::ROOT_BLOCK)
    }

    /// Register `object` at `ono` as a member of `container`.
    pub fn register_object_in(
        &self,
        ono: ONo,
        object: Arc<dyn OcaObject>,
        container: ONo,
    ) -> Result<()> {
        self.inner.registry.register(ono, object, Some(container))
    }

    /// Register `object` at a fresh number in the root block.
    pub fn add_object(&self, object: Arc<dyn OcaObject>) -> Result<ONo> {
        self.inner
            .registry
            .register_dynamic(object, Some(ono::ROOT_BLOCK))
    }

    /// Remove `ono`; its version 2 subscribers get an `ObjectDeleted`
    /// exception and all its subscriptions are dropped.
    pub fn deregister_object(&self, ono: ONo) -> Result<Arc<dyn OcaObject>> {
        let object = self.inner.registry.deregister(ono)?;
        self.inner.subscriptions.object_deleted(ono);
        Ok(object)
    }

    pub fn register_class(&self, ident: ClassIdentification, factory: ObjectFactory) {
        self.inner.registry.register_class(ident, factory);
    }

    /// Build an object of class `ident` through the class registry and add
    /// it to the root block.
    pub fn construct(&self, ident: &ClassIdentification, role: &str) -> Result<ONo> {
        self.inner
            .registry
            .construct(ident, role, Some(ono::ROOT_BLOCK))
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Raise `event` with already encoded parameters.
    pub fn notify(&self, event: Event, parameters: &[u8]) -> usize {
        self.inner.subscriptions.notify(event, parameters)
    }

    /// Raise `PropertyChanged` for `property` of `emitter`.
    pub fn notify_property_changed<V: Encode + ?Sized>(
        &self,
        emitter: ONo,
        property: PropertyId,
        value: &V,
        change_type: PropertyChangeType,
    ) -> usize {
        self.inner
            .subscriptions
            .notify_property_changed(emitter, property, value, change_type)
    }

    // ------------------------------------------------------------------
    // Endpoints and controllers
    // ------------------------------------------------------------------

    /// Accept controllers from `listener` until it closes.
    pub async fn serve<L: TransportListener>(&self, listener: L) -> Result<()> {
        endpoint::serve_stream(self.clone(), listener).await
    }

    /// Serve datagram controllers on `socket` until it fails.
    pub async fn serve_datagram(&self, socket: UdpSocket) -> Result<()> {
        endpoint::serve_datagram(self.clone(), socket).await
    }

    /// Start a controller session on an already connected transport.
    pub fn accept(&self, transport: Arc<dyn Transport>) -> Option<ControllerId> {
        controller::start_stream_controller(self, transport)
    }

    /// Close one controller session.
    pub fn close_controller(&self, id: ControllerId) -> bool {
        self.inner.controllers.close(id)
    }

    /// Close every controller session.
    pub fn disconnect_all(&self) -> usize {
        self.inner.controllers.close_all()
    }

    // ------------------------------------------------------------------
    // Command execution
    // ------------------------------------------------------------------

    /// Execute one command on behalf of `controller`.
    pub(crate) fn execute(
        &self,
        command: &Command,
        controller: ControllerId,
    ) -> std::result::Result<Parameters, Status> {
        let target = command.target_ono;
        let object = self.inner.registry.resolve(target).ok_or(Status::BadONo)?;
        let registry = &self.inner.registry;

        match command.method_id {
            root::GET_CLASS_IDENTIFICATION => {
                registry.check_access(target, controller, MethodKind::Getter)?;
                single(object.class_identification())
            }
            root::GET_LOCKABLE => {
                registry.check_access(target, controller, MethodKind::Getter)?;
                single(object.lockable())
            }
            root::GET_ROLE => {
                registry.check_access(target, controller, MethodKind::Getter)?;
                single(object.role())
            }
            root::LOCK | root::LOCK_READONLY => {
                if !object.lockable() {
                    return Err(Status::NotImplemented);
                }
                let state = if command.method_id == root::LOCK {
                    LockState::LockNoReadWrite
                } else {
                    LockState::LockNoWrite
                };
                registry.lock(target, controller, state)?;
                debug!(target, controller, ?state, "object locked");
                Ok(Parameters::empty())
            }
            root::UNLOCK => {
                registry.unlock(target, controller)?;
                debug!(target, controller, "object unlocked");
                Ok(Parameters::empty())
            }
            method => {
                registry.check_access(target, controller, object.method_kind(method))?;
                let ctx = CommandContext {
                    ono: target,
                    controller,
                    device: self,
                };
                object.handle_command(command, &ctx)
            }
        }
    }
}

fn single<T: Encode>(value: T) -> std::result::Result<Parameters, Status> {
    Parameters::encode(&(value,)).map_err(|_| Status::ProcessingFailed)
}
