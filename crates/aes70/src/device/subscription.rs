// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription table and the subscription manager object (ONo 4).
//!
//! Subscriptions are keyed by `(emitter, eventID)` or `(emitter,
//! propertyID)`. Each key holds the subscriber descriptors; a controller
//! has at most one descriptor per key and subscriber method (version 1) or
//! one per key (version 2).
//!
//! Notifications are pushed onto the destination controller's outbound
//! queue: the controller whose peer the subscription's destination blob
//! names, else the one that subscribed. A destination that is gone removes
//! the subscriber; a full queue only loses that one notification.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::codec::{encode, Blob, Encode};
use crate::error::{Error, Result};
use crate::protocol::constants::subscription_manager as methods;
use crate::protocol::{
    Command, ExceptionData, Message, Notification1, Notification2, Notification2Data, Parameters,
};
use crate::types::{
    class, AddPropertyChangeSubscriptionParams, AddSubscriptionParams, ClassIdentification,
    DeliveryMode, Event, ExceptionType, MethodId, OcaMethod, ONo, PropertyChangeType, PropertyId,
    RemovePropertyChangeSubscriptionParams, RemoveSubscriptionParams, Status, Subscription2Params,
    PROPERTY_CHANGED,
};

use super::controller::{ControllerTable, SendOutcome};
use super::dispatch::DispatchTable;
use super::object::{CommandContext, ControllerId, MethodKind, OcaObject};

/// What a subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionTarget {
    Event(Event),
    Property { emitter: ONo, property: PropertyId },
}

impl SubscriptionTarget {
    pub fn emitter(&self) -> ONo {
        match self {
            SubscriptionTarget::Event(event) => event.emitter_ono,
            SubscriptionTarget::Property { emitter, .. } => *emitter,
        }
    }
}

/// Notification message format a subscriber receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationVersion {
    V1,
    V2,
}

/// One subscriber of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub controller: ControllerId,
    /// Method called on the controller side (version 1 only).
    pub method: OcaMethod,
    pub context: Blob,
    pub delivery_mode: DeliveryMode,
    pub destination: Blob,
    pub version: NotificationVersion,
}

impl Subscriber {
    fn same_identity(&self, other: &Subscriber) -> bool {
        self.controller == other.controller
            && self.version == other.version
            && (self.version == NotificationVersion::V2 || self.method == other.method)
    }

    fn v1(controller: ControllerId, method: OcaMethod) -> Self {
        Self {
            controller,
            method,
            context: Blob::default(),
            delivery_mode: DeliveryMode::Normal,
            destination: Blob::default(),
            version: NotificationVersion::V1,
        }
    }

    fn v2(controller: ControllerId) -> Self {
        Self {
            controller,
            method: OcaMethod {
                ono: 0,
                method_id: MethodId::new(0, 0),
            },
            context: Blob::default(),
            delivery_mode: DeliveryMode::Normal,
            destination: Blob::default(),
            version: NotificationVersion::V2,
        }
    }
}

// ============================================================================
// Table
// ============================================================================

/// Shared subscription table of a device.
#[derive(Default)]
pub struct SubscriptionTable {
    entries: RwLock<HashMap<SubscriptionTarget, Vec<Subscriber>>>,
    disabled: Mutex<HashSet<ControllerId>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, target: SubscriptionTarget, subscriber: Subscriber) -> Result<()> {
        let mut entries = self.entries.write();
        let subscribers = entries.entry(target).or_default();
        if subscribers.iter().any(|s| s.same_identity(&subscriber)) {
            return Err(Error::AlreadySubscribed);
        }
        subscribers.push(subscriber);
        Ok(())
    }

    /// Remove the descriptor of `subscriber`'s identity from `target`.
    pub fn remove(&self, target: &SubscriptionTarget, subscriber: &Subscriber) -> Result<()> {
        let mut entries = self.entries.write();
        let subscribers = entries.get_mut(target).ok_or(Error::NotSubscribed)?;
        let before = subscribers.len();
        subscribers.retain(|s| !s.same_identity(subscriber));
        if subscribers.len() == before {
            return Err(Error::NotSubscribed);
        }
        if subscribers.is_empty() {
            entries.remove(target);
        }
        Ok(())
    }

    /// Subscribers of `target` whose controller has notifications enabled.
    pub fn subscribers(&self, target: &SubscriptionTarget) -> Vec<Subscriber> {
        let disabled = self.disabled.lock();
        self.entries
            .read()
            .get(target)
            .map(|list| {
                list.iter()
                    .filter(|s| !disabled.contains(&s.controller))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn disable(&self, controller: ControllerId) {
        self.disabled.lock().insert(controller);
    }

    pub fn re_enable(&self, controller: ControllerId) {
        self.disabled.lock().remove(&controller);
    }

    pub fn is_disabled(&self, controller: ControllerId) -> bool {
        self.disabled.lock().contains(&controller)
    }

    /// Drop everything owned by `controller`. Returns how many were removed.
    pub fn release_controller(&self, controller: ControllerId) -> usize {
        self.disabled.lock().remove(&controller);
        let mut removed = 0;
        self.entries.write().retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|s| s.controller != controller);
            removed += before - subscribers.len();
            !subscribers.is_empty()
        });
        removed
    }

    /// Drop every subscription of `emitter`, returning the removed ones.
    pub fn remove_emitter(&self, emitter: ONo) -> Vec<(SubscriptionTarget, Subscriber)> {
        let mut removed = Vec::new();
        self.entries.write().retain(|target, subscribers| {
            if target.emitter() != emitter {
                return true;
            }
            removed.extend(subscribers.drain(..).map(|s| (*target, s)));
            false
        });
        removed
    }

    /// Number of subscriber descriptors.
    pub fn len(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// ============================================================================
// Subscription manager
// ============================================================================

/// The `OcaSubscriptionManager` object and the notification fan-out.
pub struct SubscriptionManager {
    table: SubscriptionTable,
    controllers: Arc<ControllerTable>,
    max_context_length: u16,
}

impl SubscriptionManager {
    pub(crate) fn new(controllers: Arc<ControllerTable>, max_context_length: u16) -> Self {
        Self {
            table: SubscriptionTable::new(),
            controllers,
            max_context_length,
        }
    }

    pub fn table(&self) -> &SubscriptionTable {
        &self.table
    }

    /// Push `event` with encoded `parameters` to every subscriber.
    /// Returns the number of notifications queued.
    pub fn notify(&self, event: Event, parameters: &[u8]) -> usize {
        let target = SubscriptionTarget::Event(event);
        self.deliver_all(target, event, parameters)
    }

    /// Announce a property change of `emitter`.
    ///
    /// Reaches event subscribers of `PropertyChanged (1.1)` on the emitter
    /// and property subscribers of that property.
    pub fn notify_property_changed<V: Encode + ?Sized>(
        &self,
        emitter: ONo,
        property: PropertyId,
        value: &V,
        change_type: PropertyChangeType,
    ) -> usize {
        let parameters = match encode(&(property, value, change_type)) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(emitter, %property, error = %e, "property value not encodable");
                return 0;
            }
        };
        let event = Event::new(emitter, PROPERTY_CHANGED);
        self.deliver_all(SubscriptionTarget::Event(event), event, &parameters)
            + self.deliver_all(
                SubscriptionTarget::Property { emitter, property },
                event,
                &parameters,
            )
    }

    /// Tell version 2 subscribers of `ono` it is gone and drop all its
    /// subscriptions.
    pub(crate) fn object_deleted(&self, ono: ONo) -> usize {
        let removed = self.table.remove_emitter(ono);
        let mut notified = 0;
        for (target, subscriber) in &removed {
            if subscriber.version != NotificationVersion::V2 {
                continue;
            }
            let event = match target {
                SubscriptionTarget::Event(event) => *event,
                SubscriptionTarget::Property { emitter, .. } => Event::new(*emitter, PROPERTY_CHANGED),
            };
            let message = Message::Notification2(Notification2 {
                notification_size: 0,
                event,
                data: Notification2Data::Exception(ExceptionData {
                    exception_type: ExceptionType::ObjectDeleted,
                    try_again: false,
                    exception_data: Blob::default(),
                }),
            });
            if self.controllers.send(self.destination(subscriber), message) == SendOutcome::Queued {
                notified += 1;
            }
        }
        debug!(ono, removed = removed.len(), notified, "subscriptions of deleted object dropped");
        notified
    }

    pub(crate) fn release_controller(&self, controller: ControllerId) -> usize {
        self.table.release_controller(controller)
    }

    fn deliver_all(&self, target: SubscriptionTarget, event: Event, parameters: &[u8]) -> usize {
        let mut delivered = 0;
        for subscriber in self.table.subscribers(&target) {
            let message = build_notification(&subscriber, event, parameters);
            let destination = self.destination(&subscriber);
            match self.controllers.send(destination, message) {
                SendOutcome::Queued => delivered += 1,
                SendOutcome::Dropped => {}
                SendOutcome::Gone => {
                    debug!(controller = destination, ?target, "pruning unreachable subscriber");
                    let _ = self.table.remove(&target, &subscriber);
                }
            }
        }
        delivered
    }

    /// Controller a subscriber's notifications go to.
    ///
    /// A UTF-8 destination naming a connected peer selects that controller;
    /// anything else falls back to the subscribing controller.
    fn destination(&self, subscriber: &Subscriber) -> ControllerId {
        if subscriber.destination.is_empty() {
            return subscriber.controller;
        }
        std::str::from_utf8(subscriber.destination.as_slice())
            .ok()
            .and_then(|peer| self.controllers.find_peer(peer))
            .unwrap_or(subscriber.controller)
    }

    fn check_context(&self, context: &Blob) -> std::result::Result<(), Status> {
        if context.len() > usize::from(self.max_context_length) {
            return Err(Status::ParameterOutOfRange);
        }
        Ok(())
    }

    fn dispatch_table() -> &'static DispatchTable<SubscriptionManager> {
        static TABLE: OnceLock<DispatchTable<SubscriptionManager>> = OnceLock::new();
        TABLE.get_or_init(|| {
            DispatchTable::new()
                .setter(methods::ADD_SUBSCRIPTION, |sm: &Self, p: AddSubscriptionParams, ctx| {
                    sm.check_context(&p.context)?;
                    require_emitter(ctx, p.event.emitter_ono)?;
                    let subscriber = Subscriber {
                        context: p.context,
                        delivery_mode: p.delivery_mode,
                        destination: p.destination,
                        ..Subscriber::v1(ctx.controller, p.subscriber)
                    };
                    sm.table
                        .add(SubscriptionTarget::Event(p.event), subscriber)
                        .map_err(|e| e.to_status())
                })
                .setter(methods::REMOVE_SUBSCRIPTION, |sm: &Self, p: RemoveSubscriptionParams, ctx| {
                    sm.table
                        .remove(
                            &SubscriptionTarget::Event(p.event),
                            &Subscriber::v1(ctx.controller, p.subscriber),
                        )
                        .map_err(|e| e.to_status())
                })
                .action(methods::DISABLE_NOTIFICATIONS, |sm: &Self, _, ctx| {
                    sm.table.disable(ctx.controller);
                    Ok(Parameters::empty())
                })
                .action(methods::RE_ENABLE_NOTIFICATIONS, |sm: &Self, _, ctx| {
                    sm.table.re_enable(ctx.controller);
                    Ok(Parameters::empty())
                })
                .setter(
                    methods::ADD_PROPERTY_CHANGE_SUBSCRIPTION,
                    |sm: &Self, p: AddPropertyChangeSubscriptionParams, ctx| {
                        sm.check_context(&p.context)?;
                        require_emitter(ctx, p.emitter)?;
                        let subscriber = Subscriber {
                            context: p.context,
                            delivery_mode: p.delivery_mode,
                            destination: p.destination,
                            ..Subscriber::v1(ctx.controller, p.subscriber)
                        };
                        let target = SubscriptionTarget::Property {
                            emitter: p.emitter,
                            property: p.property,
                        };
                        sm.table.add(target, subscriber).map_err(|e| e.to_status())
                    },
                )
                .setter(
                    methods::REMOVE_PROPERTY_CHANGE_SUBSCRIPTION,
                    |sm: &Self, p: RemovePropertyChangeSubscriptionParams, ctx| {
                        let target = SubscriptionTarget::Property {
                            emitter: p.emitter,
                            property: p.property,
                        };
                        sm.table
                            .remove(&target, &Subscriber::v1(ctx.controller, p.subscriber))
                            .map_err(|e| e.to_status())
                    },
                )
                .getter(methods::GET_MAXIMUM_SUBSCRIBER_CONTEXT_LENGTH, |sm: &Self, _| {
                    Ok(sm.max_context_length)
                })
                .setter(methods::ADD_SUBSCRIPTION2, |sm: &Self, p: Subscription2Params, ctx| {
                    require_emitter(ctx, p.event.emitter_ono)?;
                    let subscriber = Subscriber {
                        delivery_mode: p.delivery_mode,
                        destination: p.destination,
                        ..Subscriber::v2(ctx.controller)
                    };
                    sm.table
                        .add(SubscriptionTarget::Event(p.event), subscriber)
                        .map_err(|e| e.to_status())
                })
                .setter(methods::REMOVE_SUBSCRIPTION2, |sm: &Self, p: Subscription2Params, ctx| {
                    sm.table
                        .remove(
                            &SubscriptionTarget::Event(p.event),
                            &Subscriber::v2(ctx.controller),
                        )
                        .map_err(|e| e.to_status())
                })
        })
    }
}

fn require_emitter(ctx: &CommandContext<'_>, emitter: ONo) -> std::result::Result<(), Status> {
    if ctx.device.registry().contains(emitter) {
        Ok(())
    } else {
        Err(Status::BadONo)
    }
}

fn build_notification(subscriber: &Subscriber, event: Event, parameters: &[u8]) -> Message {
    match subscriber.version {
        NotificationVersion::V1 => Message::Notification1(Notification1 {
            notification_size: 0,
            target_ono: subscriber.method.ono,
            method_id: subscriber.method.method_id,
            param_count: if parameters.is_empty() { 1 } else { 2 },
            context: subscriber.context.clone(),
            event,
            event_parameters: parameters.to_vec(),
        }),
        NotificationVersion::V2 => Message::Notification2(Notification2 {
            notification_size: 0,
            event,
            data: Notification2Data::Event(parameters.to_vec()),
        }),
    }
}

impl OcaObject for SubscriptionManager {
    fn class_identification(&self) -> ClassIdentification {
        ClassIdentification::new(class::subscription_manager(), 2)
    }

    fn role(&self) -> String {
        "SubscriptionManager".to_string()
    }

    fn lockable(&self) -> bool {
        false
    }

    fn method_kind(&self, method: MethodId) -> MethodKind {
        Self::dispatch_table()
            .kind(method)
            .unwrap_or(MethodKind::Action)
    }

    fn handle_command(
        &self,
        command: &Command,
        ctx: &CommandContext<'_>,
    ) -> std::result::Result<Parameters, Status> {
        Self::dispatch_table().dispatch(self, command, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceConfig};
    use crate::protocol::read_pdu;
    use crate::transport::{loopback, LoopbackConnector, LoopbackListener, Transport, TransportListener};
    use crate::types::EventId;
    use std::time::Duration;

    const EVENT: Event = Event::new(4096, EventId::new(3, 1));

    fn method(index: u16) -> OcaMethod {
        OcaMethod {
            ono: 0,
            method_id: MethodId::new(1, index),
        }
    }

    #[test]
    fn test_duplicate_and_missing() {
        let table = SubscriptionTable::new();
        let target = SubscriptionTarget::Event(EVENT);
        table.add(target, Subscriber::v1(1, method(1))).unwrap();
        assert!(matches!(
            table.add(target, Subscriber::v1(1, method(1))),
            Err(Error::AlreadySubscribed)
        ));
        // Different subscriber method or controller is a distinct descriptor.
        table.add(target, Subscriber::v1(1, method(2))).unwrap();
        table.add(target, Subscriber::v1(2, method(1))).unwrap();
        table.add(target, Subscriber::v2(1)).unwrap();
        assert_eq!(table.len(), 4);

        table.remove(&target, &Subscriber::v1(1, method(2))).unwrap();
        assert!(matches!(
            table.remove(&target, &Subscriber::v1(1, method(2))),
            Err(Error::NotSubscribed)
        ));
        assert!(matches!(
            table.remove(&SubscriptionTarget::Event(Event::new(1, EventId::new(1, 1))), &Subscriber::v2(1)),
            Err(Error::NotSubscribed)
        ));
    }

    #[test]
    fn test_disable_filters_subscribers() {
        let table = SubscriptionTable::new();
        let target = SubscriptionTarget::Event(EVENT);
        table.add(target, Subscriber::v1(1, method(1))).unwrap();
        table.add(target, Subscriber::v1(2, method(1))).unwrap();

        table.disable(1);
        let live: Vec<ControllerId> = table.subscribers(&target).iter().map(|s| s.controller).collect();
        assert_eq!(live, vec![2]);
        table.re_enable(1);
        assert_eq!(table.subscribers(&target).len(), 2);
    }

    #[test]
    fn test_release_controller_and_emitter() {
        let table = SubscriptionTable::new();
        let other = SubscriptionTarget::Property {
            emitter: 5000,
            property: PropertyId::new(4, 1),
        };
        table.add(SubscriptionTarget::Event(EVENT), Subscriber::v1(1, method(1))).unwrap();
        table.add(other, Subscriber::v1(1, method(1))).unwrap();
        table.add(other, Subscriber::v2(2)).unwrap();

        assert_eq!(table.release_controller(1), 2);
        assert_eq!(table.len(), 1);
        let removed = table.remove_emitter(5000);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].1.version, NotificationVersion::V2);
        assert!(table.is_empty());
    }

    #[test]
    fn test_notification_versions() {
        let mut v1 = Subscriber::v1(1, OcaMethod { ono: 0x5678, method_id: MethodId::new(1, 1) });
        v1.context = Blob::new(b"ctx");
        match build_notification(&v1, EVENT, &[1, 2]) {
            Message::Notification1(n) => {
                assert_eq!(n.target_ono, 0x5678);
                assert_eq!(n.param_count, 2);
                assert_eq!(n.context.as_slice(), b"ctx");
                assert_eq!(n.event_parameters, vec![1, 2]);
            }
            other => panic!("unexpected {other:?}"),
        }
        match build_notification(&Subscriber::v2(1), EVENT, &[]) {
            Message::Notification2(n) => assert_eq!(n.data, Notification2Data::Event(Vec::new())),
            other => panic!("unexpected {other:?}"),
        }
    }

    async fn attach(
        device: &Device,
        connector: &LoopbackConnector,
        listener: &LoopbackListener,
    ) -> (ControllerId, Arc<dyn Transport>) {
        let client = connector.transport();
        let (connected, accepted) = tokio::join!(client.connect(), listener.accept());
        connected.unwrap();
        let id = device.accept(accepted.unwrap()).unwrap();
        (id, Arc::new(client))
    }

    async fn next_event(client: &Arc<dyn Transport>) -> Event {
        let pdu = read_pdu(client.as_ref(), 1 << 20).await.unwrap();
        match pdu.messages.into_iter().next() {
            Some(Message::Notification1(n)) => n.event,
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delivery_to_named_destination() {
        let device = Device::new(DeviceConfig::default()).unwrap();
        let (connector, listener) = loopback();
        let (a, client_a) = attach(&device, &connector, &listener).await;
        let (b, client_b) = attach(&device, &connector, &listener).await;
        let peer_b = device.controllers().info(b).unwrap().peer;

        let table = device.subscription_manager().table();
        let target = SubscriptionTarget::Event(EVENT);
        table
            .add(target, Subscriber {
                destination: Blob::new(peer_b.into_bytes()),
                ..Subscriber::v1(a, method(1))
            })
            .unwrap();

        assert_eq!(device.notify(EVENT, &[]), 1);
        assert_eq!(next_event(&client_b).await, EVENT);
        assert!(tokio::time::timeout(Duration::from_millis(50), client_a.read(1))
            .await
            .is_err());

        // A destination naming nobody falls back to the subscriber.
        table
            .add(target, Subscriber {
                destination: Blob::new(b"nowhere".to_vec()),
                ..Subscriber::v1(a, method(2))
            })
            .unwrap();
        assert_eq!(device.notify(EVENT, &[]), 2);
        assert_eq!(next_event(&client_a).await, EVENT);
        assert_eq!(next_event(&client_b).await, EVENT);
    }

    #[test]
    fn test_gone_subscriber_is_pruned() {
        let manager = SubscriptionManager::new(Arc::new(ControllerTable::new()), 64);
        let target = SubscriptionTarget::Event(EVENT);
        manager.table().add(target, Subscriber::v1(99, method(1))).unwrap();
        manager.table().add(target, Subscriber::v2(98)).unwrap();

        assert_eq!(manager.notify(EVENT, &[1]), 0);
        assert!(manager.table().is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_keeps_subscriber() {
        let config = DeviceConfig {
            outbound_queue_depth: 1,
            ..Default::default()
        };
        let device = Device::new(config).unwrap();
        let (connector, listener) = loopback();
        let (a, client) = attach(&device, &connector, &listener).await;
        let table = device.subscription_manager().table();
        table
            .add(SubscriptionTarget::Event(EVENT), Subscriber::v1(a, method(1)))
            .unwrap();

        // The session cannot drain between these two pushes.
        assert_eq!(device.notify(EVENT, &[]), 1);
        assert_eq!(device.notify(EVENT, &[]), 0);
        assert_eq!(table.len(), 1);

        assert_eq!(next_event(&client).await, EVENT);
        assert_eq!(device.notify(EVENT, &[]), 1);
        assert_eq!(next_event(&client).await, EVENT);
    }
}
