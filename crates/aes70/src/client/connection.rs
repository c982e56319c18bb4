// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller-side connection to one device.
//!
//! # State Machine
//!
//! ```text
//!      +------------+
//!      |Disconnected|
//!      +-----+------+
//!            | connect()
//!            v
//!      +------------+
//!      | Connecting |--(error/timeout)--> Closed
//!      +-----+------+
//!            | transport open
//!            v
//!      +------------+  loss, auto-reconnect  +--------------+
//!      | Connected  |----------------------->| Reconnecting |
//!      +-----+------+<-----------------------+------+-------+
//!            |              reconnected             | attempts exhausted
//!            | disconnect() / loss                  v
//!            +------------------------------->  Closed
//! ```
//!
//! A single supervisor task owns the session: it runs the read loop and
//! the heartbeat under `select!`, and on loss fails all outstanding
//! commands before deciding between reconnect and close.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::class_registry::ClassRegistry;
use crate::codec::{Blob, Decode};
use crate::error::{Error, Result};
use crate::protocol::constants::{block, root, subscription_manager};
use crate::protocol::{
    decode_pdu, hex_dump, read_frame, Command, EventNotification, KeepAlive, Message, ParamList,
    Parameters, Pdu, Response, DATAGRAM_MAX_PDU_SIZE,
};
use crate::transport::{TcpTransport, Transport, TransportError, UdpTransport};
use crate::types::{
    ono, AddPropertyChangeSubscriptionParams, AddSubscriptionParams, BlockMember, ClassIdentification,
    DeliveryMode, Event, MethodId, OcaMethod, ObjectIdentification, ONo, PropertyId,
    RemovePropertyChangeSubscriptionParams, RemoveSubscriptionParams, Status,
};

use super::config::ConnectionConfig;
use super::object_cache::{ObjectCache, ObjectState, RemoteObject};
use super::subscription::{NotificationCallback, SubscriptionCache, SubscriptionKey, SubscriptionToken};

// ============================================================================
// Connection State
// ============================================================================

/// Connection state machine states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connection lost, retrying with backoff.
    Reconnecting,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    pub fn is_operational(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Closed => "Closed",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters of one connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub pdus_sent: u64,
    pub pdus_received: u64,
    pub notifications: u64,
    pub reconnects: u64,
}

#[derive(Default)]
struct StatCounters {
    pdus_sent: AtomicU64,
    pdus_received: AtomicU64,
    notifications: AtomicU64,
    reconnects: AtomicU64,
}

struct SessionTimes {
    last_sent: Instant,
    last_received: Instant,
}

/// Callbacks of one inbound notification, in arrival order.
type Delivery = (Vec<NotificationCallback>, EventNotification);

enum SessionEnd {
    Shutdown,
    Lost(String),
}

// ============================================================================
// Connection
// ============================================================================

/// A controller's session with one device.
///
/// # Example
///
/// ```rust,no_run
/// use aes70::client::{Connection, ConnectionConfig};
/// use aes70::types::ono;
///
/// # async fn example() -> aes70::Result<()> {
/// let conn = Connection::connect_tcp("192.0.2.10:65000".parse().unwrap(),
///     ConnectionConfig::default()).await?;
/// for member in conn.get_members(ono::ROOT_BLOCK).await? {
///     println!("{} {}", member.ono, member.class_identification);
/// }
/// conn.disconnect().await;
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    correlator: super::Correlator,
    times: Mutex<SessionTimes>,
    subscriptions: Mutex<SubscriptionCache>,
    /// Serializes subscribe, unsubscribe and replay against each other.
    subscribe_lock: tokio::sync::Mutex<()>,
    objects: ObjectCache,
    classes: ClassRegistry<&'static str>,
    subscriber: OcaMethod,
    shutdown: Notify,
    /// Write-failure signal of the current session; replaced on reconnect.
    lost: Mutex<Arc<Notify>>,
    deliveries: mpsc::UnboundedSender<Delivery>,
    closing: AtomicBool,
    stats: StatCounters,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Open `transport` and start the session.
    pub async fn connect(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (deliveries, delivery_rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let inner = Arc::new(Inner {
            transport,
            config,
            state,
            correlator: super::Correlator::new(),
            times: Mutex::new(SessionTimes {
                last_sent: now,
                last_received: now,
            }),
            subscriptions: Mutex::new(SubscriptionCache::new()),
            subscribe_lock: tokio::sync::Mutex::new(()),
            objects: ObjectCache::new(),
            classes: ClassRegistry::standard_names(),
            subscriber: OcaMethod {
                ono: ono::INVALID,
                method_id: MethodId::new(1, 1),
            },
            shutdown: Notify::new(),
            lost: Mutex::new(Arc::new(Notify::new())),
            deliveries,
            closing: AtomicBool::new(false),
            stats: StatCounters::default(),
            supervisor: Mutex::new(None),
        });

        tokio::spawn(run_callbacks(delivery_rx));

        inner.set_state(ConnectionState::Connecting);
        if let Err(e) = inner.open_transport().await {
            inner.set_state(ConnectionState::Closed);
            return Err(e);
        }
        inner.set_state(ConnectionState::Connected);
        info!(peer = %inner.transport.peer(), "connected");

        let handle = tokio::spawn(Arc::clone(&inner).supervise());
        *inner.supervisor.lock() = Some(handle);
        Ok(Self { inner })
    }

    /// Connect over TCP.
    pub async fn connect_tcp(addr: SocketAddr, config: ConnectionConfig) -> Result<Self> {
        Self::connect(Arc::new(TcpTransport::new(addr)), config).await
    }

    /// Connect over UDP. Inbound PDUs are capped at datagram size.
    pub async fn connect_udp(addr: SocketAddr, mut config: ConnectionConfig) -> Result<Self> {
        config.max_pdu_size = config.max_pdu_size.min(DATAGRAM_MAX_PDU_SIZE);
        Self::connect(Arc::new(UdpTransport::new(addr)), config).await
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the state equals `target`. Returns false on timeout.
    pub async fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> bool {
        let mut rx = self.inner.state.subscribe();
        let reached = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == target)).await,
            Ok(Ok(_))
        );
        reached
    }

    pub fn stats(&self) -> ConnectionStats {
        let s = &self.inner.stats;
        ConnectionStats {
            pdus_sent: s.pdus_sent.load(Ordering::Relaxed),
            pdus_received: s.pdus_received.load(Ordering::Relaxed),
            notifications: s.notifications.load(Ordering::Relaxed),
            reconnects: s.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Commands awaiting a response.
    pub fn outstanding_commands(&self) -> usize {
        self.inner.correlator.outstanding()
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Send a command and wait for its response, whatever its status.
    pub async fn send_command(
        &self,
        target: ONo,
        method: MethodId,
        params: Parameters,
        timeout: Duration,
    ) -> Result<Response> {
        self.inner.send_command(target, method, params, timeout).await
    }

    /// Send a command without asking for a response.
    pub async fn send_command_no_response(
        &self,
        target: ONo,
        method: MethodId,
        params: Parameters,
    ) -> Result<()> {
        self.inner.ensure_connected()?;
        let handle = self.inner.correlator.next_handle();
        let command = Command::new(handle, target, method, params.count, params.bytes);
        self.inner.write_pdu(&Pdu::single(Message::Command(command))).await
    }

    /// Typed call: encode `params`, fail on non-OK status, decode the result.
    pub async fn call<P, R>(&self, target: ONo, method: MethodId, params: &P) -> Result<R>
    where
        P: ParamList + ?Sized,
        R: Decode,
    {
        self.inner.call(target, method, params).await
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Call `callback` for every notification of `event`.
    pub async fn subscribe_event<F>(&self, event: Event, callback: F) -> Result<SubscriptionToken>
    where
        F: Fn(&EventNotification) + Send + Sync + 'static,
    {
        self.inner
            .subscribe(SubscriptionKey::Event(event), Arc::new(callback))
            .await
    }

    /// Call `callback` whenever `property` of `emitter` changes.
    pub async fn subscribe_property<F>(
        &self,
        emitter: ONo,
        property: PropertyId,
        callback: F,
    ) -> Result<SubscriptionToken>
    where
        F: Fn(&EventNotification) + Send + Sync + 'static,
    {
        self.inner
            .subscribe(SubscriptionKey::Property { emitter, property }, Arc::new(callback))
            .await
    }

    /// Drop one callback; the device subscription goes with the last one.
    pub async fn unsubscribe(&self, token: SubscriptionToken) -> Result<()> {
        self.inner.unsubscribe(token).await
    }

    /// Number of local subscription callbacks.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    /// Proxy for `ono`, fetched on first use and refreshed when stale.
    pub async fn resolve_object(&self, ono: ONo) -> Result<Arc<RemoteObject>> {
        self.inner.resolve_object(ono).await
    }

    /// Refresh every stale proxy now. Returns how many were refreshed.
    pub async fn refresh_objects(&self) -> Result<usize> {
        let stale = self.inner.objects.stale();
        let mut refreshed = 0;
        for ono in stale {
            match self.inner.resolve_object(ono).await {
                Ok(_) => refreshed += 1,
                Err(Error::Status(Status::BadONo)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(refreshed)
    }

    /// Proxy for `ono` if already cached, without touching the device.
    pub fn cached_object(&self, ono: ONo) -> Option<Arc<RemoteObject>> {
        self.inner.objects.get(ono)
    }

    pub fn cached_object_count(&self) -> usize {
        self.inner.objects.len()
    }

    pub async fn get_class_identification(&self, ono: ONo) -> Result<ClassIdentification> {
        self.call(ono, root::GET_CLASS_IDENTIFICATION, &()).await
    }

    /// `OcaBlock.GetMembers`; members are added to the object cache.
    pub async fn get_members(&self, block_ono: ONo) -> Result<Vec<ObjectIdentification>> {
        let members: Vec<ObjectIdentification> =
            self.call(block_ono, block::GET_MEMBERS, &()).await?;
        for member in &members {
            let name = self.inner.class_name(&member.class_identification);
            self.inner
                .objects
                .upsert(member.ono, member.class_identification.clone(), name);
        }
        Ok(members)
    }

    /// `OcaBlock.GetMembersRecursive`.
    pub async fn get_members_recursive(&self, block_ono: ONo) -> Result<Vec<BlockMember>> {
        self.call(block_ono, block::GET_MEMBERS_RECURSIVE, &()).await
    }

    pub async fn get_role(&self, ono: ONo) -> Result<String> {
        self.call(ono, root::GET_ROLE, &()).await
    }

    pub async fn get_lockable(&self, ono: ONo) -> Result<bool> {
        self.call(ono, root::GET_LOCKABLE, &()).await
    }

    /// Lock `ono` against reads and writes by other controllers.
    pub async fn lock(&self, ono: ONo) -> Result<()> {
        self.call(ono, root::LOCK, &()).await
    }

    /// Lock `ono` against writes by other controllers.
    pub async fn lock_readonly(&self, ono: ONo) -> Result<()> {
        self.call(ono, root::LOCK_READONLY, &()).await
    }

    pub async fn unlock(&self, ono: ONo) -> Result<()> {
        self.call(ono, root::UNLOCK, &()).await
    }

    /// Close the session. Outstanding commands fail with not-connected.
    pub async fn disconnect(&self) {
        self.inner.closing.store(true, Ordering::SeqCst);
        self.inner.shutdown.notify_one();
        let handle = self.inner.supervisor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.inner.correlator.fail_all();
        let _ = self.inner.transport.disconnect().await;
        self.inner.set_state(ConnectionState::Closed);
        info!(peer = %self.inner.transport.peer(), "disconnected");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.inner.closing.store(true, Ordering::SeqCst);
        self.inner.shutdown.notify_one();
    }
}

// ============================================================================
// Session internals
// ============================================================================

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(peer = %self.transport.peer(), from = %previous, to = %state, "connection state");
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state.borrow().is_operational() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    async fn open_transport(&self) -> Result<()> {
        match tokio::time::timeout(self.config.connect_timeout(), self.transport.connect()).await {
            Ok(Ok(())) => {
                let now = Instant::now();
                let mut times = self.times.lock();
                times.last_sent = now;
                times.last_received = now;
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TransportError::ConnectTimeout.into()),
        }
    }

    async fn supervise(self: Arc<Self>) {
        loop {
            let reason = match self.run_session().await {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost(reason) => reason,
            };
            warn!(peer = %self.transport.peer(), reason = %reason, "connection lost");
            self.correlator.fail_all();
            let _ = self.transport.disconnect().await;

            if !self.config.options.automatic_reconnect || self.closing.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Closed);
                break;
            }

            self.set_state(ConnectionState::Reconnecting);
            if self.config.options.retain_object_cache_after_disconnect {
                self.objects.mark_all_stale();
            } else {
                self.objects.invalidate_all();
            }

            match self.reconnect().await {
                Ok(attempts) => {
                    // A permit left by the old session must not end this one.
                    *self.lost.lock() = Arc::new(Notify::new());
                    self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                    info!(peer = %self.transport.peer(), attempts, "reconnected");
                    self.set_state(ConnectionState::Connected);
                    if self.config.options.refresh_subscriptions_on_reconnection {
                        tokio::spawn(Arc::clone(&self).replay_subscriptions());
                    }
                }
                Err(e) => {
                    warn!(peer = %self.transport.peer(), error = %e, "reconnect abandoned");
                    self.set_state(ConnectionState::Closed);
                    break;
                }
            }
        }
    }

    async fn run_session(&self) -> SessionEnd {
        let lost = self.lost.lock().clone();
        tokio::select! {
            _ = self.shutdown.notified() => SessionEnd::Shutdown,
            _ = lost.notified() => SessionEnd::Lost("write failed".to_string()),
            err = self.read_loop() => SessionEnd::Lost(err.to_string()),
            err = self.heartbeat_loop() => SessionEnd::Lost(err.to_string()),
        }
    }

    async fn reconnect(&self) -> Result<u32> {
        let max = self.config.max_reconnect_attempts;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if max > 0 && attempt > max {
                return Err(Error::ReconnectExhausted { attempts: max });
            }
            let delay = self.config.reconnect_delay(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.notified() => return Err(Error::NotConnected),
            }
            if self.closing.load(Ordering::SeqCst) {
                return Err(Error::NotConnected);
            }
            match self.open_transport().await {
                Ok(()) => return Ok(attempt),
                Err(e) => debug!(attempt, error = %e, "reconnect attempt failed"),
            }
        }
    }

    /// Runs until the transport or the framing fails.
    async fn read_loop(&self) -> Error {
        loop {
            let frame = match read_frame(self.transport.as_ref(), self.config.max_pdu_size).await {
                Ok(frame) => frame,
                Err(e) => return e,
            };
            self.times.lock().last_received = Instant::now();
            self.stats.pdus_received.fetch_add(1, Ordering::Relaxed);
            if self.config.options.enable_tracing {
                trace!(peer = %self.transport.peer(), "<- {}", hex_dump(&frame));
            }
            let pdu = match decode_pdu(&frame) {
                Ok(pdu) => pdu,
                Err(e) => return e.into(),
            };
            self.handle_inbound(pdu);
        }
    }

    fn handle_inbound(&self, pdu: Pdu) {
        let mut deliveries = Vec::new();
        for message in pdu.messages {
            match message {
                Message::Response(response) => {
                    self.correlator.resolve(response);
                }
                Message::Notification1(n) => deliveries.push(EventNotification::from(n)),
                Message::Notification2(n) => deliveries.push(EventNotification::from(n)),
                Message::KeepAlive(keepalive) => {
                    trace!(peer = %self.transport.peer(), interval = ?keepalive.interval(), "keepalive");
                }
                Message::Command(c) | Message::CommandRrq(c) => {
                    debug!(target_ono = c.target_ono, "ignoring command sent to a controller");
                }
            }
        }
        if !deliveries.is_empty() {
            self.dispatch_notifications(deliveries);
        }
    }

    /// Queue callbacks for the delivery task so reads never wait on them.
    fn dispatch_notifications(&self, notifications: Vec<EventNotification>) {
        let batch: Vec<(Vec<NotificationCallback>, EventNotification)> = {
            let cache = self.subscriptions.lock();
            notifications
                .into_iter()
                .map(|n| (cache.callbacks_for(&n), n))
                .filter(|(callbacks, n)| {
                    if callbacks.is_empty() {
                        debug!(emitter = n.event.emitter_ono, event = %n.event.event_id, "no subscriber for notification");
                    }
                    !callbacks.is_empty()
                })
                .collect()
        };
        if batch.is_empty() {
            return;
        }
        self.stats
            .notifications
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        for delivery in batch {
            if self.deliveries.send(delivery).is_err() {
                debug!("delivery task gone, dropping notification");
                break;
            }
        }
    }

    /// Sends keepalives and watches for silence. Pends forever when disabled.
    async fn heartbeat_loop(&self) -> Error {
        let Some(stale_after) = self.config.stale_threshold() else {
            return std::future::pending().await;
        };
        let interval = self.config.heartbeat_interval();
        let keepalive = KeepAlive::for_interval(interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let silence = self.times.lock().last_received.elapsed();
            if silence > stale_after {
                return TransportError::Stale(silence).into();
            }
            if let Err(e) = self.write_pdu(&Pdu::single(Message::KeepAlive(keepalive))).await {
                return e;
            }
        }
    }

    async fn write_pdu(&self, pdu: &Pdu) -> Result<()> {
        let bytes = pdu.encode()?;
        let lost = self.lost.lock().clone();
        if self.config.options.enable_tracing {
            trace!(peer = %self.transport.peer(), "-> {}", hex_dump(&bytes));
        }
        match self.transport.write(&bytes).await {
            Ok(_) => {
                self.times.lock().last_sent = Instant::now();
                self.stats.pdus_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                if self.state.borrow().is_operational() {
                    lost.notify_one();
                }
                Err(e.into())
            }
        }
    }

    async fn send_command(
        &self,
        target: ONo,
        method: MethodId,
        params: Parameters,
        timeout: Duration,
    ) -> Result<Response> {
        self.ensure_connected()?;
        let pending = self.correlator.register();
        let command = Command::new(pending.handle(), target, method, params.count, params.bytes);
        self.write_pdu(&Pdu::single(Message::CommandRrq(command)))
            .await?;
        pending.await_response(timeout).await
    }

    async fn call<P, R>(&self, target: ONo, method: MethodId, params: &P) -> Result<R>
    where
        P: ParamList + ?Sized,
        R: Decode,
    {
        let params = Parameters::encode(params)?;
        let response = self
            .send_command(target, method, params, self.config.response_timeout())
            .await?;
        if !response.status.is_ok() {
            return Err(Error::Status(response.status));
        }
        Ok(response.decode_params()?)
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    async fn subscribe(&self, key: SubscriptionKey, callback: NotificationCallback) -> Result<SubscriptionToken> {
        let _guard = self.subscribe_lock.lock().await;
        let first = !self.subscriptions.lock().contains_key(&key);
        if first {
            self.add_device_subscription(key).await?;
            debug!(?key, "device subscription added");
        }
        Ok(self.subscriptions.lock().insert(key, callback))
    }

    async fn unsubscribe(&self, token: SubscriptionToken) -> Result<()> {
        let _guard = self.subscribe_lock.lock().await;
        let (key, last) = self.subscriptions.lock().lookup(token)?;
        let device_result = if last {
            self.remove_device_subscription(key).await
        } else {
            Ok(())
        };
        self.subscriptions.lock().remove(token)?;
        match device_result {
            // The device drops a lost controller's subscriptions itself.
            Ok(()) | Err(Error::NotConnected) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn add_device_subscription(&self, key: SubscriptionKey) -> Result<()> {
        match key {
            SubscriptionKey::Event(event) => {
                let params = AddSubscriptionParams {
                    event,
                    subscriber: self.subscriber,
                    context: key.context(),
                    delivery_mode: DeliveryMode::Normal,
                    destination: Blob::default(),
                };
                self.call(ono::SUBSCRIPTION_MANAGER, subscription_manager::ADD_SUBSCRIPTION, &params)
                    .await
            }
            SubscriptionKey::Property { emitter, property } => {
                let params = AddPropertyChangeSubscriptionParams {
                    emitter,
                    property,
                    subscriber: self.subscriber,
                    context: key.context(),
                    delivery_mode: DeliveryMode::Normal,
                    destination: Blob::default(),
                };
                self.call(
                    ono::SUBSCRIPTION_MANAGER,
                    subscription_manager::ADD_PROPERTY_CHANGE_SUBSCRIPTION,
                    &params,
                )
                .await
            }
        }
    }

    async fn remove_device_subscription(&self, key: SubscriptionKey) -> Result<()> {
        match key {
            SubscriptionKey::Event(event) => {
                let params = RemoveSubscriptionParams {
                    event,
                    subscriber: self.subscriber,
                };
                self.call(ono::SUBSCRIPTION_MANAGER, subscription_manager::REMOVE_SUBSCRIPTION, &params)
                    .await
            }
            SubscriptionKey::Property { emitter, property } => {
                let params = RemovePropertyChangeSubscriptionParams {
                    emitter,
                    property,
                    subscriber: self.subscriber,
                };
                self.call(
                    ono::SUBSCRIPTION_MANAGER,
                    subscription_manager::REMOVE_PROPERTY_CHANGE_SUBSCRIPTION,
                    &params,
                )
                .await
            }
        }
    }

    /// Re-issue every cached subscription on a fresh session.
    async fn replay_subscriptions(self: Arc<Self>) {
        let _guard = self.subscribe_lock.lock().await;
        let keys = self.subscriptions.lock().keys();
        let mut replayed = 0usize;
        for key in keys {
            match self.add_device_subscription(key).await {
                Ok(()) => replayed += 1,
                Err(e) => warn!(?key, error = %e, "subscription replay failed"),
            }
        }
        debug!(peer = %self.transport.peer(), replayed, "subscriptions replayed");
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    fn class_name(&self, ident: &ClassIdentification) -> Option<&'static str> {
        self.classes.resolve(ident).map(|(_, name)| *name)
    }

    async fn resolve_object(&self, ono: ONo) -> Result<Arc<RemoteObject>> {
        if let Some(object) = self.objects.get(ono) {
            if object.state() == ObjectState::Valid {
                return Ok(object);
            }
        }
        let ident: ClassIdentification = match self.call(ono, root::GET_CLASS_IDENTIFICATION, &()).await {
            Ok(ident) => ident,
            Err(Error::Status(Status::BadONo)) => {
                self.objects.remove(ono);
                return Err(Error::Status(Status::BadONo));
            }
            Err(e) => return Err(e),
        };
        let name = self.class_name(&ident);
        Ok(self.objects.upsert(ono, ident, name))
    }
}

/// Runs every callback on one task, so notifications arrive in wire order.
/// Ends once the connection is dropped.
async fn run_callbacks(mut rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some((callbacks, notification)) = rx.recv().await {
        for callback in callbacks {
            callback(&notification);
        }
    }
}
