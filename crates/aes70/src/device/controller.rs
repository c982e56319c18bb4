// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device-side controller sessions.
//!
//! # Lifecycle
//!
//! ```text
//!   accept (stream) / first datagram from a new peer
//!        |
//!        v
//!   +---------+   Command / CommandRrq -> dispatch -> Response (Rrq only)
//!   | Running |   KeepAlive            -> adopt peer heartbeat
//!   +----+----+   queued notification  -> write
//!        |
//!        | close request, peer EOF, framing error, 3 x heartbeat silence
//!        v
//!   +---------+
//!   | Closed  |   removed from the table, locks and subscriptions released
//!   +---------+
//! ```
//!
//! Each session is one task selecting over inbound PDUs, the outbound
//! notification queue, its heartbeat ticker and a close signal. Stream
//! transports get an extra reader task feeding the inbound queue; datagram
//! controllers are fed by the endpoint's receive loop.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{hex_dump, read_pdu, Command, KeepAlive, Message, Pdu, Response};
use crate::transport::{Transport, TransportError};
use crate::types::Status;

use super::object::ControllerId;
use super::Device;

/// Inbound PDUs buffered between a reader and its session.
const INBOUND_DEPTH: usize = 32;

pub(crate) type Inbound = Result<Pdu>;

// ============================================================================
// Controller table
// ============================================================================

struct SessionTimes {
    last_received: Instant,
    last_sent: Instant,
    peer_heartbeat: Option<Duration>,
}

#[derive(Clone)]
struct ControllerHandle {
    id: ControllerId,
    peer: String,
    connected_at: Instant,
    outbound: mpsc::Sender<Message>,
    close: Arc<Notify>,
    times: Arc<Mutex<SessionTimes>>,
}

impl ControllerHandle {
    fn touch_received(&self) {
        self.times.lock().last_received = Instant::now();
    }

    fn touch_sent(&self) {
        self.times.lock().last_sent = Instant::now();
    }
}

/// Snapshot of one controller session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInfo {
    pub id: ControllerId,
    pub peer: String,
    /// Heartbeat announced by the peer, if any.
    pub peer_heartbeat: Option<Duration>,
    /// Time since the last inbound PDU.
    pub idle: Duration,
    pub uptime: Duration,
}

/// Outcome of queueing a message for a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// The controller is alive but its queue is full; this message is lost.
    Dropped,
    /// No such controller, or its session already ended.
    Gone,
}

/// Live controllers of a device, keyed by id.
pub struct ControllerTable {
    controllers: RwLock<HashMap<ControllerId, ControllerHandle>>,
    next_id: AtomicU64,
}

struct Admission {
    handle: ControllerHandle,
    outbound_rx: mpsc::Receiver<Message>,
}

impl ControllerTable {
    pub(crate) fn new() -> Self {
        Self {
            controllers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn admit(&self, peer: String, queue_depth: usize, max_controllers: usize) -> Option<Admission> {
        let mut controllers = self.controllers.write();
        if max_controllers > 0 && controllers.len() >= max_controllers {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound, outbound_rx) = mpsc::channel(queue_depth);
        let now = Instant::now();
        let handle = ControllerHandle {
            id,
            peer,
            connected_at: now,
            outbound,
            close: Arc::new(Notify::new()),
            times: Arc::new(Mutex::new(SessionTimes {
                last_received: now,
                last_sent: now,
                peer_heartbeat: None,
            })),
        };
        controllers.insert(id, handle.clone());
        Some(Admission {
            handle,
            outbound_rx,
        })
    }

    fn remove(&self, id: ControllerId) {
        self.controllers.write().remove(&id);
    }

    /// Queue `message` for controller `id` without waiting.
    pub fn send(&self, id: ControllerId, message: Message) -> SendOutcome {
        let Some(outbound) = self.controllers.read().get(&id).map(|h| h.outbound.clone()) else {
            return SendOutcome::Gone;
        };
        match outbound.try_send(message) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(controller = id, "outbound queue full, notification dropped");
                SendOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Gone,
        }
    }

    /// The live controller whose peer description is `peer`.
    pub fn find_peer(&self, peer: &str) -> Option<ControllerId> {
        self.controllers
            .read()
            .values()
            .find(|h| h.peer == peer)
            .map(|h| h.id)
    }

    /// Ask controller `id` to close. False when it does not exist.
    pub fn close(&self, id: ControllerId) -> bool {
        match self.controllers.read().get(&id) {
            Some(handle) => {
                handle.close.notify_one();
                true
            }
            None => false,
        }
    }

    /// Ask every controller to close. Returns how many were asked.
    pub fn close_all(&self) -> usize {
        let controllers = self.controllers.read();
        for handle in controllers.values() {
            handle.close.notify_one();
        }
        controllers.len()
    }

    pub fn contains(&self, id: ControllerId) -> bool {
        self.controllers.read().contains_key(&id)
    }

    pub fn info(&self, id: ControllerId) -> Option<ControllerInfo> {
        self.controllers.read().get(&id).map(|h| {
            let times = h.times.lock();
            ControllerInfo {
                id: h.id,
                peer: h.peer.clone(),
                peer_heartbeat: times.peer_heartbeat,
                idle: times.last_received.elapsed(),
                uptime: h.connected_at.elapsed(),
            }
        })
    }

    pub fn list(&self) -> Vec<ControllerInfo> {
        let mut ids: Vec<ControllerId> = self.controllers.read().keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.info(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.controllers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Session startup
// ============================================================================

/// Start a controller for an accepted stream transport.
///
/// Returns `None` and drops the connection when the controller limit is
/// reached.
pub(crate) fn start_stream_controller(
    device: &Device,
    transport: Arc<dyn Transport>,
) -> Option<ControllerId> {
    let config = device.config();
    let Some(admission) = device.controllers().admit(
        transport.peer(),
        config.outbound_queue_depth,
        config.max_controllers,
    ) else {
        warn!(peer = %transport.peer(), "controller limit reached, rejecting connection");
        tokio::spawn(async move {
            let _ = transport.disconnect().await;
        });
        return None;
    };

    let id = admission.handle.id;
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_DEPTH);
    let reader = tokio::spawn(read_loop(
        Arc::clone(&transport),
        config.max_pdu_size,
        inbound_tx,
    ));
    info!(controller = id, peer = %transport.peer(), "controller connected");
    let session = Session {
        device: device.clone(),
        transport,
        handle: admission.handle,
    };
    tokio::spawn(session.run(inbound_rx, admission.outbound_rx, Some(reader)));
    Some(id)
}

/// Start a controller for a datagram peer; the caller feeds its PDUs.
pub(crate) fn start_datagram_controller(
    device: &Device,
    transport: Arc<dyn Transport>,
) -> Option<(ControllerId, mpsc::Sender<Inbound>)> {
    let config = device.config();
    let admission = device.controllers().admit(
        transport.peer(),
        config.outbound_queue_depth,
        config.max_controllers,
    )?;
    let id = admission.handle.id;
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_DEPTH);
    info!(controller = id, peer = %transport.peer(), "datagram controller created");
    let session = Session {
        device: device.clone(),
        transport,
        handle: admission.handle,
    };
    tokio::spawn(session.run(inbound_rx, admission.outbound_rx, None));
    Some((id, inbound_tx))
}

async fn read_loop(transport: Arc<dyn Transport>, max_pdu_size: usize, tx: mpsc::Sender<Inbound>) {
    loop {
        let item = read_pdu(transport.as_ref(), max_pdu_size).await;
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            break;
        }
    }
}

// ============================================================================
// Session
// ============================================================================

enum CloseReason {
    Requested,
    PeerClosed,
    Stale(Duration),
    Failed(Error),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => write!(f, "closed by device"),
            CloseReason::PeerClosed => write!(f, "closed by peer"),
            CloseReason::Stale(silence) => write!(f, "peer silent for {silence:?}"),
            CloseReason::Failed(e) => write!(f, "{e}"),
        }
    }
}

impl From<Error> for CloseReason {
    fn from(e: Error) -> Self {
        match e {
            Error::Transport(TransportError::Closed) => CloseReason::PeerClosed,
            other => CloseReason::Failed(other),
        }
    }
}

struct Session {
    device: Device,
    transport: Arc<dyn Transport>,
    handle: ControllerHandle,
}

impl Session {
    async fn run(
        self,
        mut inbound: mpsc::Receiver<Inbound>,
        mut outbound: mpsc::Receiver<Message>,
        reader: Option<JoinHandle<()>>,
    ) {
        let mut heartbeat: Option<Interval> = None;
        let close = Arc::clone(&self.handle.close);

        let reason = loop {
            tokio::select! {
                _ = close.notified() => break CloseReason::Requested,
                item = inbound.recv() => match item {
                    Some(Ok(pdu)) => {
                        self.handle.touch_received();
                        if let Err(e) = self.handle_pdu(pdu, &mut heartbeat).await {
                            break e.into();
                        }
                    }
                    Some(Err(e)) => break e.into(),
                    None => break CloseReason::PeerClosed,
                },
                Some(message) = outbound.recv() => {
                    if let Err(e) = self.write(&Pdu::single(message)).await {
                        break e.into();
                    }
                }
                _ = tick(&mut heartbeat) => {
                    if let Some(reason) = self.heartbeat().await {
                        break reason;
                    }
                }
            }
        };

        if let Some(reader) = reader {
            reader.abort();
        }
        self.shutdown(reason).await;
    }

    async fn handle_pdu(&self, pdu: Pdu, heartbeat: &mut Option<Interval>) -> Result<()> {
        for message in pdu.messages {
            match message {
                Message::Command(command) => self.execute(command, false).await?,
                Message::CommandRrq(command) => self.execute(command, true).await?,
                Message::KeepAlive(keepalive) => self.adopt_heartbeat(keepalive, heartbeat),
                Message::Response(response) => {
                    debug!(controller = self.handle.id, handle = response.handle, "ignoring response sent to a device");
                }
                Message::Notification1(_) | Message::Notification2(_) => {
                    debug!(controller = self.handle.id, "ignoring notification sent to a device");
                }
            }
        }
        Ok(())
    }

    /// Dispatch on a separate task so a panicking handler cannot take the
    /// session down. Commands of one controller still run in order.
    async fn execute(&self, command: Command, respond: bool) -> Result<()> {
        let handle = command.handle;
        let target = command.target_ono;
        let method = command.method_id;
        let device = self.device.clone();
        let controller = self.handle.id;

        let outcome = tokio::spawn(async move { device.execute(&command, controller) }).await;
        let response = match outcome {
            Ok(Ok(params)) => Response::new(handle, Status::Ok, params.count, params.bytes),
            Ok(Err(status)) => {
                debug!(controller, target, %method, %status, "command failed");
                Response::status_only(handle, status)
            }
            Err(e) => {
                warn!(controller, target, %method, error = %e, "command handler panicked");
                Response::status_only(handle, Status::DeviceError)
            }
        };
        if respond {
            self.write(&Pdu::single(Message::Response(response))).await?;
        }
        Ok(())
    }

    fn adopt_heartbeat(&self, keepalive: KeepAlive, heartbeat: &mut Option<Interval>) {
        let interval = keepalive.interval();
        let previous = {
            let mut times = self.handle.times.lock();
            std::mem::replace(&mut times.peer_heartbeat, Some(interval).filter(|i| !i.is_zero()))
        };
        if previous == Some(interval) {
            return;
        }
        debug!(controller = self.handle.id, ?interval, "peer heartbeat");
        *heartbeat = (!interval.is_zero()).then(|| {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
    }

    /// Check for silence, then answer with our own keepalive.
    async fn heartbeat(&self) -> Option<CloseReason> {
        let (silence, interval) = {
            let times = self.handle.times.lock();
            (times.last_received.elapsed(), times.peer_heartbeat)
        };
        let interval = interval?;
        if silence > interval * 3 {
            return Some(CloseReason::Stale(silence));
        }
        let keepalive = Pdu::single(Message::KeepAlive(KeepAlive::for_interval(interval)));
        self.write(&keepalive).await.err().map(CloseReason::from)
    }

    async fn write(&self, pdu: &Pdu) -> Result<()> {
        let bytes = pdu.encode()?;
        if self.device.config().enable_tracing {
            trace!(controller = self.handle.id, "-> {}", hex_dump(&bytes));
        }
        self.transport.write(&bytes).await?;
        self.handle.touch_sent();
        Ok(())
    }

    async fn shutdown(self, reason: CloseReason) {
        let id = self.handle.id;
        self.device.controllers().remove(id);
        let locks = self.device.registry().release_controller(id);
        let subscriptions = self.device.subscription_manager().release_controller(id);
        let _ = self.transport.disconnect().await;

        match &reason {
            CloseReason::Failed(e) => {
                warn!(controller = id, peer = %self.handle.peer, error = %e, locks, subscriptions, "controller closed");
            }
            _ => {
                info!(controller = id, peer = %self.handle.peer, %reason, locks, subscriptions, "controller closed");
            }
        }
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
