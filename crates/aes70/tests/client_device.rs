// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::float_cmp)] // Exact gain values set by the tests
#![allow(clippy::items_after_statements)] // Test helpers

//! End-to-end tests: a [`Connection`] talking to a [`Device`] over the
//! loopback and UDP transports.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use aes70::device::{CommandContext, DispatchTable, MethodKind};
use aes70::protocol::{Command, Parameters};
use aes70::transport::{loopback, LoopbackConnector};
use aes70::types::{
    ono, ClassId, ClassIdentification, Event, EventId, PropertyChangeType, PROPERTY_CHANGED,
};
use aes70::{
    Connection, ConnectionConfig, ConnectionState, Device, DeviceConfig, Error, MethodId,
    OcaObject, PropertyId, Status,
};
use parking_lot::Mutex;
use tokio::net::UdpSocket;

// ============================================================================
// Test object
// ============================================================================

const GAIN: PropertyId = PropertyId::new(4, 1);
const GET_GAIN: MethodId = MethodId::new(4, 1);
const SET_GAIN: MethodId = MethodId::new(4, 2);
const OVERLOAD: EventId = EventId::new(4, 1);

/// Gain control with a -100..=20 dB range.
struct Gain {
    db: Mutex<f32>,
}

impl Gain {
    fn new() -> Arc<Self> {
        Arc::new(Self { db: Mutex::new(0.0) })
    }

    fn table() -> &'static DispatchTable<Gain> {
        static TABLE: OnceLock<DispatchTable<Gain>> = OnceLock::new();
        TABLE.get_or_init(|| {
            DispatchTable::new()
                .getter(GET_GAIN, |g: &Gain, _| Ok(*g.db.lock()))
                .setter(SET_GAIN, |g: &Gain, (db,): (f32,), ctx| {
                    if !(-100.0..=20.0).contains(&db) {
                        return Err(Status::ParameterOutOfRange);
                    }
                    *g.db.lock() = db;
                    ctx.property_changed(GAIN, &db, PropertyChangeType::CurrentChanged);
                    Ok(())
                })
        })
    }
}

impl OcaObject for Gain {
    fn class_identification(&self) -> ClassIdentification {
        ClassIdentification::new(ClassId::new([1, 1, 1, 5]), 1)
    }

    fn role(&self) -> String {
        "Gain".to_string()
    }

    fn method_kind(&self, method: MethodId) -> MethodKind {
        Self::table().kind(method).unwrap_or(MethodKind::Action)
    }

    fn handle_command(
        &self,
        command: &Command,
        ctx: &CommandContext<'_>,
    ) -> Result<Parameters, Status> {
        Self::table().dispatch(self, command, ctx)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        heartbeat_interval_ms: 0,
        response_timeout_ms: 1_000,
        reconnect_initial_delay_ms: 20,
        reconnect_max_delay_ms: 100,
        ..ConnectionConfig::default()
    }
}

/// A device with one gain object at 4096, served over loopback.
fn serve() -> (Device, LoopbackConnector) {
    let device = Device::new(DeviceConfig::default()).unwrap();
    let gain = device.add_object(Gain::new()).unwrap();
    assert_eq!(gain, ono::FIRST_DYNAMIC);
    let (connector, listener) = loopback();
    let server = device.clone();
    tokio::spawn(async move { server.serve(listener).await });
    (device, connector)
}

async fn connect(connector: &LoopbackConnector) -> Connection {
    Connection::connect(Arc::new(connector.transport()), test_config())
        .await
        .unwrap()
}

/// Poll `cond` until it holds or two seconds pass.
async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&aes70::protocol::EventNotification) + Send + Sync) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    (count, move |_: &aes70::protocol::EventNotification| {
        c.fetch_add(1, Ordering::SeqCst);
    })
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_discovery_and_typed_calls() {
    let (_device, connector) = serve();
    let conn = connect(&connector).await;

    let members = conn.get_members(ono::ROOT_BLOCK).await.unwrap();
    let onos: Vec<u32> = members.iter().map(|m| m.ono).collect();
    assert_eq!(onos, vec![ono::SUBSCRIPTION_MANAGER, ono::FIRST_DYNAMIC]);
    assert_eq!(conn.cached_object_count(), 2);

    let gain = conn.resolve_object(ono::FIRST_DYNAMIC).await.unwrap();
    assert_eq!(gain.class_name(), Some("OcaWorker"));
    assert_eq!(conn.get_role(ono::FIRST_DYNAMIC).await.unwrap(), "Gain");

    conn.call::<_, ()>(ono::FIRST_DYNAMIC, SET_GAIN, &(-12.5f32,))
        .await
        .unwrap();
    let db: f32 = conn.call(ono::FIRST_DYNAMIC, GET_GAIN, &()).await.unwrap();
    assert_eq!(db, -12.5);

    let all = conn.get_members_recursive(ono::ROOT_BLOCK).await.unwrap();
    assert_eq!(all.len(), 2);

    conn.disconnect().await;
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_handler_error_becomes_status() {
    let (_device, connector) = serve();
    let conn = connect(&connector).await;

    let err = conn
        .call::<_, ()>(ono::FIRST_DYNAMIC, SET_GAIN, &(99.0f32,))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Status(Status::ParameterOutOfRange)));

    let err = conn.get_role(31_337).await.unwrap_err();
    assert!(matches!(err, Error::Status(Status::BadONo)));

    // Malformed setter argument.
    let err = conn
        .call::<_, ()>(ono::FIRST_DYNAMIC, SET_GAIN, &(1u8,))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Status(Status::BadFormat)));

    // The session survives errors.
    assert!(conn.get_lockable(ono::FIRST_DYNAMIC).await.unwrap());
}

#[tokio::test]
async fn test_event_fan_out_exactly_once() {
    let (device, connector) = serve();
    let a = connect(&connector).await;
    let b = connect(&connector).await;
    let bystander = connect(&connector).await;

    let overload = Event::new(ono::FIRST_DYNAMIC, OVERLOAD);
    let (count_a, cb_a) = counter();
    let (count_b, cb_b) = counter();
    let (count_other, cb_other) = counter();
    a.subscribe_event(overload, cb_a).await.unwrap();
    b.subscribe_event(overload, cb_b).await.unwrap();
    bystander
        .subscribe_event(Event::new(ono::ROOT_BLOCK, OVERLOAD), cb_other)
        .await
        .unwrap();

    assert_eq!(device.notify(overload, &[]), 2);

    assert!(eventually(|| count_a.load(Ordering::SeqCst) == 1).await);
    assert!(eventually(|| count_b.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count_a.load(Ordering::SeqCst), 1);
    assert_eq!(count_b.load(Ordering::SeqCst), 1);
    assert_eq!(count_other.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_property_and_event_subscriptions_are_distinct() {
    let (_device, connector) = serve();
    let conn = connect(&connector).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let property = conn
        .subscribe_property(ono::FIRST_DYNAMIC, GAIN, move |n| {
            let (property, db, change): (PropertyId, f32, PropertyChangeType) =
                n.decode_params().unwrap();
            sink.lock().push((property, db, change));
        })
        .await
        .unwrap();
    let (events, cb) = counter();
    conn.subscribe_event(Event::new(ono::FIRST_DYNAMIC, PROPERTY_CHANGED), cb)
        .await
        .unwrap();

    conn.call::<_, ()>(ono::FIRST_DYNAMIC, SET_GAIN, &(3.0f32,))
        .await
        .unwrap();

    assert!(eventually(|| seen.lock().len() == 1 && events.load(Ordering::SeqCst) == 1).await);
    assert_eq!(
        seen.lock()[0],
        (GAIN, 3.0, PropertyChangeType::CurrentChanged)
    );

    conn.unsubscribe(property).await.unwrap();
    conn.call::<_, ()>(ono::FIRST_DYNAMIC, SET_GAIN, &(4.0f32,))
        .await
        .unwrap();
    assert!(eventually(|| events.load(Ordering::SeqCst) == 2).await);
    assert_eq!(seen.lock().len(), 1);
}

#[tokio::test]
async fn test_reconnect_replays_subscriptions_and_keeps_stale_objects() {
    let (device, connector) = serve();
    let conn = connect(&connector).await;

    conn.resolve_object(ono::FIRST_DYNAMIC).await.unwrap();
    let overload = Event::new(ono::FIRST_DYNAMIC, OVERLOAD);
    let (count, cb) = counter();
    conn.subscribe_event(overload, cb).await.unwrap();
    assert_eq!(device.subscription_manager().table().len(), 1);

    assert_eq!(device.disconnect_all(), 1);

    assert!(eventually(|| conn.stats().reconnects == 1).await);
    assert!(conn.wait_for_state(ConnectionState::Connected, Duration::from_secs(2)).await);
    let cached = conn.cached_object(ono::FIRST_DYNAMIC).unwrap();
    assert!(cached.is_stale());
    cached.ensure_usable().unwrap();

    // The replayed subscription lands on the new controller session.
    assert!(eventually(|| device.subscription_manager().table().len() == 1
        && device.controllers().len() == 1)
        .await);
    assert_eq!(device.notify(overload, &[]), 1);
    assert!(eventually(|| count.load(Ordering::SeqCst) == 1).await);

    assert_eq!(conn.refresh_objects().await.unwrap(), 1);
    assert!(!conn.cached_object(ono::FIRST_DYNAMIC).unwrap().is_stale());
}

#[tokio::test]
async fn test_no_reconnect_closes_connection() {
    let (device, connector) = serve();
    let mut config = test_config();
    config.options.automatic_reconnect = false;
    let conn = Connection::connect(Arc::new(connector.transport()), config)
        .await
        .unwrap();
    conn.get_role(ono::ROOT_BLOCK).await.unwrap();

    device.disconnect_all();
    assert!(conn.wait_for_state(ConnectionState::Closed, Duration::from_secs(2)).await);
    assert!(matches!(
        conn.get_role(ono::ROOT_BLOCK).await,
        Err(Error::NotConnected)
    ));
}

#[tokio::test]
async fn test_locks_released_when_controller_leaves() {
    let (device, connector) = serve();
    let owner = connect(&connector).await;
    let other = connect(&connector).await;

    owner.lock(ono::FIRST_DYNAMIC).await.unwrap();
    let err = other
        .call::<_, ()>(ono::FIRST_DYNAMIC, SET_GAIN, &(1.0f32,))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Status(Status::Locked)));
    let err = other.get_role(ono::FIRST_DYNAMIC).await.unwrap_err();
    assert!(matches!(err, Error::Status(Status::Locked)));

    owner.disconnect().await;
    assert!(eventually(|| device.controllers().len() == 1).await);

    other.lock_readonly(ono::FIRST_DYNAMIC).await.unwrap();
    other.unlock(ono::FIRST_DYNAMIC).await.unwrap();
}

#[tokio::test]
async fn test_datagram_controller_created_lazily() {
    let device = Device::new(DeviceConfig::default()).unwrap();
    device.add_object(Gain::new()).unwrap();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = socket.local_addr().unwrap();
    let server = device.clone();
    tokio::spawn(async move { server.serve_datagram(socket).await });

    assert!(device.controllers().is_empty());
    let conn = Connection::connect_udp(addr, test_config()).await.unwrap();
    assert!(conn.config().max_pdu_size <= aes70::protocol::DATAGRAM_MAX_PDU_SIZE);

    let members = conn.get_members(ono::ROOT_BLOCK).await.unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(device.controllers().len(), 1);

    let (count, cb) = counter();
    let overload = Event::new(ono::FIRST_DYNAMIC, OVERLOAD);
    conn.subscribe_event(overload, cb).await.unwrap();
    assert_eq!(device.notify(overload, &[]), 1);
    assert!(eventually(|| count.load(Ordering::SeqCst) == 1).await);
}
