// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device endpoints: the accept loop for stream transports and the receive
//! loop for datagram sockets.
//!
//! Datagram peers have no connection. A controller is created on the first
//! PDU from a new address and fed every later PDU from it; a periodic sweep
//! evicts peers silent beyond their stale threshold (3 x their announced
//! heartbeat, or the configured idle timeout when they never sent one).

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::{decode_pdu, DATAGRAM_MAX_PDU_SIZE};
use crate::transport::{Transport, TransportError, TransportListener};

use super::controller::{start_datagram_controller, start_stream_controller, Inbound};
use super::object::ControllerId;
use super::Device;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ============================================================================
// Stream endpoint
// ============================================================================

/// Accept peers from `listener` until it closes.
pub(crate) async fn serve_stream<L>(device: Device, listener: L) -> Result<()>
where
    L: TransportListener,
{
    info!(addr = %listener.local_addr(), "device listening");
    loop {
        match listener.accept().await {
            Ok(transport) => {
                start_stream_controller(&device, transport);
            }
            Err(TransportError::ListenerClosed) => {
                debug!(addr = %listener.local_addr(), "listener closed");
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

// ============================================================================
// Datagram endpoint
// ============================================================================

/// Write side of one datagram peer, over the shared socket.
struct DatagramPeer {
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
}

#[async_trait]
impl Transport for DatagramPeer {
    async fn connect(&self) -> std::result::Result<(), TransportError> {
        Ok(())
    }

    async fn read(&self, _len: usize) -> std::result::Result<Vec<u8>, TransportError> {
        // Inbound datagrams are routed by the endpoint, never read here.
        Err(TransportError::NotConnected)
    }

    async fn write(&self, bytes: &[u8]) -> std::result::Result<usize, TransportError> {
        Ok(self.socket.send_to(bytes, self.addr).await?)
    }

    async fn disconnect(&self) -> std::result::Result<(), TransportError> {
        Ok(())
    }

    fn peer(&self) -> String {
        format!("udp:{}", self.addr)
    }
}

struct Route {
    controller: ControllerId,
    inbound: mpsc::Sender<Inbound>,
    last_seen: Instant,
}

/// Receive errors that concern one peer rather than the socket.
///
/// An ICMP port-unreachable from a departed peer surfaces as a reset or
/// refusal on the next receive.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// Serve controllers over a bound UDP socket until it fails.
pub(crate) async fn serve_datagram(device: Device, socket: UdpSocket) -> Result<()> {
    let socket = Arc::new(socket);
    if let Ok(addr) = socket.local_addr() {
        info!(%addr, "device listening (datagram)");
    }
    let mut routes: HashMap<SocketAddr, Route> = HashMap::new();
    let mut sweep = tokio::time::interval(device.config().sweep_interval());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = vec![0u8; 65_535];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, addr)) => route_datagram(&device, &socket, &mut routes, addr, &buf[..len]),
                Err(e) if is_transient(&e) => warn!(error = %e, "datagram receive failed"),
                Err(e) => return Err(TransportError::from(e).into()),
            },
            _ = sweep.tick() => sweep_routes(&device, &mut routes),
        }
    }
}

/// Hand one datagram to its peer's controller without ever waiting on it.
fn route_datagram(
    device: &Device,
    socket: &Arc<UdpSocket>,
    routes: &mut HashMap<SocketAddr, Route>,
    addr: SocketAddr,
    datagram: &[u8],
) {
    let item: Inbound = if datagram.len() > DATAGRAM_MAX_PDU_SIZE {
        Err(crate::protocol::PduError::TooLarge {
            size: datagram.len(),
            max: DATAGRAM_MAX_PDU_SIZE,
        }
        .into())
    } else {
        decode_pdu(datagram).map_err(Into::into)
    };

    // A controller that went away leaves a dead route behind.
    if routes.get(&addr).is_some_and(|r| !device.controllers().contains(r.controller)) {
        routes.remove(&addr);
    }

    if !routes.contains_key(&addr) {
        if let Err(e) = &item {
            debug!(%addr, error = %e, "dropping malformed datagram from unknown peer");
            return;
        }
        let transport = Arc::new(DatagramPeer {
            socket: Arc::clone(socket),
            addr,
        });
        let Some((controller, inbound)) = start_datagram_controller(device, transport) else {
            warn!(%addr, "controller limit reached, dropping datagram");
            return;
        };
        routes.insert(
            addr,
            Route {
                controller,
                inbound,
                last_seen: Instant::now(),
            },
        );
    }

    if let Some(route) = routes.get_mut(&addr) {
        route.last_seen = Instant::now();
        match route.inbound.try_send(item) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%addr, controller = route.controller, "controller busy, dropping datagram");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                routes.remove(&addr);
            }
        }
    }
}

fn sweep_routes(device: &Device, routes: &mut HashMap<SocketAddr, Route>) {
    let idle_timeout = device.config().datagram_idle_timeout();
    routes.retain(|addr, route| {
        let Some(info) = device.controllers().info(route.controller) else {
            return false;
        };
        let threshold = info.peer_heartbeat.map_or(idle_timeout, |h| h * 3);
        let silence = route.last_seen.elapsed();
        if silence > threshold {
            debug!(%addr, controller = route.controller, ?silence, "evicting silent datagram peer");
            device.controllers().close(route.controller);
            return false;
        }
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::object::CommandContext;
    use crate::device::{DeviceConfig, OcaObject};
    use crate::protocol::constants::root;
    use crate::protocol::{Command, KeepAlive, Message, Parameters, Pdu};
    use crate::types::{class, ono, ClassIdentification, MethodId, Status};

    /// Takes 50 ms per command.
    struct Slow;

    impl OcaObject for Slow {
        fn class_identification(&self) -> ClassIdentification {
            ClassIdentification::new(class::worker(), 2)
        }

        fn handle_command(&self, _: &Command, _: &CommandContext<'_>) -> std::result::Result<Parameters, Status> {
            std::thread::sleep(Duration::from_millis(50));
            Ok(Parameters::empty())
        }
    }

    async fn bound() -> Arc<UdpSocket> {
        Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap())
    }

    async fn route_to(device: &Device, socket: &Arc<UdpSocket>, addr: SocketAddr) -> Route {
        let peer = Arc::new(DatagramPeer {
            socket: Arc::clone(socket),
            addr,
        });
        let (controller, inbound) = start_datagram_controller(device, peer).unwrap();
        Route {
            controller,
            inbound,
            last_seen: Instant::now(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_busy_peer_does_not_delay_others() {
        let device = Device::new(DeviceConfig::default()).unwrap();
        device.register_object(5000, Arc::new(Slow)).unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let device_addr = socket.local_addr().unwrap();
        tokio::spawn(serve_datagram(device.clone(), socket));

        let busy = bound().await;
        for handle in 1..=60 {
            let cmd = Command::new(handle, 5000, MethodId::new(4, 1), 0, Vec::new());
            let bytes = Pdu::single(Message::Command(cmd)).encode().unwrap();
            busy.send_to(&bytes, device_addr).await.unwrap();
        }

        let other = bound().await;
        let get_role = Command::new(1, ono::ROOT_BLOCK, root::GET_ROLE, 0, Vec::new());
        let bytes = Pdu::single(Message::CommandRrq(get_role)).encode().unwrap();
        let start = Instant::now();
        other.send_to(&bytes, device_addr).await.unwrap();

        let mut buf = vec![0u8; 1500];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), other.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let elapsed = start.elapsed();
        let pdu = decode_pdu(&buf[..len]).unwrap();
        assert!(matches!(&pdu.messages[0], Message::Response(r) if r.status == Status::Ok));
        assert!(elapsed < Duration::from_millis(500), "answered after {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_after_idle_timeout() {
        let config = DeviceConfig {
            datagram_idle_timeout_ms: 2_000,
            ..Default::default()
        };
        let device = Device::new(config).unwrap();
        let socket = bound().await;
        let sink = bound().await;
        let addr = sink.local_addr().unwrap();
        let mut routes = HashMap::new();
        routes.insert(addr, route_to(&device, &socket, addr).await);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        sweep_routes(&device, &mut routes);
        assert_eq!(routes.len(), 1);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        sweep_routes(&device, &mut routes);
        assert!(routes.is_empty());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(device.controllers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_uses_three_heartbeats_when_announced() {
        // Idle timeout far beyond the heartbeat threshold.
        let config = DeviceConfig {
            datagram_idle_timeout_ms: 60_000,
            ..Default::default()
        };
        let device = Device::new(config).unwrap();
        let socket = bound().await;
        let sink = bound().await;
        let addr = sink.local_addr().unwrap();
        let route = route_to(&device, &socket, addr).await;
        route
            .inbound
            .send(Ok(Pdu::single(Message::KeepAlive(KeepAlive::Seconds(1)))))
            .await
            .unwrap();
        let mut routes = HashMap::new();
        routes.insert(addr, route);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        sweep_routes(&device, &mut routes);
        assert_eq!(routes.len(), 1);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        sweep_routes(&device, &mut routes);
        assert!(routes.is_empty());
    }

    #[tokio::test]
    async fn test_full_inbound_queue_drops_datagram() {
        let device = Device::new(DeviceConfig::default()).unwrap();
        device.register_object(5000, Arc::new(Slow)).unwrap();
        let socket = bound().await;
        let sink = bound().await;
        let addr = sink.local_addr().unwrap();
        let mut routes = HashMap::new();
        routes.insert(addr, route_to(&device, &socket, addr).await);

        let cmd = Command::new(1, 5000, MethodId::new(4, 1), 0, Vec::new());
        let bytes = Pdu::single(Message::Command(cmd)).encode().unwrap();
        // Never waits, however far the session falls behind.
        for _ in 0..200 {
            route_datagram(&device, &socket, &mut routes, addr, &bytes);
        }
        assert_eq!(routes.len(), 1);
        assert!(device.controllers().contains(routes[&addr].controller));
    }

    #[test]
    fn test_transient_receive_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
