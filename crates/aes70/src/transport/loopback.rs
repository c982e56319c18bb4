// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process transport over `tokio::io::duplex`.
//!
//! [`loopback`] returns a connector for controllers and a listener for the
//! device. Every [`Transport::connect`] on a connector-made transport opens a
//! fresh duplex pair and hands the device half to the listener, so
//! reconnects behave like a new TCP connection.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, Mutex};

use super::{StreamHalves, Transport, TransportError, TransportListener};

/// Bytes buffered in each direction of a loopback pair.
const DUPLEX_BUFFER: usize = 64 * 1024;

/// Create a connected connector/listener pair.
pub fn loopback() -> (LoopbackConnector, LoopbackListener) {
    let (tx, rx) = mpsc::channel(16);
    (
        LoopbackConnector {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        },
        LoopbackListener { rx: Mutex::new(rx) },
    )
}

/// Controller-side factory for loopback transports.
#[derive(Clone)]
pub struct LoopbackConnector {
    tx: mpsc::Sender<Arc<dyn Transport>>,
    next_id: Arc<AtomicU64>,
}

impl LoopbackConnector {
    /// A new, not yet connected transport bound to this connector's listener.
    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport {
            connector: Some(self.clone()),
            halves: StreamHalves::empty(),
            name: "loopback".to_string(),
        }
    }

    async fn open(&self) -> Result<(DuplexStream, String), TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("loopback#{id}");
        let (near, far) = tokio::io::duplex(DUPLEX_BUFFER);
        let device_side: Arc<dyn Transport> = Arc::new(LoopbackTransport::from_stream(far, &name));
        self.tx
            .send(device_side)
            .await
            .map_err(|_| TransportError::Connect {
                addr: name.clone(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "listener closed"),
            })?;
        Ok((near, name))
    }
}

/// One end of a loopback pair.
pub struct LoopbackTransport {
    connector: Option<LoopbackConnector>,
    halves: StreamHalves,
    name: String,
}

impl LoopbackTransport {
    fn from_stream(stream: DuplexStream, name: &str) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            connector: None,
            halves: StreamHalves::new(reader, writer),
            name: format!("{name} (device)"),
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        match &self.connector {
            Some(connector) => {
                self.halves.close().await;
                let (stream, _name) = connector.open().await?;
                let (reader, writer) = tokio::io::split(stream);
                self.halves.install(reader, writer).await;
                Ok(())
            }
            // Accepted ends cannot re-dial.
            None if self.halves.is_open().await => Ok(()),
            None => Err(TransportError::NotConnected),
        }
    }

    async fn read(&self, len: usize) -> Result<Vec<u8>, TransportError> {
        self.halves.read_exact(len).await
    }

    async fn write(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        self.halves.write_all(bytes).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.halves.close().await;
        Ok(())
    }

    fn peer(&self) -> String {
        self.name.clone()
    }
}

/// Device-side accept queue of a loopback pair.
pub struct LoopbackListener {
    rx: Mutex<mpsc::Receiver<Arc<dyn Transport>>>,
}

#[async_trait]
impl TransportListener for LoopbackListener {
    async fn accept(&self) -> Result<Arc<dyn Transport>, TransportError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::ListenerClosed)
    }

    fn local_addr(&self) -> String {
        "loopback".to_string()
    }
}
