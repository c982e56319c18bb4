// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP datagram transport (controller side).
//!
//! Each datagram carries whole PDUs. Reads are served from a buffer that is
//! refilled one datagram at a time, so the framer's header-then-body reads
//! work unchanged.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use super::{Transport, TransportError};

/// Largest datagram accepted.
const MAX_DATAGRAM: usize = 65_535;

pub struct UdpTransport {
    remote: SocketAddr,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    pending: Mutex<VecDeque<u8>>,
}

impl UdpTransport {
    pub fn new(remote: SocketAddr) -> Self {
        Self {
            remote,
            socket: Mutex::new(None),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    async fn socket(&self) -> Result<Arc<UdpSocket>, TransportError> {
        self.socket
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let bind: SocketAddr = if self.remote.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket
            .connect(self.remote)
            .await
            .map_err(|source| TransportError::Connect {
                addr: self.remote.to_string(),
                source,
            })?;
        *self.socket.lock().await = Some(Arc::new(socket));
        self.pending.lock().await.clear();
        Ok(())
    }

    async fn read(&self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut pending = self.pending.lock().await;
        if pending.len() < len {
            let socket = self.socket().await?;
            let mut buf = vec![0u8; MAX_DATAGRAM];
            while pending.len() < len {
                let n = socket.recv(&mut buf).await?;
                pending.extend(&buf[..n]);
            }
        }
        Ok(pending.drain(..len).collect())
    }

    async fn write(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        let socket = self.socket().await?;
        Ok(socket.send(bytes).await?)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.socket.lock().await.take();
        self.pending.lock().await.clear();
        Ok(())
    }

    fn peer(&self) -> String {
        format!("udp://{}", self.remote)
    }
}
