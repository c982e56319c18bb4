// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP stream transport.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use super::{StreamHalves, Transport, TransportError, TransportListener};

/// TCP connection to a device, or an accepted connection from a controller.
pub struct TcpTransport {
    /// Dial address; `None` for accepted connections.
    remote: Option<SocketAddr>,
    peer: String,
    halves: StreamHalves,
}

impl TcpTransport {
    /// A transport that dials `remote` on [`Transport::connect`].
    pub fn new(remote: SocketAddr) -> Self {
        Self {
            remote: Some(remote),
            peer: remote.to_string(),
            halves: StreamHalves::empty(),
        }
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Self {
            remote: None,
            peer,
            halves: StreamHalves::new(reader, writer),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let Some(remote) = self.remote else {
            return if self.halves.is_open().await {
                Ok(())
            } else {
                Err(TransportError::NotConnected)
            };
        };
        self.halves.close().await;
        let stream = TcpStream::connect(remote)
            .await
            .map_err(|source| TransportError::Connect {
                addr: remote.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        self.halves.install(reader, writer).await;
        Ok(())
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
        self.peer.clone()
    }
}

/// Accepts OCP.1 controllers over TCP.
pub struct TcpTransportListener {
    listener: TcpListener,
}

impl TcpTransportListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
        })
    }

    pub fn local_socket_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait]
impl TransportListener for TcpTransportListener {
    async fn accept(&self) -> Result<Arc<dyn Transport>, TransportError> {
        let (stream, _) = self.listener.accept().await?;
        Ok(Arc::new(TcpTransport::from_stream(stream)))
    }

    fn local_addr(&self) -> String {
        self.listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unbound".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_roundtrip() {
        let listener = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_socket_addr().unwrap();

        let client = TcpTransport::new(addr);
        let (connected, accepted) = tokio::join!(client.connect(), listener.accept());
        connected.unwrap();
        let server = accepted.unwrap();

        client.write(&[1, 2, 3]).await.unwrap();
        assert_eq!(server.read(3).await.unwrap(), vec![1, 2, 3]);

        client.disconnect().await.unwrap();
        assert!(server.read(1).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };
        let client = TcpTransport::new(addr);
        assert!(matches!(
            client.connect().await,
            Err(TransportError::Connect { .. })
        ));
    }
}
