// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport abstraction.
//!
//! The protocol engine only needs "read exactly N bytes" and "write these
//! bytes" from a peer. Stream sockets, datagram sockets and the in-process
//! loopback all satisfy that through [`Transport`]. Any failure is reported
//! as a [`TransportError`], which sessions treat as connection loss.

mod loopback;
mod tcp;
mod udp;

pub use loopback::{loopback, LoopbackConnector, LoopbackListener, LoopbackTransport};
pub use tcp::{TcpTransport, TcpTransportListener};
pub use udp::UdpTransport;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,

    #[error("connection closed by peer")]
    Closed,

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("listener closed")]
    ListenerClosed,

    #[error("no traffic from peer for {0:?}")]
    Stale(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// Transport traits
// ---------------------------------------------------------------------------

/// One bidirectional byte channel to a peer.
///
/// Methods take `&self`: reads and writes may run concurrently from
/// different tasks. Implementations serialize each direction on its own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open (or re-open) the channel.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Read exactly `len` bytes, suspending until they arrive.
    async fn read(&self, len: usize) -> Result<Vec<u8>, TransportError>;

    /// Write `bytes`, returning how many were written.
    async fn write(&self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Close the channel. Pending and later reads fail.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Peer description for logs.
    fn peer(&self) -> String;
}

/// Accept side of a stream transport.
#[async_trait]
pub trait TransportListener: Send + Sync {
    /// Wait for the next peer.
    async fn accept(&self) -> Result<Arc<dyn Transport>, TransportError>;

    /// Local address description for logs.
    fn local_addr(&self) -> String;
}

// ---------------------------------------------------------------------------
// Split stream halves
// ---------------------------------------------------------------------------

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read and write halves of a byte stream, each behind its own lock.
pub(crate) struct StreamHalves {
    reader: Mutex<Option<BoxedReader>>,
    writer: Mutex<Option<BoxedWriter>>,
}

impl StreamHalves {
    pub(crate) fn empty() -> Self {
        Self {
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    pub(crate) fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
            writer: Mutex::new(Some(Box::new(writer))),
        }
    }

    pub(crate) async fn install<R, W>(&self, reader: R, writer: W)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        *self.writer.lock().await = Some(Box::new(writer));
        *self.reader.lock().await = Some(Box::new(reader));
    }

    pub(crate) async fn read_exact(&self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(TransportError::NotConnected)?;
        let mut buf = vec![0u8; len];
        match reader.read_exact(&mut buf).await {
            Ok(_) => Ok(buf),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                *guard = None;
                Err(TransportError::Closed)
            }
            Err(e) => {
                *guard = None;
                Err(TransportError::Io(e))
            }
        }
    }

    pub(crate) async fn write_all(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        let result = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        }
        .await;
        match result {
            Ok(()) => Ok(bytes.len()),
            Err(e) => {
                *guard = None;
                Err(e.into())
            }
        }
    }

    /// Shut the write half down and drop both halves.
    ///
    /// The writer goes first so a reader blocked on the reader lock is woken
    /// by the peer's EOF rather than holding the lock forever.
    pub(crate) async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }

    pub(crate) async fn is_open(&self) -> bool {
        self.writer.lock().await.is_some()
    }
}
