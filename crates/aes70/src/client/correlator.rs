// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/response correlation by command handle.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::Response;

/// Outstanding commands of one connection.
///
/// Handles increase monotonically, wrap around, and skip 0 as well as any
/// value still outstanding. An entry is removed as soon as its waiter
/// completes, times out or is dropped, so a late response can never reach a
/// later command that happens to reuse the handle.
pub struct Correlator {
    next_handle: AtomicU32,
    pending: DashMap<u32, oneshot::Sender<Response>>,
}

/// A registered command waiting for its response.
///
/// Dropping it releases the handle.
pub struct PendingResponse<'a> {
    correlator: &'a Correlator,
    handle: u32,
    rx: Option<oneshot::Receiver<Response>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU32::new(1),
            pending: DashMap::new(),
        }
    }

    /// Allocate a handle and register a waiter for it.
    pub fn register(&self) -> PendingResponse<'_> {
        let (tx, rx) = oneshot::channel();
        loop {
            let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
            if handle == 0 {
                continue;
            }
            if let Entry::Vacant(slot) = self.pending.entry(handle) {
                slot.insert(tx);
                return PendingResponse {
                    correlator: self,
                    handle,
                    rx: Some(rx),
                };
            }
        }
    }

    /// Allocate a handle for a command that expects no response.
    ///
    /// Skips 0 and outstanding handles like [`register`](Self::register),
    /// but leaves no entry behind.
    pub fn next_handle(&self) -> u32 {
        loop {
            let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
            if handle != 0 && !self.pending.contains_key(&handle) {
                return handle;
            }
        }
    }

    /// Hand `response` to its waiter. Returns false when nobody waits for it.
    pub fn resolve(&self, response: Response) -> bool {
        let handle = response.handle;
        match self.pending.remove(&handle) {
            Some((_, tx)) => {
                if tx.send(response).is_err() {
                    debug!(handle, "waiter dropped before response was delivered");
                    return false;
                }
                true
            }
            None => {
                debug!(handle, "discarding response for unknown or expired handle");
                false
            }
        }
    }

    /// Drop every waiter; each sees [`Error::NotConnected`].
    pub fn fail_all(&self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        if count > 0 {
            debug!(count, "failed outstanding commands");
        }
        count
    }

    /// Number of commands awaiting a response.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    fn set_next_handle(&self, handle: u32) {
        self.next_handle.store(handle, Ordering::Relaxed);
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingResponse<'_> {
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Race the response against `timeout`. The handle is released either way.
    pub async fn await_response(mut self, timeout: Duration) -> Result<Response> {
        let Some(rx) = self.rx.take() else {
            return Err(Error::NotConnected);
        };
        let result = tokio::time::timeout(timeout, rx).await;
        self.correlator.pending.remove(&self.handle);
        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::Timeout {
                handle: self.handle,
                after: timeout,
            }),
        }
    }
}

impl Drop for PendingResponse<'_> {
    fn drop(&mut self) {
        self.correlator.pending.remove(&self.handle);
    }
}
