// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller side: connection to a device, command correlation,
//! subscriptions and the remote object cache.

mod config;
mod connection;
mod correlator;
mod object_cache;
mod subscription;

pub use config::{ConnectionConfig, ConnectionOptions};
pub use connection::{Connection, ConnectionState, ConnectionStats};
pub use correlator::{Correlator, PendingResponse};
pub use object_cache::{ObjectCache, ObjectState, RemoteObject};
pub use subscription::{NotificationCallback, SubscriptionCache, SubscriptionKey, SubscriptionToken};
