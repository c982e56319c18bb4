// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! AES70 (OCA) protocol engine.
//!
//! Both halves of the Open Control Architecture over OCP.1:
//!
//! - [`client`]: a controller connecting to devices, issuing commands and
//!   receiving events ([`Connection`]).
//! - [`device`]: a device accepting controllers, dispatching commands to its
//!   objects and fanning events out to subscribers ([`Device`]).
//!
//! Underneath sit the binary [`codec`], the PDU framer in [`protocol`] and
//! the [`transport`] boundary with loopback, TCP and UDP adapters.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use aes70::{Connection, ConnectionConfig, Device, DeviceConfig};
//! use aes70::transport::{loopback, TransportListener};
//! use aes70::types::ono;
//!
//! # async fn example() -> aes70::Result<()> {
//! let device = Device::new(DeviceConfig::default())?;
//! let (connector, listener) = loopback();
//! let server = device.clone();
//! tokio::spawn(async move { server.serve(listener).await });
//!
//! let conn = Connection::connect(Arc::new(connector.transport()), ConnectionConfig::default()).await?;
//! let members = conn.get_members(ono::ROOT_BLOCK).await?;
//! assert!(!members.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod class_registry;
pub mod client;
pub mod codec;
pub mod device;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod types;

pub use client::{Connection, ConnectionConfig, ConnectionOptions, ConnectionState};
pub use device::{Device, DeviceConfig, OcaObject};
pub use error::{ConfigError, Error, Result};
pub use types::{ClassIdentification, Event, EventId, MethodId, ONo, PropertyId, Status};
