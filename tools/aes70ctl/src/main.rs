// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! aes70ctl: poke at AES70 devices over OCP.1.
//!
//! # Usage
//!
//! ```bash
//! # Round-trip time to a device
//! aes70ctl ping 192.168.1.20:65000
//!
//! # Walk the object tree
//! aes70ctl inspect 192.168.1.20:65000 --recursive
//!
//! # Raw method call: OcaRoot.GetRole on the root block
//! aes70ctl call 192.168.1.20:65000 100 1.5
//!
//! # Print property changes of object 4096
//! aes70ctl watch 192.168.1.20:65000 4096 --property 4.1
//!
//! # Bare device for interop checks
//! aes70ctl serve --bind 0.0.0.0:65000
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use aes70::class_registry::ClassRegistry;
use aes70::protocol::{hex_dump, EventNotification, Parameters};
use aes70::transport::{TcpTransportListener, TransportError};
use aes70::types::{ono, Event, PROPERTY_CHANGED};
use aes70::{
    Connection, ConnectionConfig, Device, DeviceConfig, EventId, MethodId, ONo, PropertyId,
};
use clap::{Args, Parser, Subcommand};
use tokio::net::UdpSocket;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// AES70 / OCA command line tool
#[derive(Parser, Debug)]
#[command(name = "aes70ctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

/// How to reach a device.
#[derive(Args, Debug)]
struct Target {
    /// Device address (host:port)
    addr: SocketAddr,

    /// Use UDP instead of TCP
    #[arg(long)]
    udp: bool,

    /// Connection configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Response timeout in milliseconds (overrides the config file)
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Measure command round-trip time
    Ping {
        #[command(flatten)]
        target: Target,

        /// Number of probes
        #[arg(short = 'n', long, default_value = "4")]
        count: u32,
    },

    /// List the members of a block with their classes and roles
    Inspect {
        #[command(flatten)]
        target: Target,

        /// Block to list
        #[arg(long, default_value_t = ono::ROOT_BLOCK)]
        block: ONo,

        /// Include members of nested blocks
        #[arg(short, long)]
        recursive: bool,
    },

    /// Send a raw command and print the response
    Call {
        #[command(flatten)]
        target: Target,

        /// Target object number
        ono: ONo,

        /// Method as <level>.<index>
        method: MethodId,

        /// Encoded parameters as hex
        #[arg(long, default_value = "")]
        params: String,

        /// Parameter count carried in the command
        #[arg(long, default_value = "0")]
        count: u8,
    },

    /// Subscribe to an event or property and print notifications
    Watch {
        #[command(flatten)]
        target: Target,

        /// Emitter object number
        ono: ONo,

        /// Event as <level>.<index> (defaults to PropertyChanged)
        #[arg(long, conflicts_with = "property")]
        event: Option<EventId>,

        /// Only changes of this property, as <level>.<index>
        #[arg(long)]
        property: Option<PropertyId>,
    },

    /// Run a device with only the root block and subscription manager
    Serve {
        /// Bind address
        #[arg(short, long, default_value = "0.0.0.0:65000")]
        bind: SocketAddr,

        /// Serve datagrams instead of streams
        #[arg(long)]
        udp: bool,

        /// Device configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> CliResult {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Command::Ping { target, count } => ping(&target, count).await,
        Command::Inspect {
            target,
            block,
            recursive,
        } => inspect(&target, block, recursive).await,
        Command::Call {
            target,
            ono,
            method,
            params,
            count,
        } => call(&target, ono, method, &params, count).await,
        Command::Watch {
            target,
            ono,
            event,
            property,
        } => watch(&target, ono, event, property).await,
        Command::Serve { bind, udp, config } => serve(bind, udp, config).await,
    }
}

async fn connect(target: &Target) -> CliResult<Connection> {
    let mut config = match &target.config {
        Some(path) => ConnectionConfig::from_file(path)?,
        None => ConnectionConfig::default(),
    };
    if let Some(ms) = target.timeout_ms {
        config.response_timeout_ms = ms;
    }
    let conn = if target.udp {
        Connection::connect_udp(target.addr, config).await?
    } else {
        Connection::connect_tcp(target.addr, config).await?
    };
    Ok(conn)
}

async fn ping(target: &Target, count: u32) -> CliResult {
    let conn = connect(target).await?;
    let mut rtts = Vec::with_capacity(count as usize);
    for seq in 0..count {
        let start = Instant::now();
        let ident = conn.get_class_identification(ono::ROOT_BLOCK).await?;
        let rtt = start.elapsed();
        println!("seq={seq} class={ident} time={:.3} ms", rtt.as_secs_f64() * 1e3);
        rtts.push(rtt);
        if seq + 1 < count {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
    if let (Some(min), Some(max)) = (rtts.iter().min(), rtts.iter().max()) {
        let avg = rtts.iter().sum::<Duration>() / rtts.len() as u32;
        println!(
            "--- {} ---\n{} probes, min/avg/max = {:.3}/{:.3}/{:.3} ms",
            target.addr,
            rtts.len(),
            min.as_secs_f64() * 1e3,
            avg.as_secs_f64() * 1e3,
            max.as_secs_f64() * 1e3
        );
    }
    conn.disconnect().await;
    Ok(())
}

async fn inspect(target: &Target, block: ONo, recursive: bool) -> CliResult {
    let conn = connect(target).await?;
    let names = ClassRegistry::standard_names();

    let rows: Vec<(ONo, aes70::ClassIdentification, ONo)> = if recursive {
        conn.get_members_recursive(block)
            .await?
            .into_iter()
            .map(|m| (m.member.ono, m.member.class_identification, m.container))
            .collect()
    } else {
        conn.get_members(block)
            .await?
            .into_iter()
            .map(|m| (m.ono, m.class_identification, block))
            .collect()
    };

    println!("{:>8}  {:>8}  {:<24} {:<24} ROLE", "ONO", "BLOCK", "CLASS", "KNOWN AS");
    for (member, class, container) in rows {
        let known = names
            .resolve(&class)
            .map_or("-", |(_, name)| *name);
        let role = match conn.get_role(member).await {
            Ok(role) => role,
            Err(e) => format!("<{e}>"),
        };
        println!(
            "{member:>8}  {container:>8}  {:<24} {known:<24} {role}",
            class.to_string()
        );
    }
    conn.disconnect().await;
    Ok(())
}

async fn call(target: &Target, ono: ONo, method: MethodId, params: &str, count: u8) -> CliResult {
    let bytes = parse_hex(params)?;
    let conn = connect(target).await?;
    let timeout = conn.config().response_timeout();
    let response = conn
        .send_command(ono, method, Parameters { count, bytes }, timeout)
        .await?;
    println!("status: {}", response.status);
    println!("params: {}", response.param_count);
    if !response.parameters.is_empty() {
        println!("{}", hex_dump(&response.parameters));
    }
    conn.disconnect().await;
    Ok(())
}

async fn watch(
    target: &Target,
    ono: ONo,
    event: Option<EventId>,
    property: Option<PropertyId>,
) -> CliResult {
    let conn = connect(target).await?;
    let print = |n: &EventNotification| {
        let kind = match &n.exception {
            Some(ex) => format!("exception {:?}", ex.exception_type),
            None => format!("event {}", n.event.event_id),
        };
        println!(
            "{} emitter={} [{}]",
            kind,
            n.event.emitter_ono,
            hex_dump(&n.parameters)
        );
    };

    let token = match property {
        Some(property) => conn.subscribe_property(ono, property, print).await?,
        None => {
            let event = Event::new(ono, event.unwrap_or(PROPERTY_CHANGED));
            conn.subscribe_event(event, print).await?
        }
    };
    info!(ono, "watching, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    if let Err(e) = conn.unsubscribe(token).await {
        warn!(error = %e, "unsubscribe failed");
    }
    conn.disconnect().await;
    Ok(())
}

async fn serve(bind: SocketAddr, udp: bool, config: Option<PathBuf>) -> CliResult {
    let config = match config {
        Some(path) => DeviceConfig::from_file(&path)?,
        None => DeviceConfig::default(),
    };
    let device = Device::new(config)?;

    let task = tokio::spawn(run_device(device.clone(), bind, udp));
    info!(%bind, udp, "device serving, ctrl-c to stop");

    tokio::select! {
        result = task => result??,
        _ = tokio::signal::ctrl_c() => {
            let closed = device.disconnect_all();
            info!(closed, "shutting down");
        }
    }
    Ok(())
}

async fn run_device(device: Device, bind: SocketAddr, udp: bool) -> aes70::Result<()> {
    if udp {
        let socket = UdpSocket::bind(bind).await.map_err(TransportError::from)?;
        device.serve_datagram(socket).await
    } else {
        let listener = TcpTransportListener::bind(bind).await?;
        device.serve(listener).await
    }
}

fn parse_hex(s: &str) -> CliResult<Vec<u8>> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in {s:?}").into());
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).map_err(Into::into))
        .collect()
}
