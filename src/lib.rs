//! streamprobe - a point-to-point network throughput probe
//!
//! A client pushes a configurable volume of payload data to a server over
//! TCP or UDP under one of two acknowledgment disciplines, and both sides
//! report packet/byte counts and elapsed time.
//!
//! # Features
//!
//! - Stream (TCP) and datagram (UDP) transports on one port
//! - Streaming (no flow control) and stop-and-wait (one message in flight)
//!   acknowledgment disciplines
//! - Datagram sessions keyed by peer address with idle-timeout completion
//! - Asynchronous I/O using tokio
//!
//! The probe measures raw achievable throughput under application-level
//! flow control only; it is not a reliable transport.

pub mod client;
pub mod config;
pub mod error;
pub mod measurements;
pub mod protocol;
pub mod server;
pub mod transfer;

pub use client::Client;
pub use config::{Config, Mode, Protocol};
pub use error::{Error, Result};
pub use measurements::{Measurements, TransferResult};
pub use protocol::{AckProtocol, PreambleMessage};
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
