use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

use crate::protocol::{AckProtocol, DEFAULT_PORT};
use crate::{Error, Result};

/// Transport protocol used for a probe.
///
/// # Examples
///
/// ```
/// use streamprobe::{Config, Protocol};
///
/// let config = Config::client("127.0.0.1".to_string(), 5991)
///     .with_protocol(Protocol::Udp);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// Connection-oriented byte-stream transport
    Tcp,
    /// Connectionless datagram transport
    Udp,
}

/// Probe mode: client or server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Server mode - listens for incoming transfers
    Server,
    /// Client mode - connects to a server and drives a transfer
    Client,
}

/// How long a datagram session may sit idle before the server treats it as
/// complete. Datagram delivery gives no connection-close signal, so the
/// idle deadline substitutes for one.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(850);

/// Default total transfer size for the given transport/discipline pair.
///
/// These bound test duration when the client does not override the size:
/// an unacknowledged TCP stream can move a megabyte quickly, while
/// stop-and-wait round trips and loss-prone datagram transfers get a
/// smaller default.
///
/// | transport | discipline | default bytes |
/// |-----------|------------|---------------|
/// | TCP       | Streaming  | 1_000_000     |
/// | TCP       | StopWait   | 10_000        |
/// | UDP       | Streaming  | 10_000        |
/// | UDP       | StopWait   | 10_000        |
pub fn default_transfer_size(protocol: Protocol, ack_protocol: AckProtocol) -> u32 {
    match (protocol, ack_protocol) {
        (Protocol::Tcp, AckProtocol::Streaming) => 1_000_000,
        _ => 10_000,
    }
}

/// Configuration for streamprobe clients and servers.
///
/// Use the builder methods to customize a configuration.
///
/// # Examples
///
/// ```
/// use streamprobe::{AckProtocol, Config, Protocol};
///
/// let config = Config::client("192.168.1.100".to_string(), 5991)
///     .with_protocol(Protocol::Udp)
///     .with_ack_protocol(AckProtocol::StopWait)
///     .with_payload_size(1024);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server mode or client mode
    pub mode: Mode,

    /// Transport protocol (TCP or UDP)
    pub protocol: Protocol,

    /// Port number to use
    pub port: u16,

    /// Server address (for client mode)
    pub server_addr: Option<String>,

    /// Bind address (for server mode)
    pub bind_addr: Option<IpAddr>,

    /// Acknowledgment discipline for the data phase
    pub ack_protocol: AckProtocol,

    /// Size in bytes of each payload message
    pub payload_size: u32,

    /// Total payload bytes to transfer; `None` selects the per
    /// transport/discipline default from [`default_transfer_size`]
    pub data_transfer_size: Option<u32>,

    /// Idle deadline for datagram sessions
    pub idle_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Client,
            protocol: Protocol::Tcp,
            port: DEFAULT_PORT,
            server_addr: None,
            bind_addr: None,
            ack_protocol: AckProtocol::Streaming,
            payload_size: 512,
            data_transfer_size: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl Config {
    /// Creates a new server configuration listening on `port`.
    ///
    /// # Examples
    ///
    /// ```
    /// use streamprobe::Config;
    ///
    /// let config = Config::server(5991);
    /// ```
    pub fn server(port: u16) -> Self {
        Self {
            mode: Mode::Server,
            port,
            ..Default::default()
        }
    }

    /// Creates a new client configuration targeting `server_addr:port`.
    ///
    /// # Examples
    ///
    /// ```
    /// use streamprobe::Config;
    ///
    /// let config = Config::client("192.168.1.100".to_string(), 5991);
    /// ```
    pub fn client(server_addr: String, port: u16) -> Self {
        Self {
            mode: Mode::Client,
            server_addr: Some(server_addr),
            port,
            ..Default::default()
        }
    }

    /// Sets the transport protocol.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the acknowledgment discipline.
    pub fn with_ack_protocol(mut self, ack_protocol: AckProtocol) -> Self {
        self.ack_protocol = ack_protocol;
        self
    }

    /// Sets the per-message payload size in bytes.
    pub fn with_payload_size(mut self, payload_size: u32) -> Self {
        self.payload_size = payload_size;
        self
    }

    /// Overrides the total transfer size in bytes.
    pub fn with_data_transfer_size(mut self, data_transfer_size: u32) -> Self {
        self.data_transfer_size = Some(data_transfer_size);
        self
    }

    /// Sets the bind address for server mode.
    pub fn with_bind_addr(mut self, bind_addr: IpAddr) -> Self {
        self.bind_addr = Some(bind_addr);
        self
    }

    /// Sets the idle deadline for datagram sessions.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// The effective total transfer size: the configured override, or the
    /// documented default for this transport/discipline pair.
    pub fn transfer_size(&self) -> u32 {
        self.data_transfer_size
            .unwrap_or_else(|| default_transfer_size(self.protocol, self.ack_protocol))
    }

    /// Checks that the configuration can drive a transfer that makes
    /// progress.
    pub fn validate(&self) -> Result<()> {
        if self.payload_size == 0 {
            return Err(Error::Config(
                "payload size must be at least 1".to_string(),
            ));
        }
        if self.payload_size > self.transfer_size() {
            return Err(Error::Config(format!(
                "payload size {} exceeds transfer size {}",
                self.payload_size,
                self.transfer_size()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.protocol, Protocol::Tcp);
        assert_eq!(config.ack_protocol, AckProtocol::Streaming);
        assert_eq!(config.payload_size, 512);
        assert_eq!(config.idle_timeout, DEFAULT_IDLE_TIMEOUT);
    }

    #[test]
    fn test_default_transfer_sizes() {
        assert_eq!(
            default_transfer_size(Protocol::Tcp, AckProtocol::Streaming),
            1_000_000
        );
        assert_eq!(
            default_transfer_size(Protocol::Tcp, AckProtocol::StopWait),
            10_000
        );
        assert_eq!(
            default_transfer_size(Protocol::Udp, AckProtocol::Streaming),
            10_000
        );
        assert_eq!(
            default_transfer_size(Protocol::Udp, AckProtocol::StopWait),
            10_000
        );
    }

    #[test]
    fn test_transfer_size_override() {
        let config = Config::client("127.0.0.1".to_string(), DEFAULT_PORT)
            .with_data_transfer_size(4096);
        assert_eq!(config.transfer_size(), 4096);

        let config = Config::client("127.0.0.1".to_string(), DEFAULT_PORT);
        assert_eq!(config.transfer_size(), 1_000_000);
    }

    #[test]
    fn test_validate_rejects_zero_payload() {
        let config =
            Config::client("127.0.0.1".to_string(), DEFAULT_PORT).with_payload_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_payload_over_transfer_size() {
        let config = Config::client("127.0.0.1".to_string(), DEFAULT_PORT)
            .with_payload_size(2048)
            .with_data_transfer_size(1024);
        assert!(config.validate().is_err());
    }
}
