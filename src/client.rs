use log::{debug, info};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use crate::config::{Config, Protocol};
use crate::measurements::TransferResult;
use crate::protocol::{encode_preamble, PreambleMessage, ACK_BYTE};
use crate::transfer;
use crate::{Error, Result};

/// Throughput probe client.
///
/// Drives one transfer: connect, send the preamble, await the
/// acknowledgment, then run the data phase as sender and report the
/// result. The client is sequential; connect, handshake, and transfer
/// never overlap.
///
/// # Examples
///
/// ```no_run
/// use streamprobe::{Client, Config};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("192.168.1.100".to_string(), 5991);
/// let mut client = Client::new(config)?;
///
/// client.connect().await?;
/// let result = client.start().await?;
/// println!("{} bytes in {:?}", result.bytes_sent, result.duration);
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Config,
    conn: Option<Connection>,
}

enum Connection {
    Stream(TcpStream),
    Datagram(UdpSocket),
}

impl Client {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration cannot drive a
    /// transfer that makes progress.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, conn: None })
    }

    /// Connects to the configured server.
    ///
    /// For the stream transport this dials a TCP connection; failure is
    /// [`Error::Connection`], fatal to this invocation and not retried.
    /// For the datagram transport there is no handshake at the transport
    /// level - the socket is bound to an ephemeral port and paired with the
    /// server address.
    pub async fn connect(&mut self) -> Result<()> {
        let server_addr = self
            .config
            .server_addr
            .as_ref()
            .ok_or_else(|| Error::Config("server address not set".to_string()))?;
        let full_addr = format!("{}:{}", server_addr, self.config.port);

        let conn = match self.config.protocol {
            Protocol::Tcp => {
                let stream = TcpStream::connect(&full_addr).await.map_err(|e| {
                    Error::Connection(format!("cannot reach {}: {}", full_addr, e))
                })?;
                Connection::Stream(stream)
            }
            Protocol::Udp => {
                let socket = UdpSocket::bind("0.0.0.0:0").await?;
                socket.connect(&full_addr).await.map_err(|e| {
                    Error::Connection(format!("cannot reach {}: {}", full_addr, e))
                })?;
                Connection::Datagram(socket)
            }
        };

        info!("connected to {}", full_addr);
        self.conn = Some(conn);
        Ok(())
    }

    /// Runs one transfer: preamble, acknowledgment, data phase.
    ///
    /// Consumes the connection; the socket is closed when the transfer
    /// concludes or fails. Call [`Client::connect`] again to run another
    /// transfer.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] if called before a successful connect,
    /// [`Error::PreambleRejected`] if the server's acknowledgment byte is
    /// missing or wrong, and the data-phase errors of the transfer engine.
    pub async fn start(&mut self) -> Result<TransferResult> {
        let conn = self.conn.take().ok_or(Error::NotConnected)?;

        let preamble = PreambleMessage::new(
            self.config.ack_protocol,
            self.config.transfer_size(),
            self.config.payload_size,
        );
        let encoded = encode_preamble(&preamble)?;

        debug!(
            "starting {} transfer: {} bytes in {}-byte messages",
            preamble.ack_protocol, preamble.data_transfer_size, preamble.payload_size
        );

        match conn {
            Connection::Stream(mut stream) => {
                stream.write_all(&encoded).await?;
                stream.flush().await?;

                let mut ack = [0u8; 1];
                stream.read_exact(&mut ack).await?;
                if ack[0] != ACK_BYTE {
                    return Err(Error::PreambleRejected);
                }
                debug!("server acknowledged preamble");

                transfer::send_over_stream(&mut stream, &preamble).await
            }
            Connection::Datagram(socket) => {
                socket.send(&encoded).await?;

                let mut ack = [0u8; 1];
                let n = socket.recv(&mut ack).await?;
                if n != 1 || ack[0] != ACK_BYTE {
                    return Err(Error::PreambleRejected);
                }
                debug!("server acknowledged preamble");

                transfer::send_over_datagram(&socket, &preamble).await
            }
        }
    }

    /// Convenience wrapper: connect, then start.
    pub async fn run(&mut self) -> Result<TransferResult> {
        self.connect().await?;
        self.start().await
    }
}
