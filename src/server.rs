use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, error, info};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Protocol};
use crate::measurements::{Measurements, MeasurementsCollector, TransferResult};
use crate::protocol::{
    decode_preamble, PreambleMessage, ACK_BYTE, PREAMBLE_MAX_LEN, PREAMBLE_TERMINATOR,
};
use crate::transfer::{self, DatagramSession};
use crate::{Error, Result};

/// Throughput probe server.
///
/// Listens on one transport and runs each incoming transfer as receiver.
/// The stream listener loops accepting indefinitely, one task per
/// connection; the datagram listener is a single task per socket with
/// sessions keyed by peer address. Session failures are logged and never
/// stop the listener. Completed transfers feed an aggregate measurements
/// collector.
///
/// # Examples
///
/// ```no_run
/// use streamprobe::{Config, Server};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Server::new(Config::server(5991));
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: Config,
    measurements: MeasurementsCollector,
    shutdown: CancellationToken,
}

impl Server {
    /// Creates a new server with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            measurements: MeasurementsCollector::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the listener loop when cancelled.
    ///
    /// Cancellation interrupts the accept/receive loops only; a stream
    /// session already running in its own task finishes on its own.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Snapshot of the aggregate totals across completed sessions.
    pub fn get_measurements(&self) -> Measurements {
        self.measurements.get()
    }

    /// Binds and serves until the shutdown token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound. Errors after binding
    /// are scoped to the offending session or datagram and logged.
    pub async fn run(&self) -> Result<()> {
        let bind_addr = format!(
            "{}:{}",
            self.config
                .bind_addr
                .map(|a| a.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            self.config.port
        );

        match self.config.protocol {
            Protocol::Tcp => self.run_tcp(&bind_addr).await,
            Protocol::Udp => self.run_udp(&bind_addr).await,
        }
    }

    async fn run_tcp(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        info!("TCP server listening on {}", bind_addr);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("TCP server on {} shutting down", bind_addr);
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("new connection from {}", addr);
                        let measurements = self.measurements.clone();

                        tokio::spawn(async move {
                            match handle_stream_session(stream).await {
                                Ok(result) => {
                                    log_session(addr, &result);
                                    measurements.record_session(&result);
                                }
                                Err(e) => error!("session {} failed: {}", addr, e),
                            }
                        });
                    }
                    Err(e) => {
                        error!("error accepting connection: {}", e);
                    }
                }
            }
        }
    }

    async fn run_udp(&self, bind_addr: &str) -> Result<()> {
        let socket = UdpSocket::bind(bind_addr).await?;
        info!("UDP server listening on {}", bind_addr);

        let idle_timeout = self.config.idle_timeout;
        let mut sessions: HashMap<SocketAddr, DatagramSession> = HashMap::new();
        // Data datagrams can be as large as the transport allows; preamble
        // decode only ever looks at the first PREAMBLE_MAX_LEN bytes.
        let mut buf = vec![0u8; 65_536];

        loop {
            // The receive deadline is armed only while sessions are active;
            // an idle server blocks indefinitely.
            let deadline_armed = !sessions.is_empty();

            let received = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    for (_, session) in sessions.drain() {
                        self.complete_session(session);
                    }
                    info!("UDP server on {} shutting down", bind_addr);
                    return Ok(());
                }
                received = recv_next(&socket, &mut buf, deadline_armed, idle_timeout) => received,
            };

            match received {
                Some(Ok((len, addr))) => {
                    self.handle_datagram(&socket, &mut sessions, &buf[..len], addr)
                        .await;
                }
                Some(Err(e)) => {
                    error!("error receiving datagram: {}", e);
                }
                // Deadline fired with nothing received; fall through to the
                // idle sweep.
                None => {}
            }

            // Sweep on every iteration so a quiet session completes on time
            // even while other peers keep the socket busy.
            let idle: Vec<SocketAddr> = sessions
                .iter()
                .filter(|(_, s)| s.is_idle(idle_timeout))
                .map(|(addr, _)| *addr)
                .collect();
            for addr in idle {
                if let Some(session) = sessions.remove(&addr) {
                    debug!("session {} idle, completing with partial counts", addr);
                    self.complete_session(session);
                }
            }
        }
    }

    async fn handle_datagram(
        &self,
        socket: &UdpSocket,
        sessions: &mut HashMap<SocketAddr, DatagramSession>,
        datagram: &[u8],
        addr: SocketAddr,
    ) {
        if let Some(session) = sessions.get_mut(&addr) {
            let complete = session.record(datagram.len());
            let wants_ack = session.wants_ack();

            if wants_ack {
                if let Err(e) = socket.send_to(&[ACK_BYTE], addr).await {
                    error!("error acknowledging datagram from {}: {}", addr, e);
                }
            }
            if complete {
                if let Some(session) = sessions.remove(&addr) {
                    self.complete_session(session);
                }
            }
            return;
        }

        // Unknown peer: either a new probe's preamble, or cross-talk to
        // discard without counting.
        match decode_preamble(&datagram[..datagram.len().min(PREAMBLE_MAX_LEN)]) {
            Ok(preamble) => {
                info!(
                    "new datagram session from {}: {} transfer of {} bytes",
                    addr, preamble.ack_protocol, preamble.data_transfer_size
                );
                if let Err(e) = socket.send_to(&[ACK_BYTE], addr).await {
                    error!("error acknowledging preamble from {}: {}", addr, e);
                    return;
                }
                sessions.insert(addr, DatagramSession::new(addr, preamble));
            }
            Err(e) => {
                debug!("discarding datagram from {}: {}", addr, e);
            }
        }
    }

    fn complete_session(&self, session: DatagramSession) {
        let peer = session.peer();
        let result = session.finish();
        log_session(peer, &result);
        self.measurements.record_session(&result);
    }
}

async fn handle_stream_session(stream: TcpStream) -> Result<TransferResult> {
    let mut stream = BufReader::new(stream);

    let preamble = read_stream_preamble(&mut stream).await?;
    debug!("negotiated preamble: {:?}", preamble);

    stream.write_all(&[ACK_BYTE]).await?;
    stream.flush().await?;

    // Stream closes when dropped, on completion and on error alike.
    transfer::receive_over_stream(&mut stream, &preamble).await
}

/// Consumes bytes from the stream until the sentinel terminator, then
/// decodes the preamble. The scan is capped so a peer that never sends the
/// terminator cannot grow the buffer without bound.
async fn read_stream_preamble<S>(stream: &mut S) -> Result<PreambleMessage>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(PREAMBLE_MAX_LEN);
    loop {
        let byte = stream.read_u8().await?;
        buf.push(byte);
        if byte == PREAMBLE_TERMINATOR {
            return decode_preamble(&buf);
        }
        if buf.len() >= PREAMBLE_MAX_LEN {
            return Err(Error::MalformedPreamble(format!(
                "terminator not found within {} bytes",
                PREAMBLE_MAX_LEN
            )));
        }
    }
}

async fn recv_next(
    socket: &UdpSocket,
    buf: &mut [u8],
    deadline_armed: bool,
    idle_timeout: Duration,
) -> Option<std::io::Result<(usize, SocketAddr)>> {
    if deadline_armed {
        match time::timeout(idle_timeout, socket.recv_from(buf)).await {
            Ok(result) => Some(result),
            Err(_) => None,
        }
    } else {
        Some(socket.recv_from(buf).await)
    }
}

fn log_session(peer: SocketAddr, result: &TransferResult) {
    info!(
        "session {} complete: {} bytes in {} packets, {:?} ({:.2} Mbit/s)",
        peer,
        result.bytes_received,
        result.packets_received,
        result.duration,
        result.bits_per_second() / 1_000_000.0
    );
}
