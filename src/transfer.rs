use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;

use crate::measurements::TransferResult;
use crate::protocol::{AckProtocol, PreambleMessage, ACK_BYTE};
use crate::{Error, Result};

// Read/write failures inside the data phase are session-fatal, not
// connection-setup failures.
fn transfer_err(e: std::io::Error) -> Error {
    Error::Transfer(e.to_string())
}

/// Runs the sending side of the data phase over a byte stream.
///
/// Writes payload-sized messages until the cumulative byte count meets or
/// exceeds `data_transfer_size`; the final message may overshoot the target
/// by up to `payload_size - 1` bytes. Under [`AckProtocol::StopWait`] each
/// write blocks for a one-byte acknowledgment before the next, bounding
/// unacknowledged data to exactly one message.
///
/// # Errors
///
/// [`Error::AckMismatch`] if a stop-wait acknowledgment byte is wrong,
/// [`Error::Transfer`] on any read/write failure.
pub async fn send_over_stream<S>(
    stream: &mut S,
    preamble: &PreambleMessage,
) -> Result<TransferResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload = vec![0u8; preamble.payload_size as usize];
    let target = u64::from(preamble.data_transfer_size);
    let mut ack_buf = [0u8; 1];

    let mut bytes_sent = 0u64;
    let mut packets_sent = 0u64;
    let start = Instant::now();

    while bytes_sent < target {
        stream.write_all(&payload).await.map_err(transfer_err)?;
        bytes_sent += payload.len() as u64;
        packets_sent += 1;

        if preamble.ack_protocol == AckProtocol::StopWait {
            stream
                .read_exact(&mut ack_buf)
                .await
                .map_err(transfer_err)?;
            if ack_buf[0] != ACK_BYTE {
                return Err(Error::AckMismatch);
            }
        }
    }
    stream.flush().await.map_err(transfer_err)?;

    Ok(TransferResult::sender(
        packets_sent,
        bytes_sent,
        start.elapsed(),
    ))
}

/// Runs the receiving side of the data phase over a byte stream.
///
/// Reads until the cumulative byte count meets or exceeds
/// `data_transfer_size`; completion is detected purely by count, never by
/// transport EOF. A peer that closes the stream before the threshold is a
/// [`Error::Transfer`] failure. Under [`AckProtocol::StopWait`] one full
/// payload message is consumed per read and acknowledged before the next.
pub async fn receive_over_stream<S>(
    stream: &mut S,
    preamble: &PreambleMessage,
) -> Result<TransferResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; preamble.payload_size as usize];
    let target = u64::from(preamble.data_transfer_size);

    let mut bytes_received = 0u64;
    let mut packets_received = 0u64;
    let start = Instant::now();

    while bytes_received < target {
        match preamble.ack_protocol {
            AckProtocol::Streaming => {
                let n = stream.read(&mut buf).await.map_err(transfer_err)?;
                if n == 0 {
                    return Err(Error::Transfer(
                        "stream closed before transfer completed".to_string(),
                    ));
                }
                bytes_received += n as u64;
                packets_received += 1;
            }
            AckProtocol::StopWait => {
                stream.read_exact(&mut buf).await.map_err(transfer_err)?;
                bytes_received += buf.len() as u64;
                packets_received += 1;

                stream
                    .write_all(&[ACK_BYTE])
                    .await
                    .map_err(transfer_err)?;
                stream.flush().await.map_err(transfer_err)?;
            }
        }
    }

    Ok(TransferResult::receiver(
        packets_received,
        bytes_received,
        start.elapsed(),
    ))
}

/// Runs the sending side of the data phase over a connected datagram
/// socket.
///
/// Each payload is one datagram. Stop-wait blocks for a one-byte
/// acknowledgment datagram after every send; streaming sends back-to-back
/// with no flow control, so reordering or loss on the wire simply shows up
/// as under-counted bytes at the receiver.
pub async fn send_over_datagram(
    socket: &UdpSocket,
    preamble: &PreambleMessage,
) -> Result<TransferResult> {
    let payload = vec![0u8; preamble.payload_size as usize];
    let target = u64::from(preamble.data_transfer_size);
    let mut ack_buf = [0u8; 1];

    let mut bytes_sent = 0u64;
    let mut packets_sent = 0u64;
    let start = Instant::now();

    while bytes_sent < target {
        let n = socket.send(&payload).await.map_err(transfer_err)?;
        bytes_sent += n as u64;
        packets_sent += 1;

        if preamble.ack_protocol == AckProtocol::StopWait {
            let n = socket.recv(&mut ack_buf).await.map_err(transfer_err)?;
            if n != 1 || ack_buf[0] != ACK_BYTE {
                return Err(Error::AckMismatch);
            }
        }
    }

    Ok(TransferResult::sender(
        packets_sent,
        bytes_sent,
        start.elapsed(),
    ))
}

/// Receiving side of one datagram transfer, driven incrementally by the
/// server's socket loop.
///
/// Datagrams carry no session state, so a session is defined purely by the
/// peer address this record is keyed under: the loop only feeds it
/// datagrams from that address, which is what keeps concurrent probes on
/// the shared socket from cross-talking. Completion is either the byte
/// threshold or the idle deadline; an idle completion is soft and reports
/// whatever was accumulated.
#[derive(Debug)]
pub struct DatagramSession {
    peer: SocketAddr,
    preamble: PreambleMessage,
    bytes_received: u64,
    packets_received: u64,
    started: Option<Instant>,
    last_activity: Instant,
}

impl DatagramSession {
    pub fn new(peer: SocketAddr, preamble: PreambleMessage) -> Self {
        Self {
            peer,
            preamble,
            bytes_received: 0,
            packets_received: 0,
            started: None,
            last_activity: Instant::now(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn preamble(&self) -> &PreambleMessage {
        &self.preamble
    }

    /// Whether every payload datagram gets an immediate acknowledgment.
    pub fn wants_ack(&self) -> bool {
        self.preamble.ack_protocol == AckProtocol::StopWait
    }

    /// Records one payload datagram from the session peer. Returns `true`
    /// once the byte threshold is reached.
    pub fn record(&mut self, len: usize) -> bool {
        let now = Instant::now();
        if self.started.is_none() {
            self.started = Some(now);
        }
        self.last_activity = now;
        self.bytes_received += len as u64;
        self.packets_received += 1;
        self.is_complete()
    }

    /// Whether the cumulative byte count has met the threshold.
    pub fn is_complete(&self) -> bool {
        self.bytes_received >= u64::from(self.preamble.data_transfer_size)
    }

    /// Whether the session has been quiet for at least `timeout`.
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() >= timeout
    }

    /// Consumes the session and produces its result record. The duration
    /// spans first payload datagram to last; the idle tail is excluded.
    pub fn finish(self) -> TransferResult {
        let duration = match self.started {
            Some(started) => self.last_activity.duration_since(started),
            None => Duration::ZERO,
        };
        TransferResult::receiver(self.packets_received, self.bytes_received, duration)
    }
}
