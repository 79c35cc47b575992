use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default port that streamprobe communicates on, for both transports.
pub const DEFAULT_PORT: u16 = 5991;

/// Reserved acknowledgment byte (ASCII ACK).
///
/// Sent as a single unframed byte: by the server after a preamble is
/// accepted, and per message by the receiver in stop-and-wait transfers.
pub const ACK_BYTE: u8 = 6;

/// Sentinel terminator byte marking the end of a serialized preamble
/// (ASCII EOT).
///
/// The JSON encoding of [`PreambleMessage`] can never contain this value
/// unescaped, which is what makes scanning for it safe.
pub const PREAMBLE_TERMINATOR: u8 = 4;

/// Upper bound on the encoded preamble, terminator included.
///
/// Servers read at most this many bytes while looking for the terminator;
/// datagram servers attempt preamble decode over at most this prefix of an
/// inbound datagram.
pub const PREAMBLE_MAX_LEN: usize = 128;

/// Acknowledgment discipline used during the data phase.
///
/// # Examples
///
/// ```
/// use streamprobe::AckProtocol;
///
/// let ack = AckProtocol::Streaming;
/// assert_ne!(ack, AckProtocol::StopWait);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckProtocol {
    /// No acknowledgment between messages.
    Streaming,
    /// Wait for a one-byte acknowledgment before sending the next message.
    StopWait,
}

impl std::fmt::Display for AckProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AckProtocol::Streaming => write!(f, "streaming"),
            AckProtocol::StopWait => write!(f, "stop-wait"),
        }
    }
}

/// Negotiation message exchanged once before any payload data.
///
/// The client declares the acknowledgment discipline and the transfer size
/// parameters; the server accepts by replying with [`ACK_BYTE`]. Immutable
/// after creation.
///
/// # Examples
///
/// ```
/// use streamprobe::{AckProtocol, PreambleMessage};
///
/// let preamble = PreambleMessage::new(AckProtocol::Streaming, 1_000_000, 512);
/// assert!(preamble.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreambleMessage {
    /// Acknowledgment discipline for the data phase.
    pub ack_protocol: AckProtocol,

    /// Total payload bytes the sender intends to transmit. The data loop
    /// exits as soon as the cumulative count meets or exceeds this, so the
    /// final message may overshoot by up to `payload_size - 1` bytes.
    pub data_transfer_size: u32,

    /// Size in bytes of each individual message.
    pub payload_size: u32,
}

impl PreambleMessage {
    pub fn new(ack_protocol: AckProtocol, data_transfer_size: u32, payload_size: u32) -> Self {
        Self {
            ack_protocol,
            data_transfer_size,
            payload_size,
        }
    }

    /// Checks the field invariant: `1 <= payload_size <= data_transfer_size`.
    pub fn validate(&self) -> Result<()> {
        if self.payload_size == 0 {
            return Err(Error::MalformedPreamble(
                "payload size must be at least 1".to_string(),
            ));
        }
        if self.payload_size > self.data_transfer_size {
            return Err(Error::MalformedPreamble(format!(
                "payload size {} exceeds transfer size {}",
                self.payload_size, self.data_transfer_size
            )));
        }
        Ok(())
    }
}

/// Serializes a preamble to its wire form: a JSON object followed by the
/// single sentinel terminator byte.
///
/// # Errors
///
/// Returns an error if JSON serialization fails or if the serialized form
/// would contain the terminator byte unescaped.
///
/// # Examples
///
/// ```
/// use streamprobe::protocol::{encode_preamble, PREAMBLE_TERMINATOR};
/// use streamprobe::{AckProtocol, PreambleMessage};
///
/// let preamble = PreambleMessage::new(AckProtocol::StopWait, 10_000, 1024);
/// let bytes = encode_preamble(&preamble).unwrap();
/// assert_eq!(*bytes.last().unwrap(), PREAMBLE_TERMINATOR);
/// ```
pub fn encode_preamble(msg: &PreambleMessage) -> Result<Vec<u8>> {
    let mut encoded = serde_json::to_vec(msg)?;
    if encoded.contains(&PREAMBLE_TERMINATOR) {
        return Err(Error::MalformedPreamble(
            "encoding emitted the terminator byte".to_string(),
        ));
    }
    encoded.push(PREAMBLE_TERMINATOR);
    Ok(encoded)
}

/// Deserializes a preamble from a byte buffer.
///
/// Scans for the first terminator byte, decodes everything before it, and
/// validates the field invariant.
///
/// # Errors
///
/// Returns [`Error::MalformedPreamble`] if no terminator is found within
/// the buffer, if JSON decoding fails, or if the decoded fields violate the
/// invariant.
///
/// # Examples
///
/// ```
/// use streamprobe::protocol::{decode_preamble, encode_preamble};
/// use streamprobe::{AckProtocol, PreambleMessage};
///
/// let preamble = PreambleMessage::new(AckProtocol::Streaming, 1_000_000, 512);
/// let bytes = encode_preamble(&preamble).unwrap();
/// assert_eq!(decode_preamble(&bytes).unwrap(), preamble);
/// ```
pub fn decode_preamble(buf: &[u8]) -> Result<PreambleMessage> {
    let end = buf
        .iter()
        .position(|&b| b == PREAMBLE_TERMINATOR)
        .ok_or_else(|| Error::MalformedPreamble("terminator not found".to_string()))?;

    let msg: PreambleMessage = serde_json::from_slice(&buf[..end])
        .map_err(|e| Error::MalformedPreamble(e.to_string()))?;
    msg.validate()?;
    Ok(msg)
}
