use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Final accounting for one transfer.
///
/// Produced exactly once when the data loop terminates, by volume threshold
/// or by idle timeout, and never mutated afterward. Byte counts cover
/// payload only; the preamble and acknowledgment bytes are excluded.
/// `duration` spans the data phase only, excluding the handshake.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use streamprobe::TransferResult;
///
/// let result = TransferResult::sender(1954, 1_000_448, Duration::from_millis(120));
/// assert!(result.bits_per_second() > 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Discrete writes performed during the data phase
    pub packets_sent: u64,

    /// Discrete reads performed during the data phase
    pub packets_received: u64,

    /// Payload bytes written
    pub bytes_sent: u64,

    /// Payload bytes read
    pub bytes_received: u64,

    /// Elapsed wall-clock time of the data phase
    pub duration: Duration,
}

impl TransferResult {
    /// Builds the result record for the sending side of a transfer.
    pub fn sender(packets_sent: u64, bytes_sent: u64, duration: Duration) -> Self {
        Self {
            packets_sent,
            packets_received: 0,
            bytes_sent,
            bytes_received: 0,
            duration,
        }
    }

    /// Builds the result record for the receiving side of a transfer.
    pub fn receiver(packets_received: u64, bytes_received: u64, duration: Duration) -> Self {
        Self {
            packets_sent: 0,
            packets_received,
            bytes_sent: 0,
            bytes_received,
            duration,
        }
    }

    /// Elapsed data-phase time in nanoseconds.
    pub fn duration_nanos(&self) -> i64 {
        self.duration.as_nanos() as i64
    }

    /// Average payload throughput over the data phase.
    pub fn bits_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            ((self.bytes_sent + self.bytes_received) as f64 * 8.0) / secs
        } else {
            0.0
        }
    }
}

/// Aggregate totals across every transfer a server has completed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Measurements {
    /// Transfers completed, including soft idle-timeout completions
    pub sessions: u64,
    pub total_packets_sent: u64,
    pub total_packets_received: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
}

impl Measurements {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Thread-safe collector for aggregate measurements.
///
/// Cloned into each session task; all clones feed the same totals.
#[derive(Debug, Clone, Default)]
pub struct MeasurementsCollector {
    inner: Arc<Mutex<Measurements>>,
}

impl MeasurementsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Measurements::new())),
        }
    }

    /// Folds one completed transfer into the totals.
    pub fn record_session(&self, result: &TransferResult) {
        let mut m = self.inner.lock();
        m.sessions += 1;
        m.total_packets_sent += result.packets_sent;
        m.total_packets_received += result.packets_received;
        m.total_bytes_sent += result.bytes_sent;
        m.total_bytes_received += result.bytes_received;
    }

    /// Snapshot of the current totals.
    pub fn get(&self) -> Measurements {
        self.inner.lock().clone()
    }
}
