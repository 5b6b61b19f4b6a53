//! Trace buffers and submission records

use super::{Body, CloseKind, ConnectionInfo, Direction, TraceEvent};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Per-direction accounting of a buffered trace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionStats {
    /// Every byte reported by the transport, retained or not
    pub observed_bytes: u64,

    /// Payload bytes kept in the trace
    pub retained_bytes: u64,

    /// Set once payload bytes had to be dropped
    pub truncated: bool,
}

/// Buffered trace of one connection
///
/// Events are kept in observation order. Payload retention is capped per
/// direction; bytes past the cap are counted in [`DirectionStats`] but their
/// contents are dropped. Once a direction is truncated, later reads or writes
/// in that direction are folded into its last event instead of adding new
/// ones, and empty reads are not recorded, so the event list is bounded by
/// the configured limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceBuffer {
    connection: ConnectionInfo,
    started_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    events: Vec<TraceEvent>,
    last_rx: Option<usize>,
    last_tx: Option<usize>,
    rx: DirectionStats,
    tx: DirectionStats,
    max_rx_bytes: u64,
    max_tx_bytes: u64,
}

impl TraceBuffer {
    pub fn new(
        connection: ConnectionInfo,
        started_at: DateTime<Utc>,
        max_rx_bytes: u64,
        max_tx_bytes: u64,
    ) -> Self {
        Self {
            connection,
            started_at,
            closed_at: None,
            events: Vec::new(),
            last_rx: None,
            last_tx: None,
            rx: DirectionStats::default(),
            tx: DirectionStats::default(),
            max_rx_bytes,
            max_tx_bytes,
        }
    }

    /// Record a read. `payload` holds exactly the newly read bytes.
    pub fn record_read(&mut self, timestamp: DateTime<Utc>, payload: &[u8], byte_count: u32) {
        if byte_count == 0 || self.fold_overflow(Direction::Rx, byte_count, false) {
            return;
        }
        let body = self.retain(Direction::Rx, payload, byte_count);
        self.last_rx = Some(self.events.len());
        self.events.push(TraceEvent::Read {
            timestamp,
            byte_count,
            body,
        });
    }

    /// Record a write. `payload` holds exactly the written bytes.
    pub fn record_write(
        &mut self,
        timestamp: DateTime<Utc>,
        payload: &[u8],
        byte_count: u32,
        end_stream: bool,
    ) {
        if self.fold_overflow(Direction::Tx, byte_count, end_stream) {
            return;
        }
        let body = self.retain(Direction::Tx, payload, byte_count);
        self.last_tx = Some(self.events.len());
        self.events.push(TraceEvent::Write {
            timestamp,
            byte_count,
            body,
            end_stream,
        });
    }

    /// Append the close event. Only the first call has any effect.
    pub fn record_close(&mut self, timestamp: DateTime<Utc>, kind: CloseKind) {
        if self.closed_at.is_some() {
            return;
        }
        self.closed_at = Some(timestamp);
        self.events.push(TraceEvent::Close { timestamp, kind });
    }

    /// Count bytes of an already truncated direction against its last event.
    /// Returns `false` when the direction still records events of its own.
    fn fold_overflow(&mut self, direction: Direction, byte_count: u32, end_stream: bool) -> bool {
        let (stats, last) = match direction {
            Direction::Rx => (&mut self.rx, self.last_rx),
            Direction::Tx => (&mut self.tx, self.last_tx),
        };
        if !stats.truncated {
            return false;
        }
        let Some(event) = last.and_then(|i| self.events.get_mut(i)) else {
            return false;
        };

        stats.observed_bytes += u64::from(byte_count);
        match event {
            TraceEvent::Read {
                byte_count: total, ..
            } => *total = total.saturating_add(byte_count),
            TraceEvent::Write {
                byte_count: total,
                end_stream: ended,
                ..
            } => {
                *total = total.saturating_add(byte_count);
                *ended |= end_stream;
            }
            TraceEvent::Close { .. } => {}
        }
        true
    }

    fn retain(&mut self, direction: Direction, payload: &[u8], byte_count: u32) -> Body {
        let (stats, limit) = match direction {
            Direction::Rx => (&mut self.rx, self.max_rx_bytes),
            Direction::Tx => (&mut self.tx, self.max_tx_bytes),
        };

        stats.observed_bytes += u64::from(byte_count);

        let available = payload.len().min(byte_count as usize);
        let remaining = limit.saturating_sub(stats.retained_bytes);
        let mut keep = available.min(usize::try_from(remaining).unwrap_or(usize::MAX));

        let mut data = Vec::new();
        if keep > 0 && data.try_reserve_exact(keep).is_err() {
            warn!(
                trace_id = self.connection.id,
                bytes = keep,
                "trace buffer allocation failed, dropping payload"
            );
            keep = 0;
        }
        data.extend_from_slice(&payload[..keep]);

        stats.retained_bytes += keep as u64;
        let truncated = keep < byte_count as usize;
        if truncated {
            stats.truncated = true;
        }

        Body { data, truncated }
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    pub fn trace_id(&self) -> u64 {
        self.connection.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn rx(&self) -> DirectionStats {
        self.rx
    }

    pub fn tx(&self) -> DirectionStats {
        self.tx
    }

    pub fn total_bytes(&self) -> u64 {
        self.rx.observed_bytes + self.tx.observed_bytes
    }

    /// Concatenated retained payload of one direction
    pub fn payload(&self, direction: Direction) -> Vec<u8> {
        self.events
            .iter()
            .filter(|e| e.direction() == Some(direction))
            .filter_map(|e| e.body())
            .flat_map(|b| b.data.iter().copied())
            .collect()
    }
}

/// One event emitted on its own in streamed mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedSegment {
    /// Connection the event belongs to
    pub connection: ConnectionInfo,

    /// Position of the event within the connection (starting at 0)
    pub sequence: u64,

    /// The event itself
    pub event: TraceEvent,

    /// Bytes read so far, including this event
    pub rx_total: u64,

    /// Bytes written so far, including this event
    pub tx_total: u64,
}

impl StreamedSegment {
    pub fn trace_id(&self) -> u64 {
        self.connection.id
    }
}

/// What a tapper hands to a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRecord {
    /// A single streamed event
    Streamed(StreamedSegment),
    /// A complete connection trace, emitted at close
    Buffered(TraceBuffer),
}

impl TraceRecord {
    pub fn trace_id(&self) -> u64 {
        match self {
            TraceRecord::Streamed(s) => s.trace_id(),
            TraceRecord::Buffered(b) => b.trace_id(),
        }
    }

    pub fn connection(&self) -> &ConnectionInfo {
        match self {
            TraceRecord::Streamed(s) => &s.connection,
            TraceRecord::Buffered(b) => b.connection(),
        }
    }

    pub fn is_streamed(&self) -> bool {
        matches!(self, TraceRecord::Streamed(_))
    }
}
