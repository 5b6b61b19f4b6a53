//! Per-socket tapper
//!
//! One [`PerSocketTapper`] exists for every tapped connection. The transport
//! calls it on each read, write and close, always from the connection's own
//! execution context, so the tapper needs no synchronization of its own. The
//! only shared pieces it touches are the configuration (read-only), the time
//! source and the statistics counters (atomics).
//!
//! State machine:
//!
//! ```text
//! Active ──close_socket──► Closing ──(submission done)──► Finalized
//! ```
//!
//! Anything arriving after the first `close_socket` is ignored, so a transport
//! that reports close from several code paths can never cause a second
//! submission or a second counter increment.

use crate::events::{Body, CloseKind, ConnectionInfo, StreamedSegment, TraceBuffer, TraceEvent};
use crate::sink::{emit_contained, Candidate};
use crate::stats::TransportTapStats;
use crate::tap_config::{SharedTapConfig, SubmissionMode};
use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

/// Lifecycle state of a tapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapperState {
    Active,
    Closing,
    Finalized,
}

/// Streamed mode: events leave the tapper as soon as they are observed
#[derive(Debug, Default)]
struct StreamedTap {
    rx_bytes: u64,
    tx_bytes: u64,
    next_sequence: u64,
    close: Option<TraceEvent>,
}

/// Buffered mode: the trace is held until close, then moved to the sink
#[derive(Debug)]
struct BufferedTap {
    trace: Option<TraceBuffer>,
    closed_rx_bytes: u64,
    closed_tx_bytes: u64,
}

#[derive(Debug)]
enum TapMode {
    Streamed(StreamedTap),
    Buffered(BufferedTap),
}

/// Tap state of one connection
#[derive(Debug)]
pub struct PerSocketTapper {
    config: SharedTapConfig,
    stats: TransportTapStats,
    connection: ConnectionInfo,
    state: TapperState,
    mode: TapMode,
    last_timestamp: DateTime<Utc>,
}

impl PerSocketTapper {
    pub(crate) fn new(
        config: SharedTapConfig,
        stats: TransportTapStats,
        connection: ConnectionInfo,
    ) -> Self {
        let started_at = config.time_source().now();
        let mode = match config.mode() {
            SubmissionMode::Streamed => TapMode::Streamed(StreamedTap::default()),
            SubmissionMode::Buffered {
                max_rx_bytes,
                max_tx_bytes,
            } => TapMode::Buffered(BufferedTap {
                trace: Some(TraceBuffer::new(
                    connection.clone(),
                    started_at,
                    max_rx_bytes,
                    max_tx_bytes,
                )),
                closed_rx_bytes: 0,
                closed_tx_bytes: 0,
            }),
        };

        debug!(
            connection_id = connection.id,
            mode = if matches!(mode, TapMode::Streamed(_)) { "streamed" } else { "buffered" },
            "Tapping connection"
        );

        Self {
            config,
            stats,
            connection,
            state: TapperState::Active,
            mode,
            last_timestamp: started_at,
        }
    }

    /// Data was read from the transport.
    ///
    /// `data` may already hold bytes from earlier reads; the newly read bytes
    /// are its last `bytes_read` bytes.
    pub fn on_read(&mut self, data: &[u8], bytes_read: u32) {
        if self.state != TapperState::Active {
            trace!(connection_id = self.connection.id, "Ignoring read after close");
            return;
        }

        let payload = &data[data.len().saturating_sub(bytes_read as usize)..];
        let timestamp = self.stamp();

        match &mut self.mode {
            TapMode::Streamed(tap) => {
                tap.rx_bytes += u64::from(bytes_read);
                let event = TraceEvent::Read {
                    timestamp,
                    byte_count: bytes_read,
                    body: copy_body(self.connection.id, payload, bytes_read),
                };
                self.submit_streamed(event);
            }
            TapMode::Buffered(tap) => {
                if let Some(trace) = tap.trace.as_mut() {
                    trace.record_read(timestamp, payload, bytes_read);
                }
            }
        }
    }

    /// Data was written to the transport.
    ///
    /// `data` may not have been fully written; the written bytes are its first
    /// `bytes_written` bytes.
    pub fn on_write(&mut self, data: &[u8], bytes_written: u32, end_stream: bool) {
        if self.state != TapperState::Active {
            trace!(connection_id = self.connection.id, "Ignoring write after close");
            return;
        }

        let payload = &data[..data.len().min(bytes_written as usize)];
        let timestamp = self.stamp();

        match &mut self.mode {
            TapMode::Streamed(tap) => {
                tap.tx_bytes += u64::from(bytes_written);
                let event = TraceEvent::Write {
                    timestamp,
                    byte_count: bytes_written,
                    body: copy_body(self.connection.id, payload, bytes_written),
                    end_stream,
                };
                self.submit_streamed(event);
            }
            TapMode::Buffered(tap) => {
                if let Some(trace) = tap.trace.as_mut() {
                    trace.record_write(timestamp, payload, bytes_written, end_stream);
                }
            }
        }
    }

    /// The socket was closed. Only the first call has any effect.
    pub fn close_socket(&mut self, kind: CloseKind) {
        if self.state != TapperState::Active {
            trace!(connection_id = self.connection.id, "Ignoring repeated close");
            return;
        }
        self.state = TapperState::Closing;
        let timestamp = self.stamp();

        match &mut self.mode {
            TapMode::Streamed(tap) => {
                tap.close = Some(TraceEvent::Close { timestamp, kind });
            }
            TapMode::Buffered(tap) => {
                let Some(mut trace) = tap.trace.take() else {
                    self.state = TapperState::Finalized;
                    return;
                };
                trace.record_close(timestamp, kind);
                tap.closed_rx_bytes = trace.rx().observed_bytes;
                tap.closed_tx_bytes = trace.tx().observed_bytes;
                if emit_contained(self.config.engine(), Candidate::Trace(trace)) {
                    self.stats.buffered_submit.inc();
                    debug!(connection_id = self.connection.id, "Submitted buffered trace");
                }
            }
        }

        self.state = TapperState::Finalized;
        debug!(
            connection_id = self.connection.id,
            close = kind.as_str(),
            rx_bytes = self.rx_bytes(),
            tx_bytes = self.tx_bytes(),
            "Tap finalized"
        );
    }

    fn submit_streamed(&mut self, event: TraceEvent) {
        let TapMode::Streamed(tap) = &mut self.mode else {
            return;
        };

        let segment = StreamedSegment {
            connection: self.connection.clone(),
            sequence: tap.next_sequence,
            event,
            rx_total: tap.rx_bytes,
            tx_total: tap.tx_bytes,
        };
        tap.next_sequence += 1;

        if emit_contained(self.config.engine(), Candidate::Segment(segment)) {
            self.stats.streamed_submit.inc();
        }
    }

    /// Current time, clamped so stamps never go backwards within this trace
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = self.config.time_source().now();
        if now > self.last_timestamp {
            self.last_timestamp = now;
        }
        self.last_timestamp
    }

    pub fn state(&self) -> TapperState {
        self.state
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    /// Total bytes read so far, retained or not
    pub fn rx_bytes(&self) -> u64 {
        match &self.mode {
            TapMode::Streamed(tap) => tap.rx_bytes,
            TapMode::Buffered(tap) => tap
                .trace
                .as_ref()
                .map_or(tap.closed_rx_bytes, |t| t.rx().observed_bytes),
        }
    }

    /// Total bytes written so far, retained or not
    pub fn tx_bytes(&self) -> u64 {
        match &self.mode {
            TapMode::Streamed(tap) => tap.tx_bytes,
            TapMode::Buffered(tap) => tap
                .trace
                .as_ref()
                .map_or(tap.closed_tx_bytes, |t| t.tx().observed_bytes),
        }
    }

    /// The trace being buffered, until it is handed off at close
    pub fn buffered_trace(&self) -> Option<&TraceBuffer> {
        match &self.mode {
            TapMode::Buffered(tap) => tap.trace.as_ref(),
            TapMode::Streamed(_) => None,
        }
    }

    /// The locally recorded close event, in streamed mode
    pub fn streamed_close(&self) -> Option<&TraceEvent> {
        match &self.mode {
            TapMode::Streamed(tap) => tap.close.as_ref(),
            TapMode::Buffered(_) => None,
        }
    }
}

fn copy_body(connection_id: u64, payload: &[u8], byte_count: u32) -> Body {
    let mut data = Vec::new();
    if data.try_reserve_exact(payload.len()).is_err() {
        warn!(connection_id, bytes = payload.len(), "Tap payload allocation failed");
        return Body {
            data,
            truncated: true,
        };
    }
    data.extend_from_slice(payload);
    Body {
        truncated: data.len() < byte_count as usize,
        data,
    }
}
