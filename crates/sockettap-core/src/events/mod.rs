//! Trace event types
//!
//! Everything a tapped connection produces is expressed with the types in this
//! module: the connection view handed to the factory, the individual socket
//! events, the per-connection trace buffer and the records handed to sinks.

pub mod connection;
pub mod trace;

pub use connection::ConnectionInfo;
pub use trace::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a socket was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseKind {
    /// Closed by this side of the proxy
    LocalClose,
    /// Closed by the peer
    RemoteClose,
    /// Closed because of a transport error
    Error,
}

impl CloseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseKind::LocalClose => "local_close",
            CloseKind::RemoteClose => "remote_close",
            CloseKind::Error => "error",
        }
    }
}

/// Traffic direction relative to the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Bytes read from the transport
    Rx,
    /// Bytes written to the transport
    Tx,
}

/// Payload bytes captured for a single read or write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    /// Retained bytes (may be shorter than the byte count of the event)
    pub data: Vec<u8>,

    /// Whether some of the event's bytes were not retained
    pub truncated: bool,
}

impl Body {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            truncated: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A single observed socket event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Read {
        timestamp: DateTime<Utc>,
        byte_count: u32,
        body: Body,
    },
    Write {
        timestamp: DateTime<Utc>,
        byte_count: u32,
        body: Body,
        end_stream: bool,
    },
    Close {
        timestamp: DateTime<Utc>,
        kind: CloseKind,
    },
}

impl TraceEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TraceEvent::Read { timestamp, .. }
            | TraceEvent::Write { timestamp, .. }
            | TraceEvent::Close { timestamp, .. } => *timestamp,
        }
    }

    /// Bytes observed by this event (zero for close)
    pub fn byte_count(&self) -> u32 {
        match self {
            TraceEvent::Read { byte_count, .. } | TraceEvent::Write { byte_count, .. } => {
                *byte_count
            }
            TraceEvent::Close { .. } => 0,
        }
    }

    pub fn body(&self) -> Option<&Body> {
        match self {
            TraceEvent::Read { body, .. } | TraceEvent::Write { body, .. } => Some(body),
            TraceEvent::Close { .. } => None,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            TraceEvent::Read { .. } => Some(Direction::Rx),
            TraceEvent::Write { .. } => Some(Direction::Tx),
            TraceEvent::Close { .. } => None,
        }
    }

    pub fn is_close(&self) -> bool {
        matches!(self, TraceEvent::Close { .. })
    }
}
