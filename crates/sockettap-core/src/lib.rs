//! sockettap core - per-connection traffic tapping for a proxy's transport sockets
//!
//! This crate provides the pieces a transport socket needs to tap its traffic:
//!
//! - **Tap configuration**: shared, immutable settings plus a factory that
//!   decides per connection whether to tap it at all
//! - **Per-socket tapper**: the state machine fed by every read, write and close
//! - **Match/sink engine**: the contract deciding what gets emitted, with a
//!   predicate-tree default
//! - **Statistics** and **time sources** shared across connections

pub mod config;
pub mod events;
pub mod matcher;
pub mod sink;
pub mod stats;
pub mod tap_config;
pub mod tapper;
pub mod time;

// Re-export commonly used types
pub use events::{
    Body, CloseKind, ConnectionInfo, Direction, DirectionStats, StreamedSegment, TraceBuffer,
    TraceEvent, TraceRecord,
};
pub use matcher::{MatchConfig, MatchOutcome, MatchPredicate};
pub use sink::{Candidate, MatchSink, MatchingSink, MemorySink, SinkError, SinkResult, TraceSink};
pub use stats::{Counter, StatsStore, TransportTapStats};
pub use tap_config::{SharedTapConfig, SocketTapConfig, SubmissionMode};
pub use tapper::{PerSocketTapper, TapperState};
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource};
