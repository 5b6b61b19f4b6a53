//! Sink and match-engine contracts
//!
//! A tapper never looks inside predicates or sinks. It hands a [`Candidate`]
//! to a [`MatchSink`] and only reacts to the returned boolean: `true` means
//! the candidate matched and the sink accepted it.
//!
//! Sinks must not block the caller. Implementations either finish the work
//! inline without waiting (in-memory) or queue it for a background writer.

use crate::events::{ConnectionInfo, StreamedSegment, TraceBuffer, TraceRecord};
use crate::matcher::{MatchContext, MatchOutcome, MatchPredicate};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Sink error type
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink queue full ({capacity} records pending)")]
    QueueFull { capacity: usize },

    #[error("Sink closed")]
    Closed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Sink operation failed: {0}")]
    OperationFailed(String),
}

pub type SinkResult<T> = Result<T, SinkError>;

/// Destination for accepted trace records
pub trait TraceSink: Send + Sync {
    /// Sink name, used in diagnostics
    fn name(&self) -> &str;

    /// Take ownership of a record. Must return without blocking.
    fn submit(&self, record: TraceRecord) -> SinkResult<()>;
}

/// What a tapper asks the engine to evaluate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// One streamed event
    Segment(StreamedSegment),
    /// A finalized buffered trace
    Trace(TraceBuffer),
}

impl Candidate {
    pub fn trace_id(&self) -> u64 {
        match self {
            Candidate::Segment(s) => s.trace_id(),
            Candidate::Trace(t) => t.trace_id(),
        }
    }

    pub fn context(&self) -> MatchContext<'_> {
        match self {
            Candidate::Segment(s) => MatchContext::for_segment(s),
            Candidate::Trace(t) => MatchContext::for_trace(t),
        }
    }

    pub fn into_record(self) -> TraceRecord {
        match self {
            Candidate::Segment(s) => TraceRecord::Streamed(s),
            Candidate::Trace(t) => TraceRecord::Buffered(t),
        }
    }
}

/// Match-and-emit engine consumed by tappers
pub trait MatchSink: Send + Sync {
    /// Connection-time verdict. `NotMatched` means the connection is never tapped.
    fn on_connection(&self, connection: &ConnectionInfo) -> MatchOutcome {
        let _ = connection;
        MatchOutcome::Undecided
    }

    /// Evaluate the candidate and emit it on a match.
    ///
    /// Returns `true` only when the candidate matched and was accepted.
    fn evaluate_and_maybe_emit(&self, candidate: Candidate) -> bool;
}

/// Default engine: a compiled predicate in front of a sink
pub struct MatchingSink {
    predicate: MatchPredicate,
    sink: Arc<dyn TraceSink>,
}

impl MatchingSink {
    pub fn new(predicate: MatchPredicate, sink: Arc<dyn TraceSink>) -> Self {
        Self { predicate, sink }
    }
}

impl std::fmt::Debug for MatchingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingSink")
            .field("predicate", &self.predicate)
            .field("sink", &self.sink.name())
            .finish()
    }
}

impl MatchSink for MatchingSink {
    fn on_connection(&self, connection: &ConnectionInfo) -> MatchOutcome {
        self.predicate.on_connection(connection)
    }

    fn evaluate_and_maybe_emit(&self, candidate: Candidate) -> bool {
        if !self.predicate.matches(&candidate.context()) {
            return false;
        }

        let trace_id = candidate.trace_id();
        match self.sink.submit(candidate.into_record()) {
            Ok(()) => true,
            Err(e) => {
                warn!(trace_id, sink = self.sink.name(), error = %e, "Dropping tap trace");
                false
            }
        }
    }
}

/// Run the engine, turning a panic inside it into "not emitted"
pub(crate) fn emit_contained(engine: &dyn MatchSink, candidate: Candidate) -> bool {
    let trace_id = candidate.trace_id();
    match panic::catch_unwind(AssertUnwindSafe(|| engine.evaluate_and_maybe_emit(candidate))) {
        Ok(emitted) => emitted,
        Err(_) => {
            warn!(trace_id, "Tap engine panicked, submission skipped");
            false
        }
    }
}

/// Sink keeping every record in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: parking_lot::Mutex<Vec<TraceRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Remove and return everything collected so far
    pub fn drain(&self) -> Vec<TraceRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl TraceSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn submit(&self, record: TraceRecord) -> SinkResult<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Body, TraceEvent};
    use chrono::Utc;

    struct FailingSink;

    impl TraceSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn submit(&self, _record: TraceRecord) -> SinkResult<()> {
            Err(SinkError::Closed)
        }
    }

    struct PanickingEngine;

    impl MatchSink for PanickingEngine {
        fn evaluate_and_maybe_emit(&self, _candidate: Candidate) -> bool {
            panic!("engine bug");
        }
    }

    fn segment(bytes: u32) -> Candidate {
        Candidate::Segment(StreamedSegment {
            connection: ConnectionInfo::new(3),
            sequence: 0,
            event: TraceEvent::Read {
                timestamp: Utc::now(),
                byte_count: bytes,
                body: Body::new(vec![0; bytes as usize]),
            },
            rx_total: u64::from(bytes),
            tx_total: 0,
        })
    }

    #[test]
    fn test_match_emits_to_sink() {
        let sink = Arc::new(MemorySink::new());
        let engine = MatchingSink::new(MatchPredicate::Any, sink.clone());
        assert!(engine.evaluate_and_maybe_emit(segment(10)));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records()[0].trace_id(), 3);
    }

    #[test]
    fn test_non_match_skips_sink() {
        let sink = Arc::new(MemorySink::new());
        let engine = MatchingSink::new(MatchPredicate::MinTotalBytes(100), sink.clone());
        assert!(!engine.evaluate_and_maybe_emit(segment(10)));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_sink_failure_reports_not_emitted() {
        let engine = MatchingSink::new(MatchPredicate::Any, Arc::new(FailingSink));
        assert!(!engine.evaluate_and_maybe_emit(segment(10)));
    }

    #[test]
    fn test_engine_panic_is_contained() {
        assert!(!emit_contained(&PanickingEngine, segment(1)));
    }

    #[test]
    fn test_memory_sink_drain() {
        let sink = MemorySink::new();
        sink.submit(segment(1).into_record()).unwrap();
        assert_eq!(sink.drain().len(), 1);
        assert!(sink.is_empty());
    }
}
