//! Non-blocking sink backed by a background writer task
//!
//! `submit` only enqueues. When the queue is full the record is dropped and
//! the caller gets [`SinkError::QueueFull`], so a slow disk never stalls a
//! connection.

use crate::TraceWriter;
use sockettap_core::events::TraceRecord;
use sockettap_core::sink::{SinkError, SinkResult, TraceSink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Summary returned by the drain task once every sender is gone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub written: u64,
    pub failed: u64,
}

/// Sink that hands records to a writer task through a bounded queue
#[derive(Debug)]
pub struct QueuedSink {
    name: String,
    tx: mpsc::Sender<TraceRecord>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl QueuedSink {
    /// Start the writer task and return the sink feeding it.
    ///
    /// Must be called from within a tokio runtime. The task ends after the
    /// last clone of the sink is dropped and the queue is drained.
    pub fn spawn(
        writer: Box<dyn TraceWriter>,
        capacity: usize,
    ) -> (Self, JoinHandle<DrainSummary>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let name = format!("queued-{}", writer.name());
        let handle = tokio::spawn(drain(writer, rx));

        let sink = Self {
            name,
            tx,
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, handle)
    }

    /// Records refused because the queue was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl TraceSink for QueuedSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, record: TraceRecord) -> SinkResult<()> {
        self.tx.try_send(record).map_err(|e| {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => SinkError::QueueFull {
                    capacity: self.capacity,
                },
                mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
            }
        })
    }
}

async fn drain(
    mut writer: Box<dyn TraceWriter>,
    mut rx: mpsc::Receiver<TraceRecord>,
) -> DrainSummary {
    let mut summary = DrainSummary::default();

    while let Some(record) = rx.recv().await {
        match writer.write(&record).await {
            Ok(()) => summary.written += 1,
            Err(e) => {
                summary.failed += 1;
                warn!(
                    writer = writer.name(),
                    trace_id = record.trace_id(),
                    error = %e,
                    "Failed to write tap trace"
                );
            }
        }
    }

    if let Err(e) = writer.flush().await {
        warn!(writer = writer.name(), error = %e, "Failed to flush tap writer");
    }
    debug!(
        writer = writer.name(),
        written = summary.written,
        failed = summary.failed,
        "Tap writer drained"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use sockettap_core::events::{ConnectionInfo, TraceBuffer};
    use tokio::sync::Notify;

    /// Collects trace ids; optionally waits for a signal before each write
    struct RecordingWriter {
        seen: Arc<Mutex<Vec<u64>>>,
        gate: Option<Arc<Notify>>,
        fail_on: Option<u64>,
    }

    #[async_trait]
    impl TraceWriter for RecordingWriter {
        fn name(&self) -> &str {
            "recording"
        }

        async fn write(&mut self, record: &TraceRecord) -> SinkResult<()> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_on == Some(record.trace_id()) {
                return Err(SinkError::OperationFailed("disk full".to_string()));
            }
            self.seen.lock().push(record.trace_id());
            Ok(())
        }

        async fn flush(&mut self) -> SinkResult<()> {
            Ok(())
        }
    }

    fn record(id: u64) -> TraceRecord {
        TraceRecord::Buffered(TraceBuffer::new(ConnectionInfo::new(id), Utc::now(), 0, 0))
    }

    #[tokio::test]
    async fn test_drains_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let writer = RecordingWriter {
            seen: seen.clone(),
            gate: None,
            fail_on: Some(2),
        };
        let (sink, handle) = QueuedSink::spawn(Box::new(writer), 16);

        for id in 1..=4 {
            sink.submit(record(id)).unwrap();
        }
        drop(sink);

        let summary = handle.await.unwrap();
        assert_eq!(summary, DrainSummary { written: 3, failed: 1 });
        assert_eq!(*seen.lock(), vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let gate = Arc::new(Notify::new());
        let writer = RecordingWriter {
            seen: Arc::new(Mutex::new(Vec::new())),
            gate: Some(gate.clone()),
            fail_on: None,
        };
        let (sink, handle) = QueuedSink::spawn(Box::new(writer), 1);

        // The writer may already hold the first record while parked on the
        // gate; at most one more fits in the queue.
        let results: Vec<_> = (1..=3).map(|id| sink.submit(record(id))).collect();
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(SinkError::QueueFull { capacity: 1 }))));
        assert!(sink.dropped() >= 1);

        drop(sink);
        for _ in 0..3 {
            gate.notify_one();
        }
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let writer = RecordingWriter {
            seen: Arc::new(Mutex::new(Vec::new())),
            gate: None,
            fail_on: None,
        };
        let (sink, handle) = QueuedSink::spawn(Box::new(writer), 4);
        handle.abort();
        let _ = handle.await;

        assert!(matches!(sink.submit(record(1)), Err(SinkError::Closed)));
        assert_eq!(sink.dropped(), 1);
    }
}
