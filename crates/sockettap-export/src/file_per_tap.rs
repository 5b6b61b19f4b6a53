//! One output file per traced connection
//!
//! Buffered traces are written whole to `{prefix}_{trace_id}.json`. Streamed
//! segments are appended, one per line, to `{prefix}_{trace_id}.jsonl`.

use crate::format::render;
use crate::TraceWriter;
use async_trait::async_trait;
use sockettap_core::config::BodyFormat;
use sockettap_core::events::TraceRecord;
use sockettap_core::sink::SinkResult;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

/// Writer producing a file per trace id
#[derive(Debug)]
pub struct FilePerTapWriter {
    path_prefix: String,
    format: BodyFormat,
}

impl FilePerTapWriter {
    pub fn new(path_prefix: impl Into<String>, format: BodyFormat) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            format,
        }
    }

    /// Output path for a record
    pub fn path_for(&self, record: &TraceRecord) -> PathBuf {
        let extension = if record.is_streamed() { "jsonl" } else { "json" };
        PathBuf::from(format!(
            "{}_{}.{}",
            self.path_prefix,
            record.trace_id(),
            extension
        ))
    }
}

#[async_trait]
impl TraceWriter for FilePerTapWriter {
    fn name(&self) -> &str {
        "file_per_tap"
    }

    async fn write(&mut self, record: &TraceRecord) -> SinkResult<()> {
        let path = self.path_for(record);
        let value = render(record, self.format);

        if record.is_streamed() {
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(file, "{}", serde_json::to_string(&value)?)?;
        } else {
            std::fs::write(&path, serde_json::to_string_pretty(&value)?)?;
        }

        debug!(trace_id = record.trace_id(), path = %path.display(), "Wrote tap trace");
        Ok(())
    }

    async fn flush(&mut self) -> SinkResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sockettap_core::events::{
        Body, CloseKind, ConnectionInfo, StreamedSegment, TraceBuffer, TraceEvent,
    };

    fn segment(id: u64, sequence: u64) -> TraceRecord {
        TraceRecord::Streamed(StreamedSegment {
            connection: ConnectionInfo::new(id),
            sequence,
            event: TraceEvent::Write {
                timestamp: Utc::now(),
                byte_count: 3,
                body: Body::new(b"abc".to_vec()),
                end_stream: false,
            },
            rx_total: 0,
            tx_total: 3 * (sequence + 1),
        })
    }

    #[tokio::test]
    async fn test_buffered_trace_gets_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("tap").to_string_lossy().into_owned();
        let mut writer = FilePerTapWriter::new(prefix, BodyFormat::JsonBodyAsString);

        let mut trace = TraceBuffer::new(ConnectionInfo::new(42), Utc::now(), 1024, 1024);
        trace.record_read(Utc::now(), b"hello", 5);
        trace.record_close(Utc::now(), CloseKind::RemoteClose);
        writer.write(&TraceRecord::Buffered(trace)).await.unwrap();

        let path = dir.path().join("tap_42.json");
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(
            value["socket_buffered_trace"]["events"][0]["read"]["data"]["as_string"],
            "hello"
        );
    }

    #[tokio::test]
    async fn test_streamed_segments_append_per_connection() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("tap").to_string_lossy().into_owned();
        let mut writer = FilePerTapWriter::new(prefix, BodyFormat::JsonBodyAsBytes);

        writer.write(&segment(1, 0)).await.unwrap();
        writer.write(&segment(2, 0)).await.unwrap();
        writer.write(&segment(1, 1)).await.unwrap();

        let first = std::fs::read_to_string(dir.path().join("tap_1.jsonl")).unwrap();
        let second = std::fs::read_to_string(dir.path().join("tap_2.jsonl")).unwrap();
        assert_eq!(first.lines().count(), 2);
        assert_eq!(second.lines().count(), 1);
    }
}
