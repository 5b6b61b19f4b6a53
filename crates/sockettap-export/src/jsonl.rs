//! JSONL trace writer

use crate::format::render;
use crate::TraceWriter;
use async_trait::async_trait;
use sockettap_core::config::BodyFormat;
use sockettap_core::events::TraceRecord;
use sockettap_core::sink::SinkResult;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

/// JSONL writer configuration
#[derive(Debug, Clone)]
pub struct JsonlWriterConfig {
    /// Output file path
    pub path: PathBuf,

    /// Whether to append to existing file
    pub append: bool,

    /// Flush after each write
    pub flush_each: bool,

    /// Payload rendering
    pub format: BodyFormat,
}

impl Default for JsonlWriterConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/sockettap-traces.jsonl"),
            append: true,
            flush_each: true,
            format: BodyFormat::JsonBodyAsBytes,
        }
    }
}

/// Writes every record as one line of a single file
pub struct JsonlWriter {
    config: JsonlWriterConfig,
    writer: BufWriter<File>,
    records_written: u64,
}

impl JsonlWriter {
    pub fn new(config: JsonlWriterConfig) -> SinkResult<Self> {
        let file = if config.append {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.path)?
        } else {
            File::create(&config.path)?
        };
        info!("JSONL writer writing to: {:?}", config.path);

        Ok(Self {
            config,
            writer: BufWriter::new(file),
            records_written: 0,
        })
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }
}

#[async_trait]
impl TraceWriter for JsonlWriter {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn write(&mut self, record: &TraceRecord) -> SinkResult<()> {
        let json = serde_json::to_string(&render(record, self.config.format))?;
        writeln!(self.writer, "{}", json)?;

        if self.config.flush_each {
            self.writer.flush()?;
        }

        self.records_written += 1;
        Ok(())
    }

    async fn flush(&mut self) -> SinkResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sockettap_core::events::{CloseKind, ConnectionInfo, TraceBuffer};

    fn record(id: u64) -> TraceRecord {
        let mut trace = TraceBuffer::new(ConnectionInfo::new(id), Utc::now(), 1024, 1024);
        trace.record_read(Utc::now(), b"ping", 4);
        trace.record_close(Utc::now(), CloseKind::LocalClose);
        TraceRecord::Buffered(trace)
    }

    #[tokio::test]
    async fn test_writes_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traces.jsonl");
        let mut writer = JsonlWriter::new(JsonlWriterConfig {
            path: path.clone(),
            ..Default::default()
        })
        .unwrap();

        writer.write(&record(1)).await.unwrap();
        writer.write(&record(2)).await.unwrap();
        assert_eq!(writer.records_written(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let ids: Vec<u64> = content
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["socket_buffered_trace"]["trace_id"].as_u64().unwrap()
            })
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_truncate_instead_of_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traces.jsonl");
        std::fs::write(&path, "stale\n").unwrap();

        let mut writer = JsonlWriter::new(JsonlWriterConfig {
            path: path.clone(),
            append: false,
            flush_each: false,
            ..Default::default()
        })
        .unwrap();
        writer.write(&record(5)).await.unwrap();
        writer.flush().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(!content.contains("stale"));
    }
}
