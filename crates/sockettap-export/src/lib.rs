//! Trace output for sockettap
//!
//! Writers render accepted records to disk; [`QueuedSink`] puts a bounded
//! queue in front of a writer so that tappers never wait on IO.

pub mod file_per_tap;
pub mod format;
pub mod jsonl;
pub mod queued;

pub use file_per_tap::FilePerTapWriter;
pub use jsonl::{JsonlWriter, JsonlWriterConfig};
pub use queued::{DrainSummary, QueuedSink};

use async_trait::async_trait;
use sockettap_core::config::{OutputSettings, SinkKind};
use sockettap_core::events::TraceRecord;
use sockettap_core::sink::SinkResult;
use std::path::PathBuf;
use tokio::task::JoinHandle;

/// Something that persists trace records
///
/// Writers run on the drain task only, so they may block briefly and take
/// `&mut self`.
#[async_trait]
pub trait TraceWriter: Send {
    fn name(&self) -> &str;

    async fn write(&mut self, record: &TraceRecord) -> SinkResult<()>;

    async fn flush(&mut self) -> SinkResult<()>;
}

/// Build the writer selected by `settings`
pub fn build_writer(settings: &OutputSettings) -> SinkResult<Box<dyn TraceWriter>> {
    let writer: Box<dyn TraceWriter> = match settings.sink {
        SinkKind::Jsonl => Box::new(JsonlWriter::new(JsonlWriterConfig {
            path: PathBuf::from(&settings.path),
            append: true,
            flush_each: settings.flush_each,
            format: settings.format,
        })?),
        SinkKind::FilePerTap => Box::new(FilePerTapWriter::new(
            settings.path_prefix.clone(),
            settings.format,
        )),
    };
    Ok(writer)
}

/// Build the configured writer and start its queue
pub fn spawn_sink(settings: &OutputSettings) -> SinkResult<(QueuedSink, JoinHandle<DrainSummary>)> {
    let writer = build_writer(settings)?;
    Ok(QueuedSink::spawn(writer, settings.queue_capacity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sockettap_core::config::{BodyFormat, SocketTapSettings, TapMode};
    use sockettap_core::events::{CloseKind, ConnectionInfo};
    use sockettap_core::stats::{StatsStore, TransportTapStats};
    use sockettap_core::tap_config::SocketTapConfig;
    use sockettap_core::time::ManualTimeSource;
    use sockettap_core::TraceSink;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_tapped_connection_reaches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let output = OutputSettings {
            sink: SinkKind::Jsonl,
            path: path.to_string_lossy().into_owned(),
            format: BodyFormat::JsonBodyAsString,
            ..Default::default()
        };

        let (sink, handle) = spawn_sink(&output).unwrap();
        let sink: Arc<dyn TraceSink> = Arc::new(sink);
        let config = Arc::new(SocketTapConfig::from_settings(
            &SocketTapSettings {
                mode: TapMode::Buffered,
                ..Default::default()
            },
            sink,
            Arc::new(ManualTimeSource::new(Utc::now())),
        ));
        let store = StatsStore::new();
        let stats = TransportTapStats::new(&store, "transport.tap.");

        let mut tapper = config
            .create_per_socket_tapper(&stats, &ConnectionInfo::new(11))
            .unwrap();
        tapper.on_read(b"hello", 5);
        tapper.on_write(b"world", 5, true);
        tapper.close_socket(CloseKind::LocalClose);
        drop(tapper);
        drop(config);

        let summary = handle.await.unwrap();
        assert_eq!(summary.written, 1);
        assert_eq!(store.value("transport.tap.buffered_submit"), Some(1));

        let content = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        let events = &value["socket_buffered_trace"]["events"];
        assert_eq!(events[0]["read"]["data"]["as_string"], "hello");
        assert_eq!(events[1]["write"]["data"]["as_string"], "world");
        assert_eq!(events[2]["closed"]["kind"], "local_close");
    }

    #[tokio::test]
    async fn test_file_per_tap_selected() {
        let writer = build_writer(&OutputSettings {
            sink: SinkKind::FilePerTap,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(writer.name(), "file_per_tap");
    }
}
