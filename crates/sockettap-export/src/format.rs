//! JSON rendering of trace records
//!
//! Buffered traces render as `{"socket_buffered_trace": {...}}`, streamed
//! events as `{"socket_streamed_trace_segment": {...}}`. Payload bytes are
//! wrapped as `{"as_bytes": "<base64>"}` or `{"as_string": "<text>"}`
//! depending on [`BodyFormat`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use sockettap_core::config::BodyFormat;
use sockettap_core::events::{Body, DirectionStats, TraceEvent, TraceRecord};

/// Render a record as a JSON value
pub fn render(record: &TraceRecord, format: BodyFormat) -> Value {
    match record {
        TraceRecord::Buffered(trace) => json!({
            "socket_buffered_trace": {
                "trace_id": trace.trace_id(),
                "connection": trace.connection(),
                "started_at": trace.started_at(),
                "closed_at": trace.closed_at(),
                "events": trace
                    .events()
                    .iter()
                    .map(|e| render_event(e, format))
                    .collect::<Vec<_>>(),
                "rx": render_direction(&trace.rx()),
                "tx": render_direction(&trace.tx()),
            }
        }),
        TraceRecord::Streamed(segment) => json!({
            "socket_streamed_trace_segment": {
                "trace_id": segment.trace_id(),
                "sequence": segment.sequence,
                "connection": &segment.connection,
                "event": render_event(&segment.event, format),
                "rx_total": segment.rx_total,
                "tx_total": segment.tx_total,
            }
        }),
    }
}

fn render_event(event: &TraceEvent, format: BodyFormat) -> Value {
    match event {
        TraceEvent::Read {
            timestamp,
            byte_count,
            body,
        } => json!({
            "timestamp": timestamp,
            "read": {
                "byte_count": byte_count,
                "data": render_body(body, format),
                "truncated": body.truncated,
            }
        }),
        TraceEvent::Write {
            timestamp,
            byte_count,
            body,
            end_stream,
        } => json!({
            "timestamp": timestamp,
            "write": {
                "byte_count": byte_count,
                "data": render_body(body, format),
                "truncated": body.truncated,
                "end_stream": end_stream,
            }
        }),
        TraceEvent::Close { timestamp, kind } => json!({
            "timestamp": timestamp,
            "closed": { "kind": kind },
        }),
    }
}

fn render_body(body: &Body, format: BodyFormat) -> Value {
    match format {
        BodyFormat::JsonBodyAsBytes => json!({ "as_bytes": STANDARD.encode(&body.data) }),
        BodyFormat::JsonBodyAsString => {
            json!({ "as_string": String::from_utf8_lossy(&body.data) })
        }
    }
}

fn render_direction(stats: &DirectionStats) -> Value {
    json!({
        "observed_bytes": stats.observed_bytes,
        "retained_bytes": stats.retained_bytes,
        "truncated": stats.truncated,
    })
}

/// Recover payload bytes from a rendered `data` object
pub fn decode_body(data: &Value) -> Option<Vec<u8>> {
    if let Some(encoded) = data.get("as_bytes").and_then(|v| v.as_str()) {
        return STANDARD.decode(encoded).ok();
    }
    data.get("as_string")
        .and_then(|v| v.as_str())
        .map(|s| s.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sockettap_core::events::{CloseKind, ConnectionInfo, StreamedSegment, TraceBuffer};

    fn buffered() -> TraceRecord {
        let mut trace = TraceBuffer::new(ConnectionInfo::new(3), Utc::now(), 4, 1024);
        trace.record_read(Utc::now(), b"GET / HTTP/1.1", 14);
        trace.record_write(Utc::now(), b"HTTP/1.1 200 OK", 15, true);
        trace.record_close(Utc::now(), CloseKind::RemoteClose);
        TraceRecord::Buffered(trace)
    }

    #[test]
    fn test_buffered_as_bytes() {
        let value = render(&buffered(), BodyFormat::JsonBodyAsBytes);
        let trace = &value["socket_buffered_trace"];

        assert_eq!(trace["trace_id"], 3);
        let events = trace["events"].as_array().unwrap();
        assert_eq!(events.len(), 3);

        let read = &events[0]["read"];
        assert_eq!(read["byte_count"], 14);
        assert_eq!(read["truncated"], true);
        assert_eq!(decode_body(&read["data"]).unwrap(), b"GET ");

        assert_eq!(events[1]["write"]["end_stream"], true);
        assert_eq!(events[2]["closed"]["kind"], "remote_close");
        assert_eq!(trace["rx"]["observed_bytes"], 14);
        assert_eq!(trace["rx"]["retained_bytes"], 4);
        assert_eq!(trace["tx"]["truncated"], false);
    }

    #[test]
    fn test_body_as_string() {
        let value = render(&buffered(), BodyFormat::JsonBodyAsString);
        let write = &value["socket_buffered_trace"]["events"][1]["write"];
        assert_eq!(write["data"]["as_string"], "HTTP/1.1 200 OK");
    }

    #[test]
    fn test_streamed_segment() {
        let segment = StreamedSegment {
            connection: ConnectionInfo::new(8),
            sequence: 2,
            event: TraceEvent::Read {
                timestamp: Utc::now(),
                byte_count: 2,
                body: Body::new(vec![0xff, 0x00]),
            },
            rx_total: 10,
            tx_total: 0,
        };
        let value = render(&TraceRecord::Streamed(segment), BodyFormat::JsonBodyAsBytes);
        let seg = &value["socket_streamed_trace_segment"];

        assert_eq!(seg["trace_id"], 8);
        assert_eq!(seg["sequence"], 2);
        assert_eq!(seg["rx_total"], 10);
        assert_eq!(decode_body(&seg["event"]["read"]["data"]).unwrap(), vec![0xff, 0x00]);
    }
}
