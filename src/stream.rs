//! Progress events emitted while tools write files.
//!
//! Per file the order is always start → delta* → complete. Events for
//! different files may interleave. Emission is a side channel: an emitter
//! never influences the result of the tool that drives it.

use crate::config::StreamConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    Start,
    Delta,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: StreamEventKind,
    pub file_path: String,
    pub payload: serde_json::Value,
}

pub trait ProgressEmitter: Send + Sync {
    fn emit(&self, event: StreamEvent);

    fn write_start(&self, path: &str, meta: serde_json::Value) {
        self.emit(StreamEvent {
            kind: StreamEventKind::Start,
            file_path: path.to_string(),
            payload: meta,
        });
    }

    fn write_delta(&self, path: &str, chunk: &str) {
        self.emit(StreamEvent {
            kind: StreamEventKind::Delta,
            file_path: path.to_string(),
            payload: serde_json::Value::String(chunk.to_string()),
        });
    }

    fn write_complete(&self, path: &str, meta: serde_json::Value) {
        self.emit(StreamEvent {
            kind: StreamEventKind::Complete,
            file_path: path.to_string(),
            payload: meta,
        });
    }
}

/// Discards everything.
pub struct NoopEmitter;

impl ProgressEmitter for NoopEmitter {
    fn emit(&self, _event: StreamEvent) {}
}

/// Forwards events into an unbounded channel. A dropped receiver is ignored.
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelEmitter {
    pub fn new() -> (Self, UnboundedReceiverStream<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, UnboundedReceiverStream::new(rx))
    }
}

impl ProgressEmitter for ChannelEmitter {
    fn emit(&self, event: StreamEvent) {
        let _ = self.tx.send(event);
    }
}

/// Keeps a copy of every event and optionally forwards to an observer.
///
/// The tool executor drains it after each call to build the call record.
#[derive(Default)]
pub struct RecordingEmitter {
    observer: Option<Arc<dyn ProgressEmitter>>,
    events: Mutex<Vec<StreamEvent>>,
}

impl RecordingEmitter {
    pub fn new(observer: Option<Arc<dyn ProgressEmitter>>) -> Self {
        Self {
            observer,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn take(&self) -> Vec<StreamEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl ProgressEmitter for RecordingEmitter {
    fn emit(&self, event: StreamEvent) {
        if let Some(observer) = &self.observer {
            observer.emit(event.clone());
        }
        self.events.lock().push(event);
    }
}

/// Split `content` into slices of at most `size` characters.
fn chunk_chars(content: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    for (count, (idx, _)) in content.char_indices().enumerate() {
        if count > 0 && count % size == 0 {
            chunks.push(&content[start..idx]);
            start = idx;
        }
    }
    if start < content.len() {
        chunks.push(&content[start..]);
    }
    chunks
}

/// Emit start and the content deltas for one file. Content above the
/// threshold is sliced with a pause between slices; smaller content goes out
/// as a single delta. The caller emits `complete` once the write settles.
pub async fn stream_content(
    emitter: &dyn ProgressEmitter,
    config: &StreamConfig,
    path: &str,
    content: &str,
    meta: serde_json::Value,
) {
    if !config.enabled {
        return;
    }
    emitter.write_start(path, meta);

    let chars = content.chars().count();
    if chars <= config.chunk_threshold {
        emitter.write_delta(path, content);
        return;
    }

    let chunks = chunk_chars(content, config.chunk_size);
    let last = chunks.len().saturating_sub(1);
    for (i, chunk) in chunks.into_iter().enumerate() {
        emitter.write_delta(path, chunk);
        if i < last && config.chunk_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.chunk_delay_ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn fast_config() -> StreamConfig {
        StreamConfig {
            chunk_delay_ms: 0,
            ..StreamConfig::default()
        }
    }

    #[test]
    fn chunking_respects_char_boundaries() {
        let text = "ééééé";
        assert_eq!(chunk_chars(text, 2), vec!["éé", "éé", "é"]);
        assert!(chunk_chars("", 3).is_empty());
    }

    #[tokio::test]
    async fn large_content_is_chunked_in_order() {
        let recorder = RecordingEmitter::new(None);
        let content = "x".repeat(1200);
        stream_content(&recorder, &fast_config(), "a.ts", &content, serde_json::json!({}))
            .await;
        recorder.write_complete("a.ts", serde_json::json!({"ok": true}));

        let events = recorder.take();
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StreamEventKind::Start,
                StreamEventKind::Delta,
                StreamEventKind::Delta,
                StreamEventKind::Delta,
                StreamEventKind::Complete
            ]
        );
        let joined: String = events
            .iter()
            .filter(|e| e.kind == StreamEventKind::Delta)
            .filter_map(|e| e.payload.as_str())
            .collect();
        assert_eq!(joined, content);
        assert!(recorder.take().is_empty());
    }

    #[tokio::test]
    async fn small_content_is_a_single_delta() {
        let recorder = RecordingEmitter::new(None);
        stream_content(&recorder, &fast_config(), "a.ts", "short", serde_json::json!({})).await;
        assert_eq!(recorder.take().len(), 2);
    }

    #[tokio::test]
    async fn disabled_streaming_emits_nothing() {
        let recorder = RecordingEmitter::new(None);
        let config = StreamConfig {
            enabled: false,
            ..fast_config()
        };
        stream_content(&recorder, &config, "a.ts", "short", serde_json::json!({})).await;
        assert!(recorder.take().is_empty());
    }

    #[tokio::test]
    async fn recording_forwards_to_channel() {
        let (channel, mut rx) = ChannelEmitter::new();
        let recorder = RecordingEmitter::new(Some(Arc::new(channel)));
        recorder.write_delta("a.ts", "hi");
        drop(recorder);
        let event = rx.next().await.unwrap();
        assert_eq!(event.file_path, "a.ts");
        assert_eq!(event.payload, serde_json::json!("hi"));
        assert!(rx.next().await.is_none());
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = StreamEvent {
            kind: StreamEventKind::Start,
            file_path: "a.ts".to_string(),
            payload: serde_json::Value::Null,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "start");
        assert_eq!(json["filePath"], "a.ts");
    }
}
