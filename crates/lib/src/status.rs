//! Status/telemetry sink: accepts JSON-serializable snapshots for
//! publication (inclusion status, inclusion config, periodic counters).
//! Fire-and-forget; the core never waits for an acknowledgment.

use std::sync::Mutex;

/// Publication seam toward the external message bus. Implementations must
/// never block the caller for long; a failed publication is the sink's
/// problem, not the gateway's.
pub trait StatusSink: Send + Sync {
    fn publish(&self, topic: &str, payload: &serde_json::Value);
}

/// Default sink: writes publications to the log stream.
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn publish(&self, topic: &str, payload: &serde_json::Value) {
        log::debug!("status publish {}: {}", topic, payload);
    }
}

/// Test sink recording every publication.
pub struct RecordingStatusSink {
    published: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingStatusSink {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.published.lock().expect("sink lock").clone()
    }
}

impl Default for RecordingStatusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for RecordingStatusSink {
    fn publish(&self, topic: &str, payload: &serde_json::Value) {
        self.published
            .lock()
            .expect("sink lock")
            .push((topic.to_string(), payload.clone()));
    }
}
