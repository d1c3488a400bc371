/// In-process effect channels
///
/// Toast notifications, cache invalidations and custom emitted events never
/// leave the process: each kind has a broadcast channel that interested
/// subscribers (SSE bridges, dashboards, tests) can tap. Publishing with no
/// subscriber does no work.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// A UI notification record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToastRecord {
    pub message: String,
    /// Severity hint ("info", "success", "error", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    pub task_id: String,
}

/// A cache invalidation record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub task_id: String,
}

/// A custom named event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEvent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub task_id: String,
}

fn toast_channel() -> &'static broadcast::Sender<ToastRecord> {
    static CHANNEL: OnceLock<broadcast::Sender<ToastRecord>> = OnceLock::new();
    CHANNEL.get_or_init(|| broadcast::channel(CHANNEL_CAPACITY).0)
}

fn invalidate_channel() -> &'static broadcast::Sender<InvalidateRecord> {
    static CHANNEL: OnceLock<broadcast::Sender<InvalidateRecord>> = OnceLock::new();
    CHANNEL.get_or_init(|| broadcast::channel(CHANNEL_CAPACITY).0)
}

fn event_channel() -> &'static broadcast::Sender<CustomEvent> {
    static CHANNEL: OnceLock<broadcast::Sender<CustomEvent>> = OnceLock::new();
    CHANNEL.get_or_init(|| broadcast::channel(CHANNEL_CAPACITY).0)
}

pub fn subscribe_toasts() -> broadcast::Receiver<ToastRecord> {
    toast_channel().subscribe()
}

pub fn subscribe_invalidations() -> broadcast::Receiver<InvalidateRecord> {
    invalidate_channel().subscribe()
}

pub fn subscribe_events() -> broadcast::Receiver<CustomEvent> {
    event_channel().subscribe()
}

pub fn publish_toast(record: ToastRecord) {
    tracing::debug!("🍞 toast: {}", record.message);
    let _ = toast_channel().send(record);
}

pub fn publish_invalidation(record: InvalidateRecord) {
    tracing::debug!("🧹 invalidate: path={:?} tags={:?}", record.path, record.tags);
    let _ = invalidate_channel().send(record);
}

pub fn publish_event(event: CustomEvent) {
    tracing::debug!("📣 emit: {}", event.name);
    let _ = event_channel().send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn toast_round_trip() {
        let mut rx = subscribe_toasts();
        publish_toast(ToastRecord {
            message: "transcription done".to_string(),
            level: Some("success".to_string()),
            task_id: "j1".to_string(),
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.message, "transcription done");
    }

    #[test]
    fn publish_without_subscriber_is_fine() {
        publish_event(CustomEvent {
            name: "custom".to_string(),
            data: None,
            task_id: "j1".to_string(),
        });
    }
}
