//! The event bus collaborator (spec.md §4.9, §9): `Publish(topic, payload)
//! error`, fire-and-forget. Grounded in `sa_providers::registry`'s
//! log-and-continue-on-error handling of provider init failures — the same
//! "don't let a side channel abort the main path" discipline applies here.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()>;
}

/// Default sink: logs the event at debug and always succeeds. Callers
/// should still treat `publish` as best-effort and swallow errors from any
/// real implementation (spec.md: "Failures are logged and swallowed").
pub struct LoggingEventSink;

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        tracing::debug!(topic = %topic, payload = %payload, "event published");
        Ok(())
    }
}

/// Publish best-effort: log and continue on error, never propagate.
pub async fn publish_best_effort(sink: &dyn EventSink, topic: &str, payload: Value) {
    if let Err(e) = sink.publish(topic, payload).await {
        tracing::warn!(topic = %topic, error = %e, "event publish failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn logging_sink_never_errors() {
        let sink = LoggingEventSink;
        let result = sink.publish("voice.session.started", json!({"session_id": "s1"})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn publish_best_effort_swallows_nothing_to_swallow() {
        let sink = LoggingEventSink;
        publish_best_effort(&sink, "voice.session.ended", json!({})).await;
    }
}
