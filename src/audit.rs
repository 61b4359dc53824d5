//! Security event reporting for the rate guard engine.
//!
//! The engine reports denials, attack triggers, and degraded-mode events
//! through the [`AuditSink`] trait. Sinks are fire-and-forget: they are
//! invoked off the decision path and never propagate failures back into
//! a check.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::store::BackingStore;

const EVENTS_KEY: &str = "audit:events";

/// A persisted security event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub context: HashMap<String, serde_json::Value>,
}

/// Fire-and-forget audit collaborator.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_event(&self, event: &str, context: HashMap<String, serde_json::Value>);
}

/// Sink that reports events through the logging facade only.
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn log_event(&self, event: &str, context: HashMap<String, serde_json::Value>) {
        let payload = serde_json::to_string(&context).unwrap_or_default();
        warn!("security event {}: {}", event, payload);
    }
}

/// Sink that persists events into the backing store as a score-ordered
/// set keyed by timestamp, pruning entries past the retention window.
pub struct StoreAuditSink {
    store: Arc<dyn BackingStore>,
    retention: Duration,
}

impl StoreAuditSink {
    pub fn new(store: Arc<dyn BackingStore>, retention: Duration) -> Self {
        Self { store, retention }
    }

    /// Most recent persisted events, oldest first.
    pub async fn recent(&self, count: usize) -> Vec<AuditEvent> {
        let entries = match self
            .store
            .sorted_set_range_with_scores(EVENTS_KEY, -(count as isize), -1)
            .await
        {
            Ok(entries) => entries,
            Err(err) => {
                warn!("failed to read audit events: {}", err);
                return Vec::new();
            }
        };
        entries
            .into_iter()
            .filter_map(|(json, _)| serde_json::from_str(&json).ok())
            .collect()
    }
}

#[async_trait]
impl AuditSink for StoreAuditSink {
    async fn log_event(&self, event: &str, context: HashMap<String, serde_json::Value>) {
        let now = Utc::now();
        let record = AuditEvent {
            id: Uuid::new_v4().to_string(),
            timestamp: now,
            event: event.to_string(),
            context,
        };
        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(err) => {
                error!("failed to serialize audit event {}: {}", event, err);
                return;
            }
        };
        let now_ms = now.timestamp_millis();
        if let Err(err) = self.store.sorted_set_add(EVENTS_KEY, now_ms, &json).await {
            warn!("failed to persist audit event {}: {}", event, err);
            return;
        }
        let cutoff = now_ms - self.retention.as_millis() as i64;
        if let Err(err) = self
            .store
            .sorted_set_remove_range_by_score(EVENTS_KEY, 0, cutoff)
            .await
        {
            warn!("failed to prune audit events: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn context(pairs: &[(&str, &str)]) -> HashMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::json!(v)))
            .collect()
    }

    #[tokio::test]
    async fn events_round_trip_through_the_store() {
        let store = Arc::new(MemoryStore::new());
        let sink = StoreAuditSink::new(store, Duration::from_secs(3600));
        sink.log_event("request_denied", context(&[("reason", "RATE_LIMIT_EXCEEDED")]))
            .await;
        sink.log_event("ddos_detected", context(&[("subject", "ip:203.0.113.9")]))
            .await;

        let events = sink.recent(10).await;
        assert_eq!(events.len(), 2);
        let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
        assert!(names.contains(&"request_denied"));
        assert!(names.contains(&"ddos_detected"));
        let denied = events.iter().find(|e| e.event == "request_denied").unwrap();
        assert_eq!(
            denied.context.get("reason"),
            Some(&serde_json::json!("RATE_LIMIT_EXCEEDED"))
        );
    }

    #[tokio::test]
    async fn retention_prunes_old_events() {
        let store = Arc::new(MemoryStore::new());
        // Zero retention: each new event prunes everything at or before it,
        // including itself.
        let sink = StoreAuditSink::new(store.clone(), Duration::from_secs(0));
        sink.log_event("request_denied", HashMap::new()).await;
        let count = store.sorted_set_cardinality(EVENTS_KEY).await.unwrap();
        assert_eq!(count, 0);
    }
}
