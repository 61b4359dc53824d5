//! Burst protection, independent of the longer sliding window.
//!
//! Catches short, high-intensity spikes by counting the subject's recent
//! requests inside a small trailing window. On trigger a penalty record
//! is persisted with a TTL; while it is active, every check for the
//! subject short-circuits to deny.

use chrono::{DateTime, Utc};
use log::error;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{BurstAssessment, BurstConfig, BurstProtectionRecord, Subject};
use crate::store::{BackingStore, StoreError};
use crate::utils::format_store_key;

pub struct BurstProtectionGuard {
    store: Arc<dyn BackingStore>,
    config: BurstConfig,
}

impl BurstProtectionGuard {
    pub fn new(store: Arc<dyn BackingStore>, config: BurstConfig) -> Self {
        Self { store, config }
    }

    fn penalty_key(subject: &Subject) -> String {
        format_store_key("burst", &subject.storage_key())
    }

    /// Evaluate the recent timestamp history for a spike. Pure computation;
    /// the history comes from the profiler's bounded log.
    pub fn evaluate(&self, history: &[i64], now: DateTime<Utc>) -> BurstAssessment {
        let now_ms = now.timestamp_millis();
        let cutoff = now_ms - self.config.window_seconds as i64 * 1000;
        let window_requests = history
            .iter()
            .filter(|&&stamp| stamp >= cutoff && stamp <= now_ms)
            .count() as u32;

        let max_requests = self.config.max_requests.max(1);
        let intensity = window_requests as f64 / max_requests as f64;
        // Half intensity at the threshold, saturating at twice it.
        let suspicion_score = (intensity / 2.0).clamp(0.0, 1.0);
        let is_suspicious = window_requests > self.config.max_requests;
        let suggested_delay_seconds = if is_suspicious {
            ((suspicion_score * self.config.penalty_scale_seconds as f64).round() as u32)
                .clamp(1, self.config.max_penalty_seconds)
        } else {
            0
        };

        BurstAssessment {
            is_suspicious,
            suspicion_score,
            suggested_delay_seconds,
            window_requests,
        }
    }

    /// Persist a penalty record for a triggered assessment.
    pub async fn apply(
        &self,
        subject: &Subject,
        assessment: &BurstAssessment,
        now: DateTime<Utc>,
    ) -> Result<BurstProtectionRecord, StoreError> {
        let duration_seconds = assessment
            .suggested_delay_seconds
            .clamp(1, self.config.max_penalty_seconds);
        let record = BurstProtectionRecord {
            applied_at: now,
            duration_seconds,
            reason: "short spike exceeded burst threshold".to_string(),
            pattern: format!(
                "{} requests in {}s",
                assessment.window_requests, self.config.window_seconds
            ),
        };
        match serde_json::to_string(&record) {
            Ok(json) => {
                self.store
                    .set(
                        &Self::penalty_key(subject),
                        &json,
                        Some(Duration::from_secs(duration_seconds as u64)),
                    )
                    .await?;
            }
            Err(err) => error!("burst record serialization failed: {}", err),
        }
        Ok(record)
    }

    /// The unexpired penalty record for a subject, if any.
    pub async fn active(
        &self,
        subject: &Subject,
        now: DateTime<Utc>,
    ) -> Result<Option<BurstProtectionRecord>, StoreError> {
        match self.store.get(&Self::penalty_key(subject)).await? {
            Some(json) => Ok(serde_json::from_str::<BurstProtectionRecord>(&json)
                .ok()
                .filter(|record| record.is_active(now))),
            None => Ok(None),
        }
    }

    /// Lift a subject's penalty.
    pub async fn clear(&self, subject: &Subject) -> Result<(), StoreError> {
        self.store.delete(&Self::penalty_key(subject)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn config() -> BurstConfig {
        BurstConfig {
            window_seconds: 10,
            max_requests: 20,
            penalty_scale_seconds: 300,
            max_penalty_seconds: 600,
        }
    }

    fn guard() -> BurstProtectionGuard {
        BurstProtectionGuard::new(Arc::new(MemoryStore::new()), config())
    }

    fn spike(now: DateTime<Utc>, requests: usize, span_ms: i64) -> Vec<i64> {
        let now_ms = now.timestamp_millis();
        (0..requests as i64)
            .map(|i| now_ms - span_ms + i * (span_ms / requests as i64).max(1))
            .collect()
    }

    #[test]
    fn dense_spike_is_suspicious_with_nonzero_delay() {
        let now = Utc::now();
        // 50 requests inside 2 seconds.
        let assessment = guard().evaluate(&spike(now, 50, 2_000), now);
        assert!(assessment.is_suspicious);
        assert_eq!(assessment.window_requests, 50);
        assert!(assessment.suspicion_score > 0.9);
        assert!(assessment.suggested_delay_seconds > 0);
    }

    #[test]
    fn traffic_at_the_threshold_does_not_trigger() {
        let now = Utc::now();
        let assessment = guard().evaluate(&spike(now, 20, 9_000), now);
        assert!(!assessment.is_suspicious);
        assert_eq!(assessment.suggested_delay_seconds, 0);
    }

    #[test]
    fn old_requests_fall_out_of_the_burst_window() {
        let now = Utc::now();
        // A big spike, but 30 seconds ago.
        let assessment = guard().evaluate(&spike(now - chrono::Duration::seconds(30), 50, 2_000), now);
        assert!(!assessment.is_suspicious);
        assert_eq!(assessment.window_requests, 0);
    }

    #[tokio::test]
    async fn applied_penalty_is_active_until_it_expires() {
        let store = Arc::new(MemoryStore::new());
        let guard = BurstProtectionGuard::new(store, config());
        let subject = Subject::user("alice").unwrap();
        let now = Utc::now();

        let assessment = guard.evaluate(&spike(now, 50, 2_000), now);
        let record = guard.apply(&subject, &assessment, now).await.unwrap();
        assert!(record.duration_seconds >= 1);
        assert!(record.pattern.contains("50 requests"));

        let active = guard.active(&subject, now).await.unwrap();
        assert!(active.is_some());

        // Past the penalty duration the record no longer applies.
        let later = now + chrono::Duration::seconds(record.duration_seconds as i64 + 1);
        assert!(guard.active(&subject, later).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_lifts_the_penalty() {
        let store = Arc::new(MemoryStore::new());
        let guard = BurstProtectionGuard::new(store, config());
        let subject = Subject::user("bob").unwrap();
        let now = Utc::now();

        let assessment = guard.evaluate(&spike(now, 50, 2_000), now);
        guard.apply(&subject, &assessment, now).await.unwrap();
        guard.clear(&subject).await.unwrap();
        assert!(guard.active(&subject, now).await.unwrap().is_none());
    }

    #[test]
    fn penalty_duration_is_capped() {
        let mut cfg = config();
        cfg.penalty_scale_seconds = 10_000;
        cfg.max_penalty_seconds = 120;
        let guard = BurstProtectionGuard::new(Arc::new(MemoryStore::new()), cfg);
        let now = Utc::now();
        let assessment = guard.evaluate(&spike(now, 100, 2_000), now);
        assert!(assessment.suggested_delay_seconds <= 120);
    }
}
