//! Periodic quota accounting for API-key subjects.
//!
//! Quotas run on calendar periods (`YYYY-MM` keys) independent of the
//! short-window limiter: an API key at or over its monthly allowance is
//! denied even when the sliding window has capacity. Usage is only
//! consumed by allowed requests; period rollover is implicit in the key
//! and the TTL is housekeeping.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{QuotaConfig, QuotaStatus, Subject};
use crate::store::{BackingStore, StoreError};
use crate::utils::period_key;

/// Outlives any calendar month; rollover happens via the period key.
const PERIOD_TTL: Duration = Duration::from_secs(35 * 24 * 3600);

pub struct QuotaManager {
    store: Arc<dyn BackingStore>,
    config: QuotaConfig,
}

impl QuotaManager {
    pub fn new(store: Arc<dyn BackingStore>, config: QuotaConfig) -> Self {
        Self { store, config }
    }

    fn quota_key(subject: &Subject, now: DateTime<Utc>) -> String {
        format!("quota:{}:{}", subject.storage_key(), period_key(now))
    }

    fn limit_for(&self, subject: &Subject) -> u64 {
        self.config
            .overrides
            .get(subject.value())
            .copied()
            .unwrap_or(self.config.monthly_limit)
    }

    /// Check the current period's usage and consume one unit when allowed.
    ///
    /// The pre-check keeps denied requests from touching the counter; the
    /// post-increment check re-validates, so two callers racing at the
    /// boundary cannot both be allowed.
    pub async fn check_and_consume(
        &self,
        subject: &Subject,
        now: DateTime<Utc>,
    ) -> Result<QuotaStatus, StoreError> {
        let limit = self.limit_for(subject);
        let key = Self::quota_key(subject, now);
        let used = self
            .store
            .get(&key)
            .await?
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);

        if used >= limit {
            return Ok(QuotaStatus {
                allowed: false,
                limit,
                used,
                remaining: 0,
            });
        }

        let new_used = self
            .store
            .atomic_increment(&key, Some(PERIOD_TTL))
            .await?
            .max(0) as u64;
        if new_used > limit {
            return Ok(QuotaStatus {
                allowed: false,
                limit,
                used: new_used,
                remaining: 0,
            });
        }
        Ok(QuotaStatus {
            allowed: true,
            limit,
            used: new_used,
            remaining: limit - new_used,
        })
    }

    /// Read-only usage for the current period.
    pub async fn usage(
        &self,
        subject: &Subject,
        now: DateTime<Utc>,
    ) -> Result<QuotaStatus, StoreError> {
        let limit = self.limit_for(subject);
        let used = self
            .store
            .get(&Self::quota_key(subject, now))
            .await?
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(QuotaStatus {
            allowed: used < limit,
            limit,
            used,
            remaining: limit.saturating_sub(used),
        })
    }
}
