//! Sliding-window-log rate limiting.
//!
//! Each accepted check inserts a `(timestamp, unique id)` entry into a
//! score-ordered log per `(subject, endpoint)` key; a check counts the
//! entries inside the trailing window after pruning expired ones. The
//! prune/count/insert sequence runs as one atomic store operation, so
//! concurrent checks for the same key cannot exceed the limit.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{AdaptiveLimit, RateLimitKey};
use crate::store::{BackingStore, StoreError};

/// Keys outlive the window by this margin so lazily-pruned entries still
/// expire server-side.
const TTL_MARGIN_SECONDS: u64 = 10;

/// Outcome of one window check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowDecision {
    pub allowed: bool,
    /// Entries inside the window, including this request when allowed.
    pub current_count: u64,
    pub remaining: u64,
    /// Epoch seconds at which capacity frees up again.
    pub reset_at: i64,
}

pub struct SlidingWindowCounter {
    store: Arc<dyn BackingStore>,
}

impl SlidingWindowCounter {
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self { store }
    }

    /// Check and record one request against the window.
    ///
    /// Entries scored strictly below `now - window` are expired; entries at
    /// the boundary are still counted. A denied check records nothing and
    /// reports `reset_at` from the oldest surviving entry.
    pub async fn check(
        &self,
        key: &RateLimitKey,
        limit: &AdaptiveLimit,
        now: DateTime<Utc>,
    ) -> Result<WindowDecision, StoreError> {
        let now_ms = now.timestamp_millis();
        let window_ms = limit.window_seconds as i64 * 1000;

        if limit.requests == 0 {
            return Ok(WindowDecision {
                allowed: false,
                current_count: 0,
                remaining: 0,
                reset_at: (now_ms + window_ms) / 1000,
            });
        }

        let member = format!("{}-{}", now_ms, Uuid::new_v4());
        let ttl = Duration::from_secs(limit.window_seconds as u64 + TTL_MARGIN_SECONDS);
        let reservation = self
            .store
            .window_reserve(
                &key.store_key(),
                now_ms - window_ms,
                now_ms,
                &member,
                limit.requests,
                ttl,
            )
            .await?;

        if reservation.accepted {
            Ok(WindowDecision {
                allowed: true,
                current_count: reservation.count,
                remaining: (limit.requests as u64).saturating_sub(reservation.count),
                reset_at: (now_ms + window_ms) / 1000,
            })
        } else {
            let oldest_ms = reservation.oldest_score_ms.unwrap_or(now_ms);
            Ok(WindowDecision {
                allowed: false,
                current_count: reservation.count,
                remaining: 0,
                reset_at: (oldest_ms + window_ms) / 1000,
            })
        }
    }

    /// Drop the window log for a key.
    pub async fn reset(&self, key: &RateLimitKey) -> Result<(), StoreError> {
        self.store.delete(&key.store_key()).await
    }
}
