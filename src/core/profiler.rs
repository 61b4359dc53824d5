//! Behavior profiling from recent request history.
//!
//! The profiler keeps a bounded per-subject log of request timestamps and
//! derives a [`BehaviorProfile`] from it on each check: mean interval,
//! a coarse cadence classification from interval variance, an anomaly
//! score from deviation against the subject's own baseline, and a trust
//! score that rewards long, consistent, low-anomaly histories. The
//! profile only adjusts future multipliers, so recomputation and
//! persistence are allowed to lag behind the counters.

use chrono::{DateTime, Utc};
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{BehaviorProfile, ProfilerConfig, RequestPattern, Subject};
use crate::store::{BackingStore, StoreError};
use crate::utils::format_store_key;

/// Gaps below this count as machine-fast when scoring anomalies.
const FAST_INTERVAL_MS: f64 = 100.0;
/// Records needed before the statistics are trusted over the neutral default.
const MIN_HISTORY: usize = 3;
/// Intervals needed before baseline drift is measured.
const MIN_BASELINE_INTERVALS: usize = 8;

/// Mean, spread, and coefficient of variation of inter-request gaps.
#[derive(Debug, Clone, Copy)]
pub struct IntervalStats {
    pub mean_ms: f64,
    pub std_dev_ms: f64,
    pub cv: f64,
}

pub struct BehaviorProfiler {
    store: Arc<dyn BackingStore>,
    config: ProfilerConfig,
}

impl BehaviorProfiler {
    pub fn new(store: Arc<dyn BackingStore>, config: ProfilerConfig) -> Self {
        Self { store, config }
    }

    fn history_key(subject: &Subject) -> String {
        format_store_key("history", &subject.storage_key())
    }

    fn profile_key(subject: &Subject) -> String {
        format_store_key("profile", &subject.storage_key())
    }

    /// Most recent request timestamps (epoch ms, ascending), bounded by the
    /// configured history size.
    pub async fn history(&self, subject: &Subject) -> Result<Vec<i64>, StoreError> {
        let entries = self
            .store
            .sorted_set_range_with_scores(
                &Self::history_key(subject),
                -(self.config.history_size as isize),
                -1,
            )
            .await?;
        Ok(entries.into_iter().map(|(_, score)| score).collect())
    }

    /// Recompute the profile from the stored history.
    pub async fn analyze(
        &self,
        subject: &Subject,
        now: DateTime<Utc>,
    ) -> Result<BehaviorProfile, StoreError> {
        let history = self.history(subject).await?;
        Ok(Self::profile_from_history(&history, now))
    }

    /// Append a request to the subject's history and trim it to the bound.
    pub async fn record_request(
        &self,
        subject: &Subject,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let key = Self::history_key(subject);
        let now_ms = now.timestamp_millis();
        let member = format!("{}-{}", now_ms, Uuid::new_v4());
        self.store.sorted_set_add(&key, now_ms, &member).await?;
        let keep = self.config.history_size as isize;
        self.store
            .sorted_set_remove_range_by_rank(&key, 0, -keep - 1)
            .await?;
        self.store
            .expire(&key, Duration::from_secs(self.config.history_ttl_seconds))
            .await?;
        Ok(())
    }

    /// Persist a TTL-backed snapshot of the profile for observability.
    pub async fn persist(
        &self,
        subject: &Subject,
        profile: &BehaviorProfile,
    ) -> Result<(), StoreError> {
        let json = match serde_json::to_string(profile) {
            Ok(json) => json,
            Err(err) => {
                debug!("profile snapshot serialization failed: {}", err);
                return Ok(());
            }
        };
        self.store
            .set(
                &Self::profile_key(subject),
                &json,
                Some(Duration::from_secs(self.config.profile_ttl_seconds)),
            )
            .await
    }

    /// Interval statistics over a timestamp history, or `None` when there
    /// are not enough points to form an interval.
    pub fn interval_stats(timestamps_ms: &[i64]) -> Option<IntervalStats> {
        if timestamps_ms.len() < 2 {
            return None;
        }
        let intervals: Vec<f64> = timestamps_ms
            .windows(2)
            .map(|w| (w[1] - w[0]).max(0) as f64)
            .collect();
        let mean_ms = mean(&intervals);
        let std_dev_ms = std_dev(&intervals, mean_ms);
        Some(IntervalStats {
            mean_ms,
            std_dev_ms,
            cv: std_dev_ms / mean_ms.max(1.0),
        })
    }

    /// Pure profile computation over a timestamp history.
    pub fn profile_from_history(timestamps_ms: &[i64], now: DateTime<Utc>) -> BehaviorProfile {
        if timestamps_ms.len() < MIN_HISTORY {
            return BehaviorProfile::neutral(now);
        }
        let intervals: Vec<f64> = timestamps_ms
            .windows(2)
            .map(|w| (w[1] - w[0]).max(0) as f64)
            .collect();
        let interval_mean = mean(&intervals);
        let cv = std_dev(&intervals, interval_mean) / interval_mean.max(1.0);

        let request_pattern = if cv <= 0.5 {
            RequestPattern::Consistent
        } else if cv <= 1.5 {
            RequestPattern::Irregular
        } else {
            RequestPattern::Bursty
        };

        let fast_fraction = intervals
            .iter()
            .filter(|&&interval| interval < FAST_INTERVAL_MS)
            .count() as f64
            / intervals.len() as f64;

        // Drift of the most recent quarter of intervals against the rest
        // of the subject's own history.
        let drift = if intervals.len() >= MIN_BASELINE_INTERVALS {
            let recent_len = (intervals.len() / 4).max(2);
            let (baseline, recent) = intervals.split_at(intervals.len() - recent_len);
            let baseline_mean = mean(baseline);
            let z = (mean(recent) - baseline_mean).abs() / (std_dev(baseline, baseline_mean) + 1.0);
            z / (z + 1.0)
        } else {
            0.5
        };
        let anomaly_score = (0.6 * drift + 0.4 * fast_fraction).clamp(0.0, 1.0);

        let longevity = (timestamps_ms.len() as f64 / 100.0).min(1.0) * 0.3;
        let pattern_adjustment = match request_pattern {
            RequestPattern::Consistent => 0.15,
            RequestPattern::Bursty => -0.15,
            _ => 0.0,
        };
        let trust_score = (0.5 + longevity + pattern_adjustment - 0.4 * anomaly_score).clamp(0.0, 1.0);

        BehaviorProfile {
            avg_interval_ms: interval_mean,
            request_pattern,
            anomaly_score,
            trust_score,
            last_updated: now,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn stamps(intervals_ms: &[i64]) -> Vec<i64> {
        let mut out = vec![1_000_000];
        for interval in intervals_ms {
            out.push(out.last().unwrap() + interval);
        }
        out
    }

    #[test]
    fn short_history_yields_neutral_profile() {
        let profile = BehaviorProfiler::profile_from_history(&[1_000, 2_000], Utc::now());
        assert_eq!(profile.request_pattern, RequestPattern::Unknown);
        assert_eq!(profile.trust_score, 0.5);
        assert_eq!(profile.anomaly_score, 0.5);
    }

    #[test]
    fn steady_cadence_classifies_consistent_and_builds_trust() {
        let history = stamps(&[1_000; 19]);
        let profile = BehaviorProfiler::profile_from_history(&history, Utc::now());
        assert_eq!(profile.request_pattern, RequestPattern::Consistent);
        assert!((profile.avg_interval_ms - 1_000.0).abs() < f64::EPSILON);
        // No drift, no fast intervals: anomaly stays low.
        assert!(profile.anomaly_score < 0.1);
        assert!(profile.trust_score >= 0.7);
    }

    #[test]
    fn clustered_spikes_classify_bursty() {
        let history = stamps(&[10, 10, 10, 10, 30_000, 10, 10, 10, 30_000, 10, 10]);
        let profile = BehaviorProfiler::profile_from_history(&history, Utc::now());
        assert_eq!(profile.request_pattern, RequestPattern::Bursty);
        assert!(profile.trust_score < 0.5);
    }

    #[test]
    fn sudden_acceleration_raises_anomaly_over_steady_baseline() {
        let steady = stamps(&[1_000; 19]);
        let mut accelerated_intervals = vec![1_000; 15];
        accelerated_intervals.extend_from_slice(&[40, 40, 40, 40]);
        let accelerated = stamps(&accelerated_intervals);

        let steady_profile = BehaviorProfiler::profile_from_history(&steady, Utc::now());
        let accelerated_profile =
            BehaviorProfiler::profile_from_history(&accelerated, Utc::now());
        assert!(accelerated_profile.anomaly_score > steady_profile.anomaly_score);
        assert!(accelerated_profile.trust_score < steady_profile.trust_score);
    }

    #[test]
    fn longer_history_earns_more_trust() {
        let short = stamps(&[1_000; 9]);
        let long = stamps(&[1_000; 90]);
        let short_profile = BehaviorProfiler::profile_from_history(&short, Utc::now());
        let long_profile = BehaviorProfiler::profile_from_history(&long, Utc::now());
        assert!(long_profile.trust_score > short_profile.trust_score);
    }

    #[test]
    fn interval_stats_need_two_points() {
        assert!(BehaviorProfiler::interval_stats(&[]).is_none());
        assert!(BehaviorProfiler::interval_stats(&[1_000]).is_none());
        let stats = BehaviorProfiler::interval_stats(&stamps(&[50; 10])).unwrap();
        assert!((stats.mean_ms - 50.0).abs() < f64::EPSILON);
        assert!(stats.cv < 0.01);
    }

    #[tokio::test]
    async fn history_is_trimmed_to_the_configured_bound() {
        let store = Arc::new(MemoryStore::new());
        let profiler = BehaviorProfiler::new(
            store.clone(),
            ProfilerConfig {
                history_size: 5,
                ..ProfilerConfig::default()
            },
        );
        let subject = Subject::user("alice").unwrap();
        let base = Utc::now();
        for i in 0..8 {
            profiler
                .record_request(&subject, base + chrono::Duration::seconds(i))
                .await
                .unwrap();
        }
        let history = profiler.history(&subject).await.unwrap();
        assert_eq!(history.len(), 5);
        // Oldest entries were trimmed, not the newest.
        assert_eq!(history[0], (base + chrono::Duration::seconds(3)).timestamp_millis());
    }

    #[tokio::test]
    async fn analyze_round_trips_through_the_store() {
        let store = Arc::new(MemoryStore::new());
        let profiler = BehaviorProfiler::new(store.clone(), ProfilerConfig::default());
        let subject = Subject::user("bob").unwrap();
        let base = Utc::now();
        for i in 0..10 {
            profiler
                .record_request(&subject, base + chrono::Duration::seconds(i))
                .await
                .unwrap();
        }
        let profile = profiler.analyze(&subject, base).await.unwrap();
        assert_eq!(profile.request_pattern, RequestPattern::Consistent);
        profiler.persist(&subject, &profile).await.unwrap();
        assert!(store
            .get(&BehaviorProfiler::profile_key(&subject))
            .await
            .unwrap()
            .is_some());
    }
}
