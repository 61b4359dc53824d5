//! Heuristic DDoS pattern detection.
//!
//! Five boolean signals are evaluated per IP subject: request volume in
//! the trailing five-minute window, endpoint diversity under volume,
//! machine-uniform inter-request timing, suspicious or missing
//! user-agent, and known bot signatures. The suspicion score is the
//! fraction of signals present; crossing the detection threshold is
//! expected to result in a persisted block record and a security event
//! from the orchestrator.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::core::profiler::BehaviorProfiler;
use crate::models::{DdosAssessment, DdosPattern, DdosThresholds, RequestContext, Subject};
use crate::store::{BackingStore, StoreError};
use crate::utils::format_store_key;

const OBSERVATION_WINDOW_SECONDS: u64 = 300;
/// Fraction of the five signals that must be present.
const DETECTION_THRESHOLD: f64 = 0.6;
const SIGNAL_COUNT: f64 = 5.0;
/// Samples required before timing uniformity is judged.
const MIN_TIMING_SAMPLES: usize = 10;
/// Coefficient of variation below which timing counts as uniform.
const UNIFORM_CV_MAX: f64 = 0.2;

/// Substrings of client identifiers associated with scanners and
/// scripted traffic.
const BOT_SIGNATURES: &[&str] = &[
    "masscan",
    "nmap",
    "nikto",
    "sqlmap",
    "zgrab",
    "python-requests",
    "go-http-client",
    "libwww",
    "scrapy",
];

pub struct DdosDetector {
    store: Arc<dyn BackingStore>,
    thresholds: DdosThresholds,
}

impl DdosDetector {
    pub fn new(store: Arc<dyn BackingStore>, thresholds: DdosThresholds) -> Self {
        Self { store, thresholds }
    }

    fn requests_key(subject: &Subject) -> String {
        format_store_key("ddos:requests", &subject.storage_key())
    }

    fn endpoints_key(subject: &Subject) -> String {
        format_store_key("ddos:endpoints", &subject.storage_key())
    }

    /// Feed the observation counters for one check. Called for every
    /// check, including ones that end up denied; attack traffic is mostly
    /// denied traffic.
    pub async fn record_observation(
        &self,
        subject: &Subject,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.store
            .atomic_increment(
                &Self::requests_key(subject),
                Some(Duration::from_secs(OBSERVATION_WINDOW_SECONDS)),
            )
            .await?;

        let endpoints_key = Self::endpoints_key(subject);
        let now_ms = now.timestamp_millis();
        self.store
            .sorted_set_add(&endpoints_key, now_ms, endpoint)
            .await?;
        self.store
            .sorted_set_remove_range_by_score(
                &endpoints_key,
                0,
                now_ms - (OBSERVATION_WINDOW_SECONDS * 1000) as i64,
            )
            .await?;
        self.store
            .expire(
                &endpoints_key,
                Duration::from_secs(OBSERVATION_WINDOW_SECONDS + 60),
            )
            .await?;
        Ok(())
    }

    /// Evaluate the five signals against the stored counters, the recent
    /// timestamp history, and the request metadata.
    pub async fn analyze(
        &self,
        subject: &Subject,
        history: &[i64],
        ctx: &RequestContext,
    ) -> Result<DdosAssessment, StoreError> {
        let requests: u64 = self
            .store
            .get(&Self::requests_key(subject))
            .await?
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        let unique_endpoints = self
            .store
            .sorted_set_cardinality(&Self::endpoints_key(subject))
            .await?;

        let mut patterns = Vec::new();

        if requests >= self.thresholds.requests_per_5min as u64 {
            patterns.push(DdosPattern::HighFrequency);
        }

        if requests >= (self.thresholds.requests_per_5min / 2) as u64
            && unique_endpoints > 0
            && unique_endpoints <= self.thresholds.unique_endpoints_min as u64
        {
            patterns.push(DdosPattern::LowEndpointDiversity);
        }

        if history.len() >= MIN_TIMING_SAMPLES {
            if let Some(stats) = BehaviorProfiler::interval_stats(history) {
                if stats.mean_ms < self.thresholds.min_interval_ms as f64
                    && stats.cv <= UNIFORM_CV_MAX
                {
                    patterns.push(DdosPattern::UniformTiming);
                }
            }
        }

        let user_agent = ctx.user_agent.as_deref();
        if suspicious_user_agent(user_agent) {
            patterns.push(DdosPattern::SuspiciousUserAgent);
        }
        if matches_bot_signature(user_agent) {
            patterns.push(DdosPattern::KnownBotSignature);
        }

        let suspicion_score = patterns.len() as f64 / SIGNAL_COUNT;
        Ok(DdosAssessment {
            is_ddos: suspicion_score >= DETECTION_THRESHOLD,
            suspicion_score,
            patterns_detected: patterns,
        })
    }

    /// Clear the observation counters for a subject.
    pub async fn reset(&self, subject: &Subject) -> Result<(), StoreError> {
        self.store.delete(&Self::requests_key(subject)).await?;
        self.store.delete(&Self::endpoints_key(subject)).await?;
        Ok(())
    }
}

fn suspicious_user_agent(user_agent: Option<&str>) -> bool {
    match user_agent {
        None => true,
        Some(value) => {
            let value = value.trim();
            value.is_empty() || value.len() < 12
        }
    }
}

fn matches_bot_signature(user_agent: Option<&str>) -> bool {
    let Some(value) = user_agent else {
        return false;
    };
    let lower = value.to_lowercase();
    BOT_SIGNATURES.iter().any(|signature| lower.contains(signature))
}
