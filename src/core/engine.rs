//! Decision orchestration.
//!
//! Sequences the leaf components into one pass/fail decision per check:
//! whitelist, block record, burst penalty, DDoS assessment (IP subjects),
//! quota (API-key subjects), and finally the sliding window, so that a
//! request failing an earlier check never consumes window capacity.
//! Profile updates and audit events run as spawned tasks off the hot
//! path. Store failures are converted to fail-open (or fail-closed,
//! per configuration) decisions and never surface as errors.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use metrics::increment_counter;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::AuditSink;
use crate::core::adaptive_limits::AdaptiveLimitResolver;
use crate::core::burst_guard::BurstProtectionGuard;
use crate::core::ddos_detector::DdosDetector;
use crate::core::profiler::BehaviorProfiler;
use crate::core::quota::QuotaManager;
use crate::core::sliding_window::SlidingWindowCounter;
use crate::models::{
    BlockRecord, Config, DdosAssessment, Decision, DenyReason, RateLimitKey, RequestContext,
    Subject, SubjectKind,
};
use crate::store::{BackingStore, StoreError};
use crate::utils;

const WHITELIST_KEY: &str = "whitelist";

/// The engine entry point. One instance is shared across all request
/// workers; all mutable state lives in the backing store.
pub struct DecisionEngine {
    config: Arc<Config>,
    store: Arc<dyn BackingStore>,
    audit: Arc<dyn AuditSink>,
    window: SlidingWindowCounter,
    profiler: Arc<BehaviorProfiler>,
    resolver: AdaptiveLimitResolver,
    ddos: DdosDetector,
    burst: BurstProtectionGuard,
    quota: QuotaManager,
}

impl DecisionEngine {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn BackingStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            window: SlidingWindowCounter::new(store.clone()),
            profiler: Arc::new(BehaviorProfiler::new(
                store.clone(),
                config.profiler.clone(),
            )),
            resolver: AdaptiveLimitResolver::new(config.clone()),
            ddos: DdosDetector::new(store.clone(), config.ddos_thresholds.clone()),
            burst: BurstProtectionGuard::new(store.clone(), config.burst.clone()),
            quota: QuotaManager::new(store.clone(), config.quota.clone()),
            config,
            store,
            audit,
        }
    }

    /// Decide whether one request may proceed. Always returns a decision;
    /// infrastructure failures degrade according to the failure policy.
    pub async fn check(
        &self,
        subject: &Subject,
        endpoint: &str,
        ctx: &RequestContext,
    ) -> Decision {
        let now = Utc::now();
        let decision = self.run_checks(subject, endpoint, ctx, now).await;
        self.finish(subject, endpoint, &decision, now);
        decision
    }

    async fn run_checks(
        &self,
        subject: &Subject,
        endpoint: &str,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Decision {
        let base = self.config.rate_limit.limit_for(endpoint);
        let now_secs = now.timestamp();

        let whitelisted = match self
            .store
            .set_contains(WHITELIST_KEY, &subject.storage_key())
            .await
        {
            Ok(member) => member,
            Err(err) => {
                warn!(
                    "whitelist lookup failed for {}: {}",
                    subject.storage_key(),
                    err
                );
                false
            }
        };
        if whitelisted {
            return Decision::allow(
                base.requests as u64,
                base.requests as u64,
                now_secs + base.window_seconds as i64,
            );
        }

        match self.read_block(subject, now).await {
            Ok(Some(block)) => {
                return Decision::deny(
                    DenyReason::IpBlocked,
                    base.requests as u64,
                    block.expires_at().timestamp(),
                    block.remaining_seconds(now).max(1),
                );
            }
            Ok(None) => {}
            Err(err) => {
                // Whitelist membership was not confirmed, so optionally
                // refuse to assume the block is absent for a short grace
                // window instead of following the global policy.
                if self.config.failure.block_read_fail_closed {
                    warn!(
                        "block record unreadable for {}; denying for grace window: {}",
                        subject.storage_key(),
                        err
                    );
                    let grace = self.config.failure.block_read_grace_seconds.max(1) as u64;
                    self.spawn_audit("block_read_degraded", audit_context(subject, endpoint));
                    return Decision::deny(
                        DenyReason::IpBlocked,
                        base.requests as u64,
                        now_secs + grace as i64,
                        grace,
                    );
                }
                return self.degraded(endpoint, "block_check", &err, now);
            }
        }

        // Attack counters are fed for every check; attack traffic is
        // mostly denied traffic.
        if subject.kind() == SubjectKind::Ip {
            if let Err(err) = self.ddos.record_observation(subject, endpoint, now).await {
                debug!(
                    "ddos observation skipped for {}: {}",
                    subject.storage_key(),
                    err
                );
            }
        }

        match self.burst.active(subject, now).await {
            Ok(Some(record)) => {
                return Decision::deny(
                    DenyReason::BurstProtection,
                    base.requests as u64,
                    record.expires_at().timestamp(),
                    record.remaining_seconds(now).max(1),
                );
            }
            Ok(None) => {}
            Err(err) => return self.degraded(endpoint, "burst_check", &err, now),
        }

        let history = match self.profiler.history(subject).await {
            Ok(history) => history,
            Err(err) => return self.degraded(endpoint, "history_read", &err, now),
        };

        let burst_eval = self.burst.evaluate(&history, now);
        if burst_eval.is_suspicious {
            match self.burst.apply(subject, &burst_eval, now).await {
                Ok(record) => {
                    info!(
                        "burst protection applied to {} for {}s ({})",
                        subject.storage_key(),
                        record.duration_seconds,
                        record.pattern
                    );
                    let mut context = audit_context(subject, endpoint);
                    context.insert("pattern".to_string(), json!(record.pattern));
                    context.insert(
                        "duration_seconds".to_string(),
                        json!(record.duration_seconds),
                    );
                    self.spawn_audit("burst_protection_applied", context);
                    return Decision::deny(
                        DenyReason::BurstProtection,
                        base.requests as u64,
                        record.expires_at().timestamp(),
                        record.duration_seconds as u64,
                    );
                }
                Err(err) => return self.degraded(endpoint, "burst_apply", &err, now),
            }
        }

        if subject.kind() == SubjectKind::Ip {
            match self.ddos.analyze(subject, &history, ctx).await {
                Ok(assessment) if assessment.is_ddos => {
                    if let Err(err) = self.apply_block(subject, &assessment, now).await {
                        warn!(
                            "failed to persist block record for {}: {}",
                            subject.storage_key(),
                            err
                        );
                    }
                    let mut context = audit_context(subject, endpoint);
                    context.insert(
                        "suspicion_score".to_string(),
                        json!(assessment.suspicion_score),
                    );
                    context.insert(
                        "patterns".to_string(),
                        json!(assessment
                            .patterns_detected
                            .iter()
                            .map(|p| p.as_str())
                            .collect::<Vec<_>>()),
                    );
                    self.spawn_audit("ddos_detected", context);
                    let duration = self.config.ddos_thresholds.block_seconds as u64;
                    return Decision::deny(
                        DenyReason::DdosDetected,
                        base.requests as u64,
                        now_secs + duration as i64,
                        duration,
                    );
                }
                Ok(_) => {}
                Err(err) => return self.degraded(endpoint, "ddos_check", &err, now),
            }
        }

        let profile = BehaviorProfiler::profile_from_history(&history, now);
        let limit = self.resolver.resolve(endpoint, &profile, ctx);

        if subject.kind() == SubjectKind::ApiKey {
            match self.quota.check_and_consume(subject, now).await {
                Ok(status) if !status.allowed => {
                    let reset = utils::next_period_start(now);
                    return Decision::deny(
                        DenyReason::QuotaExceeded,
                        status.limit,
                        reset.timestamp(),
                        (reset - now).num_seconds().max(1) as u64,
                    )
                    .with_current_requests(status.used);
                }
                Ok(_) => {}
                Err(err) => return self.degraded(endpoint, "quota_check", &err, now),
            }
        }

        // The window check runs last among denial paths, so a request
        // denied above never consumed window capacity.
        let key = RateLimitKey::new(subject.clone(), endpoint);
        match self.window.check(&key, &limit, now).await {
            Ok(outcome) if outcome.allowed => Decision::allow(
                limit.requests as u64,
                outcome.remaining,
                outcome.reset_at,
            )
            .with_current_requests(outcome.current_count),
            Ok(outcome) => Decision::deny(
                DenyReason::RateLimitExceeded,
                limit.requests as u64,
                outcome.reset_at,
                (outcome.reset_at - now_secs).max(1) as u64,
            )
            .with_current_requests(outcome.current_count),
            Err(err) => self.degraded(endpoint, "window_check", &err, now),
        }
    }

    async fn read_block(
        &self,
        subject: &Subject,
        now: DateTime<Utc>,
    ) -> Result<Option<BlockRecord>, StoreError> {
        match self.store.get(&Self::block_key(subject)).await? {
            Some(json) => Ok(serde_json::from_str::<BlockRecord>(&json)
                .ok()
                .filter(|record| record.is_active(now))),
            None => Ok(None),
        }
    }

    async fn apply_block(
        &self,
        subject: &Subject,
        assessment: &DdosAssessment,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let record = BlockRecord {
            reason: "ddos pattern detected".to_string(),
            patterns: assessment.patterns_detected.clone(),
            created_at: now,
            duration_seconds: self.config.ddos_thresholds.block_seconds,
        };
        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(err) => {
                warn!("block record serialization failed: {}", err);
                return Ok(());
            }
        };
        self.store
            .set(
                &Self::block_key(subject),
                &json,
                Some(Duration::from_secs(record.duration_seconds as u64)),
            )
            .await
    }

    fn block_key(subject: &Subject) -> String {
        utils::format_store_key("block", &subject.storage_key())
    }

    /// Convert a store failure into the configured degraded-mode decision.
    fn degraded(
        &self,
        endpoint: &str,
        stage: &'static str,
        err: &StoreError,
        now: DateTime<Utc>,
    ) -> Decision {
        let base = self.config.rate_limit.limit_for(endpoint);
        increment_counter!("rate_guard_store_degraded_total", "stage" => stage);
        let mut context = HashMap::new();
        context.insert("stage".to_string(), json!(stage));
        context.insert("error".to_string(), json!(err.to_string()));
        context.insert(
            "fail_open".to_string(),
            json!(self.config.failure.fail_open),
        );
        self.spawn_audit("store_degraded", context);

        if self.config.failure.fail_open {
            warn!(
                "backing store unavailable during {} ({}); failing open",
                stage, err
            );
            Decision::allow(
                base.requests as u64,
                base.requests as u64,
                now.timestamp() + base.window_seconds as i64,
            )
        } else {
            warn!(
                "backing store unavailable during {} ({}); failing closed",
                stage, err
            );
            let grace = self.config.failure.block_read_grace_seconds.max(1) as u64;
            Decision::deny(
                DenyReason::StoreUnavailable,
                base.requests as u64,
                now.timestamp() + grace as i64,
                grace,
            )
        }
    }

    /// Post-decision side effects: metrics, the fire-and-forget profile
    /// update, and the audit call on deny. Nothing here touches the
    /// latency of the returned decision.
    fn finish(&self, subject: &Subject, endpoint: &str, decision: &Decision, now: DateTime<Utc>) {
        if decision.allowed {
            increment_counter!("rate_guard_decisions_total", "outcome" => "allowed");
        } else {
            increment_counter!("rate_guard_decisions_total", "outcome" => "denied");
            if let Some(reason) = decision.reason {
                increment_counter!("rate_guard_denials_total", "reason" => reason.as_str());
            }
        }

        let profiler = self.profiler.clone();
        let update_subject = subject.clone();
        tokio::spawn(async move {
            if let Err(err) = profiler.record_request(&update_subject, now).await {
                debug!(
                    "profile history update failed for {}: {}",
                    update_subject.storage_key(),
                    err
                );
                return;
            }
            match profiler.analyze(&update_subject, now).await {
                Ok(profile) => {
                    if let Err(err) = profiler.persist(&update_subject, &profile).await {
                        debug!(
                            "profile snapshot persist failed for {}: {}",
                            update_subject.storage_key(),
                            err
                        );
                    }
                }
                Err(err) => debug!(
                    "profile recompute failed for {}: {}",
                    update_subject.storage_key(),
                    err
                ),
            }
        });

        if !decision.allowed {
            let mut context = audit_context(subject, endpoint);
            if let Some(reason) = decision.reason {
                context.insert("reason".to_string(), json!(reason.as_str()));
            }
            if let Some(retry_after) = decision.retry_after {
                context.insert("retry_after".to_string(), json!(retry_after));
            }
            self.spawn_audit("request_denied", context);
        }
    }

    fn spawn_audit(&self, event: &'static str, context: HashMap<String, serde_json::Value>) {
        let audit = self.audit.clone();
        tokio::spawn(async move {
            audit.log_event(event, context).await;
        });
    }

    /// Clear all limiter state for a subject and endpoint.
    pub async fn reset(&self, subject: &Subject, endpoint: &str) -> Result<(), StoreError> {
        self.window
            .reset(&RateLimitKey::new(subject.clone(), endpoint))
            .await?;
        self.ddos.reset(subject).await?;
        self.burst.clear(subject).await?;
        self.store.delete(&Self::block_key(subject)).await?;
        Ok(())
    }

    pub async fn add_to_whitelist(&self, subject: &Subject) -> Result<(), StoreError> {
        self.store
            .set_add(WHITELIST_KEY, &subject.storage_key())
            .await
    }
}

fn audit_context(subject: &Subject, endpoint: &str) -> HashMap<String, serde_json::Value> {
    let mut context = HashMap::new();
    context.insert("subject".to_string(), json!(subject.storage_key()));
    context.insert("endpoint".to_string(), json!(endpoint));
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LimitConfig;
    use crate::store::{MemoryStore, MockBackingStore};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingAuditSink {
        events: Mutex<Vec<String>>,
    }

    impl RecordingAuditSink {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AuditSink for RecordingAuditSink {
        async fn log_event(&self, event: &str, _context: HashMap<String, serde_json::Value>) {
            self.events.lock().unwrap().push(event.to_string());
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.rate_limit.default_limits = LimitConfig {
            requests: 3,
            window_seconds: 60,
            burst: 3,
        };
        config.ddos_thresholds.requests_per_5min = 100;
        config.burst.max_requests = 20;
        config
    }

    fn engine_with(
        config: Config,
        store: Arc<dyn BackingStore>,
    ) -> (DecisionEngine, Arc<RecordingAuditSink>) {
        let audit = Arc::new(RecordingAuditSink::new());
        let engine = DecisionEngine::new(Arc::new(config), store, audit.clone());
        (engine, audit)
    }

    fn timeout_err() -> StoreError {
        StoreError::Timeout(Duration::from_millis(5))
    }

    /// Mock store where every operation the engine may reach fails.
    fn unavailable_store() -> MockBackingStore {
        let mut store = MockBackingStore::new();
        store
            .expect_set_contains()
            .returning(|_, _| Err(timeout_err()));
        store.expect_get().returning(|_| Err(timeout_err()));
        store
            .expect_atomic_increment()
            .returning(|_, _| Err(timeout_err()));
        store
            .expect_sorted_set_add()
            .returning(|_, _, _| Err(timeout_err()));
        store
            .expect_sorted_set_remove_range_by_score()
            .returning(|_, _, _| Err(timeout_err()));
        store
            .expect_sorted_set_remove_range_by_rank()
            .returning(|_, _, _| Err(timeout_err()));
        store
            .expect_sorted_set_range_with_scores()
            .returning(|_, _, _| Err(timeout_err()));
        store
            .expect_sorted_set_cardinality()
            .returning(|_| Err(timeout_err()));
        store.expect_expire().returning(|_, _| Err(timeout_err()));
        store.expect_set().returning(|_, _, _| Err(timeout_err()));
        store
    }

    async fn drain_spawned_tasks() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn sustained_traffic_is_eventually_rate_limited() {
        let (engine, _) = engine_with(test_config(), Arc::new(MemoryStore::new()));
        let subject = Subject::user("alice").unwrap();
        let ctx = RequestContext::default();

        let first = engine.check(&subject, "/api/orders", &ctx).await;
        assert!(first.allowed);

        let mut denied = None;
        for _ in 0..30 {
            let decision = engine.check(&subject, "/api/orders", &ctx).await;
            if !decision.allowed {
                denied = Some(decision);
                break;
            }
        }
        let denied = denied.expect("sustained traffic should hit the window limit");
        assert_eq!(denied.reason, Some(DenyReason::RateLimitExceeded));
        assert!(denied.retry_after.unwrap_or(0) >= 1);
        assert!(denied.current_requests.unwrap_or(0) >= denied.limit);
    }

    #[tokio::test]
    async fn denials_emit_audit_events() {
        let (engine, audit) = engine_with(test_config(), Arc::new(MemoryStore::new()));
        let subject = Subject::user("audited").unwrap();
        let ctx = RequestContext::default();
        for _ in 0..30 {
            if !engine.check(&subject, "/api/orders", &ctx).await.allowed {
                break;
            }
        }
        drain_spawned_tasks().await;
        assert!(audit.events().contains(&"request_denied".to_string()));
    }

    #[tokio::test]
    async fn whitelisted_subjects_bypass_all_checks() {
        let (engine, _) = engine_with(test_config(), Arc::new(MemoryStore::new()));
        let subject = Subject::ip("203.0.113.50").unwrap();
        engine.add_to_whitelist(&subject).await.unwrap();

        let ctx = RequestContext::default();
        for _ in 0..20 {
            let decision = engine.check(&subject, "/api/orders", &ctx).await;
            assert!(decision.allowed);
            assert!(decision.reason.is_none());
        }
    }

    #[tokio::test]
    async fn burst_spike_triggers_penalty_then_short_circuits() {
        let store = Arc::new(MemoryStore::new());
        let (engine, audit) = engine_with(test_config(), store);
        let subject = Subject::user("bursty").unwrap();
        let now = Utc::now();

        // 50 requests inside two seconds, straight into the history log.
        for i in 0..50 {
            engine
                .profiler
                .record_request(&subject, now - chrono::Duration::milliseconds(2_000 - i * 40))
                .await
                .unwrap();
        }

        let decision = engine
            .check(&subject, "/api/orders", &RequestContext::default())
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::BurstProtection));
        assert!(decision.retry_after.unwrap_or(0) > 0);

        // The penalty record now takes precedence on its own.
        let repeat = engine
            .check(&subject, "/api/orders", &RequestContext::default())
            .await;
        assert!(!repeat.allowed);
        assert_eq!(repeat.reason, Some(DenyReason::BurstProtection));

        drain_spawned_tasks().await;
        assert!(audit
            .events()
            .contains(&"burst_protection_applied".to_string()));
    }

    #[tokio::test]
    async fn ddos_detection_blocks_and_persists_the_block() {
        let store = Arc::new(MemoryStore::new());
        let (engine, audit) = engine_with(test_config(), store.clone());
        let subject = Subject::ip("203.0.113.9").unwrap();

        // Heavy single-endpoint volume with machine-uniform timing, from a
        // scripted client. History is placed outside the burst window so
        // the burst guard does not fire first.
        store
            .set(&format!("ddos:requests:{}", subject.storage_key()), "150", None)
            .await
            .unwrap();
        let base = Utc::now() - chrono::Duration::seconds(60);
        for i in 0..20 {
            engine
                .profiler
                .record_request(&subject, base + chrono::Duration::milliseconds(i * 50))
                .await
                .unwrap();
        }
        let ctx = RequestContext {
            user_agent: Some("python-requests/2.31.0".to_string()),
            ..RequestContext::default()
        };

        let decision = engine.check(&subject, "/api/orders", &ctx).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::DdosDetected));

        // Subsequent checks hit the persisted block record first.
        let blocked = engine.check(&subject, "/api/orders", &ctx).await;
        assert!(!blocked.allowed);
        assert_eq!(blocked.reason, Some(DenyReason::IpBlocked));

        drain_spawned_tasks().await;
        assert!(audit.events().contains(&"ddos_detected".to_string()));
    }

    #[tokio::test]
    async fn exhausted_quota_denies_even_with_window_capacity() {
        let store = Arc::new(MemoryStore::new());
        let mut config = test_config();
        config.quota.monthly_limit = 100;
        let (engine, _) = engine_with(config, store.clone());
        let subject = Subject::api_key("key-1234567890").unwrap();
        let now = Utc::now();
        store
            .set(
                &format!("quota:{}:{}", subject.storage_key(), utils::period_key(now)),
                "100",
                None,
            )
            .await
            .unwrap();

        let decision = engine
            .check(&subject, "/api/orders", &RequestContext::default())
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::QuotaExceeded));
        assert_eq!(decision.current_requests, Some(100));
        // The sliding window was never touched.
        let window_key = RateLimitKey::new(subject.clone(), "/api/orders").store_key();
        assert_eq!(store.sorted_set_cardinality(&window_key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn store_failure_fails_open_by_default() {
        let (engine, audit) = engine_with(test_config(), Arc::new(unavailable_store()));
        let subject = Subject::ip("203.0.113.80").unwrap();

        let decision = engine
            .check(&subject, "/api/orders", &RequestContext::default())
            .await;
        assert!(decision.allowed);
        assert!(decision.reason.is_none());
        assert_eq!(decision.remaining, decision.limit);

        drain_spawned_tasks().await;
        assert!(audit.events().contains(&"store_degraded".to_string()));
    }

    #[tokio::test]
    async fn store_failure_fails_closed_when_configured() {
        let mut config = test_config();
        config.failure.fail_open = false;
        let (engine, _) = engine_with(config, Arc::new(unavailable_store()));
        let subject = Subject::ip("203.0.113.81").unwrap();

        let decision = engine
            .check(&subject, "/api/orders", &RequestContext::default())
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::StoreUnavailable));
    }

    #[tokio::test]
    async fn unreadable_block_record_can_deny_for_a_grace_window() {
        let mut config = test_config();
        config.failure.block_read_fail_closed = true;
        let mut store = MockBackingStore::new();
        // Whitelist resolves (not a member); the block record read fails.
        store.expect_set_contains().returning(|_, _| Ok(false));
        store.expect_get().returning(|_| Err(timeout_err()));
        store
            .expect_sorted_set_add()
            .returning(|_, _, _| Err(timeout_err()));
        store
            .expect_sorted_set_remove_range_by_rank()
            .returning(|_, _, _| Err(timeout_err()));
        store
            .expect_sorted_set_range_with_scores()
            .returning(|_, _, _| Err(timeout_err()));
        store.expect_expire().returning(|_, _| Err(timeout_err()));
        let (engine, _) = engine_with(config, Arc::new(store));
        let subject = Subject::ip("203.0.113.82").unwrap();

        let decision = engine
            .check(&subject, "/api/orders", &RequestContext::default())
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::IpBlocked));
        assert_eq!(decision.retry_after, Some(5));
    }

    #[tokio::test]
    async fn reset_clears_limiter_state() {
        let (engine, _) = engine_with(test_config(), Arc::new(MemoryStore::new()));
        let subject = Subject::user("resettable").unwrap();
        let ctx = RequestContext::default();

        for _ in 0..30 {
            if !engine.check(&subject, "/api/orders", &ctx).await.allowed {
                break;
            }
        }
        engine.reset(&subject, "/api/orders").await.unwrap();
        let decision = engine.check(&subject, "/api/orders", &ctx).await;
        assert!(decision.allowed);
    }
}
