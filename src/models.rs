//! Data model for the rate guard engine.
//!
//! Holds the typed domain records (subjects, profiles, limits, decisions)
//! and the immutable configuration tree loaded once at startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;

/// Errors raised when a caller presents a malformed identifier.
///
/// These are caller-contract violations: they are rejected before any
/// store access and never converted into a rate-limit decision.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubjectError {
    #[error("subject value is empty")]
    Empty,
    #[error("subject value is malformed: {0}")]
    Malformed(String),
    #[error("invalid IP address: {0}")]
    InvalidIp(String),
    #[error("invalid API key: {0}")]
    InvalidApiKey(String),
}

/// The kind of identifier a check is performed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Ip,
    User,
    ApiKey,
    Device,
    Geo,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Ip => "ip",
            SubjectKind::User => "user",
            SubjectKind::ApiKey => "api_key",
            SubjectKind::Device => "device",
            SubjectKind::Geo => "geo",
        }
    }
}

/// A validated, tagged identifier. Immutable once constructed; every store
/// key for the subject is derived from [`Subject::storage_key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    kind: SubjectKind,
    value: String,
}

impl Subject {
    pub fn new(kind: SubjectKind, value: impl Into<String>) -> Result<Self, SubjectError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(SubjectError::Empty);
        }
        if trimmed.contains(|c: char| c.is_whitespace() || c == ':') {
            return Err(SubjectError::Malformed(trimmed.to_string()));
        }
        let normalized = match kind {
            SubjectKind::Ip => {
                trimmed
                    .parse::<IpAddr>()
                    .map_err(|_| SubjectError::InvalidIp(trimmed.to_string()))?;
                trimmed.to_string()
            }
            SubjectKind::ApiKey => {
                if trimmed.len() < 8 {
                    return Err(SubjectError::InvalidApiKey(trimmed.to_string()));
                }
                trimmed.to_string()
            }
            SubjectKind::Geo => {
                if trimmed.len() != 2 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Err(SubjectError::Malformed(trimmed.to_string()));
                }
                trimmed.to_ascii_uppercase()
            }
            _ => trimmed.to_string(),
        };
        Ok(Self {
            kind,
            value: normalized,
        })
    }

    pub fn ip(value: impl Into<String>) -> Result<Self, SubjectError> {
        Self::new(SubjectKind::Ip, value)
    }

    pub fn user(value: impl Into<String>) -> Result<Self, SubjectError> {
        Self::new(SubjectKind::User, value)
    }

    pub fn api_key(value: impl Into<String>) -> Result<Self, SubjectError> {
        Self::new(SubjectKind::ApiKey, value)
    }

    pub fn kind(&self) -> SubjectKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Store key fragment for this subject, e.g. `ip:203.0.113.9`.
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.value)
    }
}

/// A `(subject, endpoint)` pair. Many concurrent checks may target the
/// same key; the sliding window treats it as one shared log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub subject: Subject,
    pub endpoint: String,
}

impl RateLimitKey {
    pub fn new(subject: Subject, endpoint: impl Into<String>) -> Self {
        Self {
            subject,
            endpoint: endpoint.into(),
        }
    }

    pub fn store_key(&self) -> String {
        format!("window:{}:{}", self.subject.storage_key(), self.endpoint)
    }
}

/// Coarse classification of a subject's request cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPattern {
    Consistent,
    Irregular,
    Bursty,
    Unknown,
}

/// Per-subject derived state, recomputed on each check from the most
/// recent request history. Persisted as a TTL-backed snapshot only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorProfile {
    /// Mean gap between consecutive requests, in milliseconds.
    pub avg_interval_ms: f64,
    pub request_pattern: RequestPattern,
    /// Deviation against the subject's own baseline, in `[0, 1]`.
    pub anomaly_score: f64,
    /// How well-behaved the history looks, in `[0, 1]`.
    pub trust_score: f64,
    pub last_updated: DateTime<Utc>,
}

impl BehaviorProfile {
    /// Profile used when a subject has no usable history.
    pub fn neutral(now: DateTime<Utc>) -> Self {
        Self {
            avg_interval_ms: 0.0,
            request_pattern: RequestPattern::Unknown,
            anomaly_score: 0.5,
            trust_score: 0.5,
            last_updated: now,
        }
    }
}

/// The effective limit for one check. Never persisted; computed fresh
/// from configuration, profile, and context on every call.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveLimit {
    pub requests: u32,
    pub window_seconds: u32,
    pub burst: u32,
    pub multiplier_applied: f64,
}

/// Aggregate traffic signals that indicate attack-like behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DdosPattern {
    HighFrequency,
    LowEndpointDiversity,
    UniformTiming,
    SuspiciousUserAgent,
    KnownBotSignature,
}

impl DdosPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            DdosPattern::HighFrequency => "high_frequency",
            DdosPattern::LowEndpointDiversity => "low_endpoint_diversity",
            DdosPattern::UniformTiming => "uniform_timing",
            DdosPattern::SuspiciousUserAgent => "suspicious_user_agent",
            DdosPattern::KnownBotSignature => "known_bot_signature",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdosAssessment {
    pub is_ddos: bool,
    pub suspicion_score: f64,
    pub patterns_detected: Vec<DdosPattern>,
}

/// Outcome of evaluating a subject's recent cadence for a short spike.
#[derive(Debug, Clone, PartialEq)]
pub struct BurstAssessment {
    pub is_suspicious: bool,
    pub suspicion_score: f64,
    /// Penalty duration suggested on trigger, in seconds.
    pub suggested_delay_seconds: u32,
    /// Requests observed inside the burst window.
    pub window_requests: u32,
}

/// Persisted penalty state. While unexpired it takes precedence over all
/// other checks for its subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstProtectionRecord {
    pub applied_at: DateTime<Utc>,
    pub duration_seconds: u32,
    pub reason: String,
    pub pattern: String,
}

impl BurstProtectionRecord {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.applied_at + chrono::Duration::seconds(self.duration_seconds as i64)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() > now
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        (self.expires_at() - now).num_seconds().max(0) as u64
    }
}

/// Persisted block placed on a subject after DDoS detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    pub reason: String,
    pub patterns: Vec<DdosPattern>,
    pub created_at: DateTime<Utc>,
    pub duration_seconds: u32,
}

impl BlockRecord {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + chrono::Duration::seconds(self.duration_seconds as i64)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() > now
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        (self.expires_at() - now).num_seconds().max(0) as u64
    }
}

/// Quota accounting result for an API-key subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub allowed: bool,
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
}

/// Why a check was denied. Carried in [`Decision::reason`]; these are
/// normal outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    RateLimitExceeded,
    QuotaExceeded,
    BurstProtection,
    DdosDetected,
    IpBlocked,
    StoreUnavailable,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            DenyReason::QuotaExceeded => "QUOTA_EXCEEDED",
            DenyReason::BurstProtection => "BURST_PROTECTION",
            DenyReason::DdosDetected => "DDOS_DETECTED",
            DenyReason::IpBlocked => "IP_BLOCKED",
            DenyReason::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }
}

/// The only value returned to callers. Infrastructure failures are folded
/// into a fail-open (or fail-closed) decision before this is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch seconds at which the relevant window or penalty resets.
    pub reset_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_requests: Option<u64>,
}

impl Decision {
    pub fn allow(limit: u64, remaining: u64, reset_at: i64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            retry_after: None,
            reason: None,
            current_requests: None,
        }
    }

    pub fn deny(reason: DenyReason, limit: u64, reset_at: i64, retry_after: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            retry_after: Some(retry_after),
            reason: Some(reason),
            current_requests: None,
        }
    }

    pub fn with_current_requests(mut self, current: u64) -> Self {
        self.current_requests = Some(current);
        self
    }
}

/// Device or geography risk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Request metadata supplied by the caller alongside the subject.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user_agent: Option<String>,
    pub country_code: Option<String>,
    pub device_risk: Option<RiskLevel>,
}

/// A single endpoint's base limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Requests allowed per window.
    pub requests: u32,
    /// Window length in seconds.
    pub window_seconds: u32,
    /// Short-burst allowance on top of the sustained rate.
    pub burst: u32,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            window_seconds: 60,
            burst: 20,
        }
    }
}

/// Base limits: a global default plus per-endpoint overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub default_limits: LimitConfig,
    #[serde(default)]
    pub endpoint_limits: HashMap<String, LimitConfig>,
}

impl RateLimitSettings {
    pub fn limit_for(&self, endpoint: &str) -> &LimitConfig {
        self.endpoint_limits
            .get(endpoint)
            .unwrap_or(&self.default_limits)
    }
}

/// Step-function multipliers keyed by trust tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustMultipliers {
    /// trust >= 0.9
    pub excellent: f64,
    /// trust >= 0.7
    pub good: f64,
    /// trust >= 0.5
    pub neutral: f64,
    /// trust >= 0.3
    pub reduced: f64,
    /// everything below
    pub minimal: f64,
}

impl Default for TrustMultipliers {
    fn default() -> Self {
        Self {
            excellent: 2.0,
            good: 1.5,
            neutral: 1.0,
            reduced: 0.7,
            minimal: 0.3,
        }
    }
}

/// DDoS detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdosThresholds {
    /// Requests in the trailing five-minute window that count as high volume.
    pub requests_per_5min: u32,
    /// At or below this many distinct endpoints, volume counts as low-diversity.
    pub unique_endpoints_min: u32,
    /// Mean inter-request gap below this counts as machine-uniform timing.
    pub min_interval_ms: u64,
    /// TTL of the block record persisted on detection.
    pub block_seconds: u32,
}

impl Default for DdosThresholds {
    fn default() -> Self {
        Self {
            requests_per_5min: 300,
            unique_endpoints_min: 3,
            min_interval_ms: 100,
            block_seconds: 600,
        }
    }
}

/// Burst guard tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstConfig {
    /// Spike detection window, much shorter than the sliding window.
    pub window_seconds: u32,
    /// Requests inside the spike window before the guard triggers.
    pub max_requests: u32,
    /// Penalty duration scale multiplied by the suspicion score.
    pub penalty_scale_seconds: u32,
    /// Hard cap on any single penalty.
    pub max_penalty_seconds: u32,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            window_seconds: 10,
            max_requests: 30,
            penalty_scale_seconds: 300,
            max_penalty_seconds: 600,
        }
    }
}

/// Periodic allowance configuration for API-key subjects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub monthly_limit: u64,
    /// Per-key overrides, keyed by the raw API key value.
    #[serde(default)]
    pub overrides: HashMap<String, u64>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            monthly_limit: 100_000,
            overrides: HashMap::new(),
        }
    }
}

/// Risk entry for one country.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoRiskProfile {
    pub risk_level: RiskLevel,
    pub multiplier: f64,
}

impl GeoRiskProfile {
    /// Conservative entry applied to countries with no configured profile.
    pub fn unknown() -> Self {
        Self {
            risk_level: RiskLevel::Medium,
            multiplier: 0.8,
        }
    }
}

/// Multipliers applied per device risk tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRiskMultipliers {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for DeviceRiskMultipliers {
    fn default() -> Self {
        Self {
            low: 1.0,
            medium: 0.8,
            high: 0.5,
        }
    }
}

/// How the engine behaves when the backing store is unreachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePolicy {
    /// Allow requests when the store is unavailable. Deployments protecting
    /// highly sensitive endpoints can flip this to fail closed.
    pub fail_open: bool,
    /// Deny for a short grace period when a block record cannot be read and
    /// whitelist membership was not confirmed this request.
    pub block_read_fail_closed: bool,
    pub block_read_grace_seconds: u32,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            fail_open: true,
            block_read_fail_closed: false,
            block_read_grace_seconds: 5,
        }
    }
}

/// Behavior profiler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilerConfig {
    /// Bounded history length per subject.
    pub history_size: usize,
    pub history_ttl_seconds: u64,
    pub profile_ttl_seconds: u64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            history_size: 100,
            history_ttl_seconds: 3600,
            profile_ttl_seconds: 3600,
        }
    }
}

/// Audit sink tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Retention for store-persisted security events.
    pub retention_seconds: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_seconds: 7 * 24 * 3600,
        }
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Redis connection pool size
    pub pool_size: u32,
    /// Per-operation timeout; the engine fails open past it.
    pub op_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 10,
            op_timeout_ms: 20,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

fn default_geo_risk_profiles() -> HashMap<String, GeoRiskProfile> {
    let mut profiles = HashMap::new();
    for code in ["US", "CA", "GB", "DE", "FR", "JP", "AU"] {
        profiles.insert(
            code.to_string(),
            GeoRiskProfile {
                risk_level: RiskLevel::Low,
                multiplier: 1.0,
            },
        );
    }
    for code in ["BR", "IN", "MX"] {
        profiles.insert(
            code.to_string(),
            GeoRiskProfile {
                risk_level: RiskLevel::Medium,
                multiplier: 0.8,
            },
        );
    }
    profiles
}

/// Application configuration, loaded once and shared immutably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub trust_level_multipliers: TrustMultipliers,
    #[serde(default)]
    pub ddos_thresholds: DdosThresholds,
    #[serde(default)]
    pub burst: BurstConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default = "default_geo_risk_profiles")]
    pub geo_risk_profiles: HashMap<String, GeoRiskProfile>,
    #[serde(default)]
    pub device_risk_multipliers: DeviceRiskMultipliers,
    #[serde(default)]
    pub failure: FailurePolicy,
    #[serde(default)]
    pub profiler: ProfilerConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            redis: RedisConfig::default(),
            rate_limit: RateLimitSettings::default(),
            trust_level_multipliers: TrustMultipliers::default(),
            ddos_thresholds: DdosThresholds::default(),
            burst: BurstConfig::default(),
            quota: QuotaConfig::default(),
            geo_risk_profiles: default_geo_risk_profiles(),
            device_risk_multipliers: DeviceRiskMultipliers::default(),
            failure: FailurePolicy::default(),
            profiler: ProfilerConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}
