//! Effective limit resolution.
//!
//! Combines the configured base limit for an endpoint with a trust-tier
//! multiplier, a behavior multiplier derived from the subject's profile,
//! and geography/device risk multipliers from the configured tables. The
//! combined multiplier is clamped so no subject is amplified or starved
//! without bound.

use std::sync::Arc;

use crate::models::{
    AdaptiveLimit, BehaviorProfile, Config, GeoRiskProfile, RequestContext, RequestPattern,
    RiskLevel, TrustMultipliers,
};

/// Bounds on the combined multiplier.
const MULTIPLIER_FLOOR: f64 = 0.1;
const MULTIPLIER_CEILING: f64 = 3.0;

pub struct AdaptiveLimitResolver {
    config: Arc<Config>,
}

impl AdaptiveLimitResolver {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Resolve the effective limit for one check. Computed fresh each call
    /// and never persisted.
    pub fn resolve(
        &self,
        endpoint: &str,
        profile: &BehaviorProfile,
        ctx: &RequestContext,
    ) -> AdaptiveLimit {
        let base = self.config.rate_limit.limit_for(endpoint);
        let combined = (trust_multiplier(&self.config.trust_level_multipliers, profile.trust_score)
            * behavior_multiplier(profile)
            * self.geo_multiplier(ctx)
            * self.device_multiplier(ctx))
        .clamp(MULTIPLIER_FLOOR, MULTIPLIER_CEILING);

        AdaptiveLimit {
            requests: scale(base.requests, combined),
            window_seconds: base.window_seconds,
            burst: scale(base.burst, combined),
            multiplier_applied: combined,
        }
    }

    fn geo_multiplier(&self, ctx: &RequestContext) -> f64 {
        match &ctx.country_code {
            Some(code) => self
                .config
                .geo_risk_profiles
                .get(&code.to_ascii_uppercase())
                .map(|profile| profile.multiplier)
                .unwrap_or_else(|| GeoRiskProfile::unknown().multiplier),
            None => 1.0,
        }
    }

    fn device_multiplier(&self, ctx: &RequestContext) -> f64 {
        let table = &self.config.device_risk_multipliers;
        match ctx.device_risk {
            Some(RiskLevel::Low) => table.low,
            Some(RiskLevel::Medium) => table.medium,
            Some(RiskLevel::High) => table.high,
            None => 1.0,
        }
    }
}

/// Monotonic step function from trust score to multiplier, clamped to the
/// same bounds as the combined multiplier.
pub fn trust_multiplier(tiers: &TrustMultipliers, trust_score: f64) -> f64 {
    let multiplier = if trust_score >= 0.9 {
        tiers.excellent
    } else if trust_score >= 0.7 {
        tiers.good
    } else if trust_score >= 0.5 {
        tiers.neutral
    } else if trust_score >= 0.3 {
        tiers.reduced
    } else {
        tiers.minimal
    };
    multiplier.clamp(MULTIPLIER_FLOOR, MULTIPLIER_CEILING)
}

/// Penalizes high anomaly and bursty cadence, mildly rewards consistency.
fn behavior_multiplier(profile: &BehaviorProfile) -> f64 {
    let anomaly_factor = if profile.anomaly_score > 0.8 {
        0.5
    } else if profile.anomaly_score > 0.6 {
        0.8
    } else {
        1.0
    };
    let pattern_factor = match profile.request_pattern {
        RequestPattern::Consistent => 1.1,
        RequestPattern::Bursty => 0.8,
        _ => 1.0,
    };
    anomaly_factor * pattern_factor
}

fn scale(base: u32, multiplier: f64) -> u32 {
    ((base as f64 * multiplier).round() as u32).max(1)
}
