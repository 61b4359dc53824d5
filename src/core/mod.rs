//! Core components of the rate guard engine.
//!
//! Leaf components (sliding window, profiler, limit resolver, detectors,
//! quota) are sequenced by the [`engine::DecisionEngine`] into a single
//! pass/fail decision per check.

pub mod adaptive_limits;
pub mod burst_guard;
pub mod ddos_detector;
pub mod engine;
pub mod profiler;
pub mod quota;
pub mod sliding_window;

pub use adaptive_limits::AdaptiveLimitResolver;
pub use burst_guard::BurstProtectionGuard;
pub use ddos_detector::DdosDetector;
pub use engine::DecisionEngine;
pub use profiler::BehaviorProfiler;
pub use quota::QuotaManager;
pub use sliding_window::SlidingWindowCounter;
