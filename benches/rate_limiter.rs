use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use rate_guard::audit::LogAuditSink;
use rate_guard::core::{DecisionEngine, SlidingWindowCounter};
use rate_guard::models::{AdaptiveLimit, Config, RateLimitKey, RequestContext, Subject};
use rate_guard::store::MemoryStore;

fn window_counter_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let counter = SlidingWindowCounter::new(Arc::new(MemoryStore::new()));
    let key = RateLimitKey::new(Subject::user("bench").unwrap(), "/api/orders");
    let limit = AdaptiveLimit {
        requests: u32::MAX,
        window_seconds: 60,
        burst: 100,
        multiplier_applied: 1.0,
    };

    c.bench_function("sliding_window_check", |b| {
        b.iter(|| {
            let decision = runtime
                .block_on(counter.check(&key, &limit, chrono::Utc::now()))
                .unwrap();
            black_box(decision.allowed)
        })
    });
}

fn engine_decision_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut config = Config::default();
    config.rate_limit.default_limits.requests = u32::MAX;
    // Keep the guards out of the way so the full window path is measured.
    config.burst.max_requests = u32::MAX;
    let engine = DecisionEngine::new(
        Arc::new(config),
        Arc::new(MemoryStore::new()),
        Arc::new(LogAuditSink),
    );
    let subject = Subject::user("bench").unwrap();
    let ctx = RequestContext::default();

    c.bench_function("engine_check", |b| {
        b.iter(|| {
            let decision = runtime.block_on(engine.check(&subject, "/api/orders", &ctx));
            black_box(decision.allowed)
        })
    });
}

criterion_group!(benches, window_counter_benchmark, engine_decision_benchmark);
criterion_main!(benches);
