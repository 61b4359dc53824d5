//! Rate Guard
//!
//! Entry point for the rate guard service: loads configuration, connects
//! the backing store, installs the metrics recorder, and serves the
//! decision API.

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use log::info;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;

use rate_guard::api::{self, ApiState};
use rate_guard::audit::{AuditSink, StoreAuditSink};
use rate_guard::config::load_config;
use rate_guard::core::DecisionEngine;
use rate_guard::store::{BackingStore, RedisStore};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    info!("Starting rate guard engine...");

    let config = Arc::new(load_config().context("failed to load configuration")?);

    PrometheusBuilder::new()
        .install()
        .context("failed to install metrics recorder")?;

    let store: Arc<dyn BackingStore> = Arc::new(
        RedisStore::from_url(
            &config.redis.url,
            Duration::from_millis(config.redis.op_timeout_ms),
        )
        .context("failed to create Redis client")?,
    );
    let audit: Arc<dyn AuditSink> = Arc::new(StoreAuditSink::new(
        store.clone(),
        Duration::from_secs(config.audit.retention_seconds),
    ));
    let engine = Arc::new(DecisionEngine::new(config.clone(), store, audit));

    let state = web::Data::new(ApiState { engine });

    info!(
        "Listening on {}:{}",
        config.server.host, config.server.port
    );
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::config)
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    Ok(())
}
