//! HTTP endpoints for the rate guard engine.
//!
//! The engine itself exposes no user-facing surface; this thin layer
//! lets the protected service ask for decisions over HTTP and translates
//! denied decisions into `429 Too Many Requests` with a `Retry-After`
//! header.

use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::DecisionEngine;
use crate::models::{RequestContext, RiskLevel, Subject, SubjectKind};

pub struct ApiState {
    pub engine: Arc<DecisionEngine>,
}

/// API configuration function for Actix-web
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/health").route(web::get().to(health_check)))
            .service(web::resource("/check").route(web::post().to(check))),
    );
}

/// Health check endpoint response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Rate limit check request
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckRequest {
    pub subject_kind: SubjectKind,
    pub subject_value: String,
    pub endpoint: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub device_risk: Option<RiskLevel>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Rate limit check endpoint
pub async fn check(state: web::Data<ApiState>, req: web::Json<CheckRequest>) -> impl Responder {
    let req = req.into_inner();
    let subject = match Subject::new(req.subject_kind, req.subject_value) {
        Ok(subject) => subject,
        Err(err) => {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: err.to_string(),
            });
        }
    };
    let ctx = RequestContext {
        user_agent: req.user_agent,
        country_code: req.country_code,
        device_risk: req.device_risk,
    };

    let decision = state.engine.check(&subject, &req.endpoint, &ctx).await;
    if decision.allowed {
        HttpResponse::Ok().json(decision)
    } else {
        let mut response = HttpResponse::TooManyRequests();
        if let Some(retry_after) = decision.retry_after {
            response.insert_header(("Retry-After", retry_after.to_string()));
        }
        response.json(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::LogAuditSink;
    use crate::models::{Config, Decision, LimitConfig};
    use crate::store::MemoryStore;
    use actix_web::{test, App};

    fn state() -> web::Data<ApiState> {
        let mut config = Config::default();
        config.rate_limit.default_limits = LimitConfig {
            requests: 2,
            window_seconds: 60,
            burst: 2,
        };
        let engine = DecisionEngine::new(
            Arc::new(config),
            Arc::new(MemoryStore::new()),
            Arc::new(LogAuditSink),
        );
        web::Data::new(ApiState {
            engine: Arc::new(engine),
        })
    }

    fn check_request(value: &str) -> CheckRequest {
        CheckRequest {
            subject_kind: SubjectKind::User,
            subject_value: value.to_string(),
            endpoint: "/api/orders".to_string(),
            user_agent: None,
            country_code: None,
            device_risk: None,
        }
    }

    #[actix_web::test]
    async fn test_health_check() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        let req = test::TestRequest::get().uri("/api/v1/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_check_allows_then_limits() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/check")
            .set_json(check_request("alice"))
            .to_request();
        let decision: Decision = test::call_and_read_body_json(&app, req).await;
        assert!(decision.allowed);

        // Exhaust the small window; the denial carries a Retry-After header.
        let mut last = None;
        for _ in 0..10 {
            let req = test::TestRequest::post()
                .uri("/api/v1/check")
                .set_json(check_request("alice"))
                .to_request();
            let resp = test::call_service(&app, req).await;
            if resp.status() == actix_web::http::StatusCode::TOO_MANY_REQUESTS {
                last = Some(resp);
                break;
            }
        }
        let denied = last.expect("expected a 429 after exhausting the window");
        assert!(denied.headers().contains_key("retry-after"));
    }

    #[actix_web::test]
    async fn test_malformed_subject_is_rejected() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        let mut request = check_request("ok-user");
        request.subject_kind = SubjectKind::Ip;
        request.subject_value = "not-an-ip".to_string();
        let req = test::TestRequest::post()
            .uri("/api/v1/check")
            .set_json(request)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }
}
