//! `/health/live` and `/health/ready` route handlers (spec §4.3, §8 E6).

use actix_web::{web, HttpResponse};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::registry::{HealthRegistry, ProbeOutcome};

#[derive(Serialize)]
struct CheckView {
    status: &'static str,
    critical: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ReadinessView {
    status: &'static str,
    checks: HashMap<String, CheckView>,
}

async fn live() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "up",
        "git_commit": crate::build_info::git_commit(),
        "build_time": crate::build_info::build_time(),
        "runtime_version": crate::build_info::runtime_version(),
    }))
}

async fn ready(registry: web::Data<Arc<HealthRegistry>>) -> HttpResponse {
    let report = registry.readiness().await;
    let checks = report
        .checks
        .into_iter()
        .map(|(name, (outcome, criticality))| {
            let view = match outcome {
                ProbeOutcome::Up => CheckView {
                    status: "up",
                    critical: matches!(criticality, super::registry::Criticality::Critical),
                    error: None,
                },
                ProbeOutcome::Down(err) => CheckView {
                    status: "down",
                    critical: matches!(criticality, super::registry::Criticality::Critical),
                    error: Some(err),
                },
            };
            (name, view)
        })
        .collect();

    let body = ReadinessView {
        status: report.status.as_str(),
        checks,
    };

    HttpResponse::build(
        actix_web::http::StatusCode::from_u16(report.status.http_status())
            .unwrap_or(actix_web::http::StatusCode::OK),
    )
    .json(body)
}

/// Registers `/health/live` and `/health/ready` on the given scope/config.
pub fn configure_health(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health/live").route(web::get().to(live)))
        .service(web::resource("/health/ready").route(web::get().to(ready)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::registry::Criticality;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn live_always_returns_200() {
        let app = test::init_service(App::new().configure(configure_health)).await;
        let req = test::TestRequest::get().uri("/health/live").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }

    #[actix_web::test]
    async fn ready_reports_degraded_for_non_critical_failure() {
        let registry = Arc::new(HealthRegistry::new());
        registry
            .register("postgres", Criticality::Critical, || async { Ok(()) })
            .await;
        registry
            .register("kafka", Criticality::NonCritical, || async {
                Err("broker unreachable".to_string())
            })
            .await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(registry))
                .configure(configure_health),
        )
        .await;
        let req = test::TestRequest::get().uri("/health/ready").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["checks"]["kafka"]["status"], "down");
        assert_eq!(body["checks"]["kafka"]["critical"], false);
    }

    #[actix_web::test]
    async fn ready_reports_down_503_for_critical_failure() {
        let registry = Arc::new(HealthRegistry::new());
        registry
            .register("postgres", Criticality::Critical, || async {
                Err("connection refused".to_string())
            })
            .await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(registry))
                .configure(configure_health),
        )
        .await;
        let req = test::TestRequest::get().uri("/health/ready").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 503);
    }
}
