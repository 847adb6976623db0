//! `/debug/pprof/*` (spec §6): Go's `net/http/pprof` has no idiomatic Rust
//! analogue reachable without a native profiler build step, so this is a
//! feature-gapped stub that returns 501 rather than silently dropping the
//! route — the IP allow-list test surface described in spec §6 still has
//! something to protect (SPEC_FULL §4.3).

use actix_web::{web, HttpResponse};

async fn not_implemented() -> HttpResponse {
    HttpResponse::NotImplemented().json(serde_json::json!({
        "error": {
            "code": "NOT_IMPLEMENTED",
            "message": "profiling endpoints are not available on this runtime"
        }
    }))
}

pub fn configure_debug(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/debug/pprof/{tail:.*}").route(web::get().to(not_implemented)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn pprof_route_returns_501() {
        let app = test::init_service(App::new().configure(configure_debug)).await;
        let req = test::TestRequest::get().uri("/debug/pprof/heap").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 501);
    }
}
