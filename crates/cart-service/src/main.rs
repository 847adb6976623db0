//! `cart-service` binary entry point: loads configuration, bootstraps the
//! shared runtime (`App::bootstrap`), builds the HTTP server with the full
//! middleware stack in the fixed composition order (spec §4.2), and runs
//! until a termination signal triggers the strict shutdown sequence
//! (spec §4.5).
//!
//! Grounded in the teacher's `crates/kairos-gateway/src/main.rs` startup
//! shape: load settings, build the app, bind, serve, await signal, shut down.

mod domain;
mod events;
mod repository;
mod routes;
mod service;

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App as ActixApp, HttpServer};
use prometheus::{Encoder, Registry, TextEncoder};

use runtime_core::config::RuntimeSettings;
use runtime_core::debug::configure_debug;
use runtime_core::health::configure_health;
use runtime_core::lifecycle::App;
use runtime_core::middleware::auth_context::AuthContext;
use runtime_core::middleware::content_type::ContentTypeGate;
use runtime_core::middleware::cors::Cors;
use runtime_core::middleware::ip_allowlist::{parse_cidrs, IpAllowList};
use runtime_core::middleware::logger_enrichment::LoggerEnrichment;
use runtime_core::middleware::metrics::PrometheusMetrics;
use runtime_core::middleware::recovery::Recovery;
use runtime_core::middleware::request_logging::RequestLogging;
use runtime_core::middleware::timeout::Timeout;
use runtime_core::middleware::tracing_mw::Tracing;

use repository::CartRepository;
use service::CartService;

const SERVICE_NAME: &str = "cart-service";
const HANDLER_TIMEOUT: Duration = Duration::from_secs(10);

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

async fn metrics_endpoint(registry: web::Data<Registry>) -> actix_web::HttpResponse {
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return actix_web::HttpResponse::InternalServerError().finish();
    }
    actix_web::HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let settings = RuntimeSettings::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("failed to load configuration: {e}");
        std::process::exit(1);
    });

    let metrics_registry = Registry::new();

    let mut app = App::bootstrap(
        SERVICE_NAME,
        &settings.postgres_url,
        settings.db_max_conns,
        &settings.kafka_brokers,
        settings.otel_exporter_endpoint.as_deref(),
        &MIGRATOR,
        &metrics_registry,
    )
    .await
    .unwrap_or_else(|e| {
        eprintln!("fatal startup error: {e}");
        std::process::exit(1);
    });

    let repository = Arc::new(CartRepository::new(app.pg_pool.clone()));
    let cart_service = Arc::new(CartService::new(repository, app.kafka_producer.clone()));
    let health_registry = app.health_registry.clone();
    let cors_config = settings.cors_config();
    let pprof_cidrs = parse_cidrs(&settings.pprof_allowed_cidrs);
    let http_port = settings.http_port;

    let metrics_registry_data = web::Data::new(metrics_registry);

    let server = HttpServer::new(move || {
        ActixApp::new()
            .app_data(web::Data::new(cart_service.clone()))
            .app_data(web::Data::new(health_registry.clone()))
            .app_data(metrics_registry_data.clone())
            // actix-web runs `.wrap()`-registered middleware in reverse
            // registration order (the last `.wrap()` call is outermost), so
            // this list is written innermost-first to produce the
            // outermost-first composition order: recovery, compression,
            // timeout, request logging, metrics, tracing, logger
            // enrichment, CORS (spec §4.2).
            .wrap(Cors::new(cors_config.clone()))
            .wrap(LoggerEnrichment)
            .wrap(Tracing)
            .wrap(PrometheusMetrics::new(SERVICE_NAME))
            .wrap(RequestLogging)
            .wrap(Timeout::new(HANDLER_TIMEOUT))
            .wrap(actix_web::middleware::Compress::default())
            .wrap(Recovery)
            .configure(routes::configure_cart_routes)
            .configure(configure_health)
            .service(
                web::scope("/debug")
                    .wrap(IpAllowList::new(pprof_cidrs.clone()))
                    .configure(configure_debug),
            )
            .route("/metrics", web::get().to(metrics_endpoint))
    })
    .bind(("0.0.0.0", http_port))?
    .run();

    app.set_server_handle(server.handle());
    let server_task = tokio::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
        result = server_task => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server task panicked");
            }
        }
    }

    let report = app.shutdown().await;
    if !report.is_clean() {
        tracing::warn!(errors = ?report.errors, "shutdown completed with errors");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use runtime_core::middleware::ip_allowlist::parse_cidrs;

    #[test]
    fn empty_pprof_allowlist_parses_to_no_cidrs() {
        let cidrs = parse_cidrs(&[]);
        assert!(cidrs.is_empty());
    }
}
