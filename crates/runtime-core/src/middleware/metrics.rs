//! Prometheus metrics middleware (spec §4.2 "Prometheus metrics").
//!
//! Increments an in-flight gauge for the service; on completion records a
//! request counter and duration histogram labeled by
//! `(service, method, route, status)`. The inner response body is passed
//! through unmodified rather than wrapped in a wrapper writer, so streaming
//! bodies (SSE) and WebSocket upgrades are unaffected — actix-web's
//! `MessageBody` already forwards flush/backpressure through the body
//! stream, unlike a buffering `io.Writer` shim, so there is no "not
//! supported" sentinel to implement on this side.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::Error as ActixError;
use once_cell::sync::Lazy;
use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};

static IN_FLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("http_requests_in_flight", "In-flight HTTP requests"),
        &["service"],
    )
    .expect("valid gauge opts")
});

static REQUEST_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "Total HTTP requests"),
        &["service", "method", "route", "status"],
    )
    .expect("valid counter opts")
});

static REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        ),
        &["service", "method", "route", "status"],
    )
    .expect("valid histogram opts")
});

pub fn register_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(IN_FLIGHT.clone()))?;
    registry.register(Box::new(REQUEST_TOTAL.clone()))?;
    registry.register(Box::new(REQUEST_DURATION.clone()))?;
    Ok(())
}

pub struct PrometheusMetrics {
    service_name: String,
}

impl PrometheusMetrics {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for PrometheusMetrics
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = ActixError;
    type Transform = PrometheusMetricsMiddleware<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(PrometheusMetricsMiddleware {
            service,
            service_name: self.service_name.clone(),
        }))
    }
}

pub struct PrometheusMetricsMiddleware<S> {
    service: S,
    service_name: String,
}

impl<S, B> Service<ServiceRequest> for PrometheusMetricsMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = ActixError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service_name = self.service_name.clone();
        let method = req.method().to_string();
        // actix's match_pattern() is only populated once routing completes;
        // read it from the response side instead of the request side.
        let started = Instant::now();

        IN_FLIGHT.with_label_values(&[&service_name]).inc();
        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            IN_FLIGHT.with_label_values(&[&service_name]).dec();

            match result {
                Ok(resp) => {
                    let route = resp
                        .request()
                        .match_pattern()
                        .unwrap_or_else(|| resp.request().path().to_string());
                    let status = resp.status().as_u16().to_string();
                    let elapsed = started.elapsed().as_secs_f64();

                    REQUEST_TOTAL
                        .with_label_values(&[&service_name, &method, &route, &status])
                        .inc();
                    REQUEST_DURATION
                        .with_label_values(&[&service_name, &method, &route, &status])
                        .observe(elapsed);

                    Ok(resp)
                }
                Err(e) => Err(e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpResponse};

    #[actix_web::test]
    async fn records_request_without_writeheader_as_status_200() {
        let app = test::init_service(
            App::new()
                .wrap(PrometheusMetrics::new("cart"))
                .route("/items", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;
        let req = test::TestRequest::get().uri("/items").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }
}
