//! Tracing middleware: extracts W3C trace context, starts a server-kind
//! span, and injects trace context into the response (spec §4.2 "Tracing").

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::Error as ActixError;
use tracing::Instrument;
use uuid::Uuid;

use crate::middleware::TRACEPARENT_HEADER;

/// A minimal W3C `traceparent` representation: `version-trace_id-span_id-flags`.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub sampled: bool,
}

impl TraceContext {
    pub fn generate() -> Self {
        let span_uuid = Uuid::new_v4().simple().to_string();
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: span_uuid[..16].to_string(),
            sampled: true,
        }
    }

    pub fn parse(header: &str) -> Option<Self> {
        let parts: Vec<&str> = header.split('-').collect();
        if parts.len() != 4 || parts[0] != "00" {
            return None;
        }
        if parts[1].len() != 32 || parts[2].len() != 16 {
            return None;
        }
        let flags = u8::from_str_radix(parts[3], 16).ok()?;
        Some(Self {
            trace_id: parts[1].to_string(),
            span_id: parts[2].to_string(),
            sampled: flags & 0x01 == 1,
        })
    }

    pub fn to_header(&self) -> String {
        format!(
            "00-{}-{}-{:02x}",
            self.trace_id,
            self.span_id,
            if self.sampled { 1 } else { 0 }
        )
    }
}

pub struct Tracing;

impl<S, B> Transform<S, ServiceRequest> for Tracing
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = ActixError;
    type Transform = TracingMiddleware<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(TracingMiddleware { service }))
    }
}

pub struct TracingMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for TracingMiddleware<S>
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
        let trace_ctx = req
            .headers()
            .get(TRACEPARENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(TraceContext::parse)
            .unwrap_or_else(TraceContext::generate);

        let method = req.method().to_string();
        let target = req.path().to_string();
        let scheme = req.connection_info().scheme().to_string();
        let user_agent = req
            .headers()
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        let client_ip = req
            .connection_info()
            .peer_addr()
            .unwrap_or("unknown")
            .to_string();

        let span = tracing::info_span!(
            "http.server",
            otel.kind = "server",
            http.method = %method,
            http.target = %target,
            http.scheme = %scheme,
            http.user_agent = %user_agent,
            net.peer.ip = %client_ip,
            trace_id = %trace_ctx.trace_id,
            span_id = %trace_ctx.span_id,
            otel.name = tracing::field::Empty,
            http.status_code = tracing::field::Empty,
            otel.status_code = tracing::field::Empty,
            user_id = tracing::field::Empty,
            correlation_id = tracing::field::Empty,
        );

        req.extensions_mut().insert(trace_ctx.clone());

        // `self.service.call(req)` runs the rest of the middleware chain's
        // synchronous setup (it only constructs futures, but nested
        // middleware such as `LoggerEnrichment` calls
        // `tracing::Span::current()` during that synchronous construction,
        // before anything is ever polled). `Instrument::instrument` below
        // only makes the span current while the returned future is being
        // polled, so without entering it here first that synchronous setup
        // would run with no span current at all.
        let fut = {
            let _guard = span.enter();
            self.service.call(req)
        };
        let span_for_async = span.clone();

        Box::pin(
            async move {
                let mut resp = fut.await?;
                let status = resp.status().as_u16();
                let route = resp
                    .request()
                    .match_pattern()
                    .unwrap_or_else(|| resp.request().path().to_string());

                tracing::Span::current().record(
                    "otel.name",
                    tracing::field::display(format!("{method} {route}")),
                );
                tracing::Span::current().record("http.status_code", status);
                if status >= 500 {
                    tracing::Span::current().record("otel.status_code", "ERROR");
                }

                if let Ok(value) = HeaderValue::from_str(&trace_ctx.to_header()) {
                    resp.headers_mut()
                        .insert(HeaderName::from_static("traceparent"), value);
                }
                Ok(resp)
            }
            .instrument(span_for_async),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_traceparent() {
        let header = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        let ctx = TraceContext::parse(header).unwrap();
        assert_eq!(ctx.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.span_id, "00f067aa0ba902b7");
        assert!(ctx.sampled);
    }

    #[test]
    fn rejects_malformed_traceparent() {
        assert!(TraceContext::parse("not-a-traceparent").is_none());
    }

    #[test]
    fn roundtrips_to_header() {
        let ctx = TraceContext::generate();
        let rendered = ctx.to_header();
        let parsed = TraceContext::parse(&rendered).unwrap();
        assert_eq!(parsed.trace_id, ctx.trace_id);
        assert_eq!(parsed.span_id, ctx.span_id);
    }
}

/// End-to-end check that `LoggerEnrichment`'s `tracing::Span::current()` call
/// actually attaches to the `http.server` span this middleware opens, rather
/// than running with no span current (the bug fixed by entering the span
/// before calling into the rest of the chain).
#[cfg(test)]
mod span_attachment_tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use actix_web::{test, web, App, HttpResponse};
    use tracing_subscriber::layer::{Context as LayerContext, Layer};
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::Registry;

    use super::Tracing;
    use crate::middleware::logger_enrichment::LoggerEnrichment;
    use crate::middleware::request_logging::RequestLogging;
    use crate::middleware::CORRELATION_ID_HEADER;

    #[derive(Default, Clone)]
    struct Captured(Arc<Mutex<HashMap<String, String>>>);

    struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

    impl<'a> tracing::field::Visit for FieldVisitor<'a> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.0.insert(field.name().to_string(), format!("{value:?}"));
        }
    }

    struct CaptureLayer(Captured);

    impl<S> Layer<S> for CaptureLayer
    where
        S: tracing::Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
    {
        fn on_record(
            &self,
            _id: &tracing::span::Id,
            values: &tracing::span::Record<'_>,
            _ctx: LayerContext<'_, S>,
        ) {
            let mut map = self.0 .0.lock().unwrap();
            values.record(&mut FieldVisitor(&mut map));
        }
    }

    #[actix_web::test]
    async fn user_id_and_correlation_id_land_on_the_http_server_span() {
        let captured = Captured::default();
        let subscriber = Registry::default().with(CaptureLayer(captured.clone()));
        let _guard = tracing::subscriber::set_default(subscriber);

        // Outermost-first: RequestLogging assigns the correlation id onto the
        // request context, Tracing opens the span, LoggerEnrichment records
        // onto it — the same nesting `main.rs` composes in production.
        let app = test::init_service(
            App::new()
                .wrap(LoggerEnrichment)
                .wrap(Tracing)
                .wrap(RequestLogging)
                .route("/ping", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/ping")
            .insert_header((CORRELATION_ID_HEADER, "corr-span-test"))
            .to_request();
        let _resp = test::call_service(&app, req).await;

        let map = captured.0.lock().unwrap();
        assert_eq!(map.get("correlation_id").map(String::as_str), Some("corr-span-test"));
    }
}
