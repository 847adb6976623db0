//! Request-logging middleware: assigns/propagates the correlation id and
//! emits one structured log line per request (spec §4.2 "Request logging").

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{Error as ActixError, HttpMessage};

use crate::context::{generate_correlation_id, RequestContext};
use crate::middleware::CORRELATION_ID_HEADER;

pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = ActixError;
    type Transform = RequestLoggingMiddleware<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequestLoggingMiddleware { service }))
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
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
        let correlation_id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
            .unwrap_or_else(generate_correlation_id);

        req.extensions_mut()
            .insert(RequestContext::new(correlation_id.clone()));

        let method = req.method().to_string();
        let path = req.path().to_string();
        let remote_addr = req
            .connection_info()
            .peer_addr()
            .unwrap_or("unknown")
            .to_string();
        let user_agent = req
            .headers()
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        let started = Instant::now();
        let fut = self.service.call(req);

        Box::pin(async move {
            let mut resp = fut.await?;
            let status = resp.status().as_u16();
            let duration = started.elapsed();
            let bytes_written = match resp.response().body().size() {
                actix_web::body::BodySize::Sized(n) => n,
                _ => 0,
            };

            tracing::info!(
                method = %method,
                path = %path,
                status,
                duration_ms = duration.as_millis() as u64,
                bytes_written,
                remote_addr = %remote_addr,
                user_agent = %user_agent,
                correlation_id = %correlation_id,
                "request completed"
            );

            if let Ok(value) = HeaderValue::from_str(&correlation_id) {
                resp.headers_mut()
                    .insert(HeaderName::from_static("x-correlation-id"), value);
            }
            Ok(resp)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpResponse};

    #[actix_web::test]
    async fn generates_correlation_id_when_absent_and_echoes_on_response() {
        let app = test::init_service(
            App::new()
                .wrap(RequestLogging)
                .route("/x", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;
        let req = test::TestRequest::get().uri("/x").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.headers().contains_key("x-correlation-id"));
    }

    #[actix_web::test]
    async fn echoes_inbound_correlation_id_unchanged() {
        let app = test::init_service(
            App::new()
                .wrap(RequestLogging)
                .route("/x", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;
        let req = test::TestRequest::get()
            .uri("/x")
            .insert_header((CORRELATION_ID_HEADER, "fixed-id-123"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(
            resp.headers().get("x-correlation-id").unwrap(),
            "fixed-id-123"
        );
    }
}
