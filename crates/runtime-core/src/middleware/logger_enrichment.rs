//! Request-scoped logger enrichment: attaches correlation id, user id, and
//! trace/span ids to the active span so every log emitted downstream
//! carries them automatically (spec §4.2 "Request-scoped logger
//! enrichment"). `tracing`'s span fields are the enriched "logger" handlers
//! read back via [`current_fields`]; there is no separate logger object to
//! store on context, since `tracing::Span::current()` already is that
//! channel.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::Error as ActixError;

use crate::context::RequestContext;
use crate::middleware::USER_ID_HEADER;

pub struct LoggerEnrichment;

impl<S, B> Transform<S, ServiceRequest> for LoggerEnrichment
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = ActixError;
    type Transform = LoggerEnrichmentMiddleware<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(LoggerEnrichmentMiddleware { service }))
    }
}

pub struct LoggerEnrichmentMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for LoggerEnrichmentMiddleware<S>
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
        // Context wins over the header per spec; a prior middleware may have
        // already stored an authenticated user id on the context.
        let header_user = req
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        {
            let mut extensions = req.extensions_mut();
            if let Some(ctx) = extensions.get_mut::<RequestContext>() {
                if ctx.user_id.is_none() {
                    ctx.user_id = header_user.clone();
                }
            }
        }

        let user_id = req
            .extensions()
            .get::<RequestContext>()
            .and_then(|c| c.user_id.clone())
            .or(header_user)
            .unwrap_or_else(|| "anonymous".to_string());
        let correlation_id = req
            .extensions()
            .get::<RequestContext>()
            .map(|c| c.correlation_id.clone())
            .unwrap_or_default();

        let span = tracing::Span::current();
        span.record("user_id", tracing::field::display(&user_id));
        span.record("correlation_id", tracing::field::display(&correlation_id));

        Box::pin(self.service.call(req))
    }
}
