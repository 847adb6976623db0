//! Content-type gate (route-level, spec §4.2): rejects 415 for requests
//! with a body or a mutating method whose `Content-Type` is non-empty and
//! not `application/json*`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::Method;
use actix_web::Error as ActixError;

pub struct ContentTypeGate;

fn is_mutating(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

impl<S, B> Transform<S, ServiceRequest> for ContentTypeGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = ActixError;
    type Transform = ContentTypeGateMiddleware<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(ContentTypeGateMiddleware { service }))
    }
}

pub struct ContentTypeGateMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for ContentTypeGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = ActixError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let has_body = req
            .headers()
            .get("Content-Length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|n| n > 0)
            .unwrap_or(false);

        let rejected = if has_body || is_mutating(req.method()) {
            req.headers()
                .get("Content-Type")
                .and_then(|v| v.to_str().ok())
                .map(|ct| !ct.is_empty() && !ct.starts_with("application/json"))
                .unwrap_or(false)
        } else {
            false
        };

        if rejected {
            let response = actix_web::HttpResponse::UnsupportedMediaType().json(serde_json::json!({
                "error": {"code": "INVALID_INPUT", "message": "unsupported content type"}
            }));
            let (http_req, _payload) = req.into_parts();
            return Box::pin(async move {
                Ok(ServiceResponse::new(http_req, response).map_into_right_body())
            });
        }

        let fut = self.service.call(req);
        Box::pin(async move { Ok(fut.await?.map_into_left_body()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpResponse};

    #[actix_web::test]
    async fn rejects_non_json_content_type_on_post() {
        let app = test::init_service(
            App::new()
                .wrap(ContentTypeGate)
                .route("/x", web::post().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/x")
            .insert_header(("Content-Type", "text/plain"))
            .insert_header(("Content-Length", "3"))
            .set_payload("abc")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 415);
    }

    #[actix_web::test]
    async fn allows_json_content_type() {
        let app = test::init_service(
            App::new()
                .wrap(ContentTypeGate)
                .route("/x", web::post().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/x")
            .insert_header(("Content-Type", "application/json"))
            .set_json(serde_json::json!({}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }
}
