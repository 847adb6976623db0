//! Auth-context extraction (route-level, spec §4.2): reads `X-User-ID` set
//! by the gateway after JWT validation; empty rejects with 401.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::Error as ActixError;

use crate::context::RequestContext;
use crate::middleware::USER_ID_HEADER;

pub struct AuthContext;

impl<S, B> Transform<S, ServiceRequest> for AuthContext
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = ActixError;
    type Transform = AuthContextMiddleware<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AuthContextMiddleware { service }))
    }
}

pub struct AuthContextMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for AuthContextMiddleware<S>
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
        let user_id = req
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let user_id = match user_id {
            Some(id) => id,
            None => {
                let response = actix_web::HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": {"code": "UNAUTHORIZED", "message": "authentication required"}
                }));
                let (http_req, _payload) = req.into_parts();
                return Box::pin(async move {
                    Ok(ServiceResponse::new(http_req, response).map_into_right_body())
                });
            }
        };

        {
            let mut extensions = req.extensions_mut();
            if let Some(ctx) = extensions.get_mut::<RequestContext>() {
                ctx.user_id = Some(user_id);
            } else {
                extensions.insert(RequestContext::new(crate::context::generate_correlation_id()).with_user(user_id));
            }
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
    async fn missing_user_id_rejects_401() {
        let app = test::init_service(
            App::new()
                .wrap(AuthContext)
                .route("/cart", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;
        let req = test::TestRequest::get().uri("/cart").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }

    #[actix_web::test]
    async fn present_user_id_passes_through() {
        let app = test::init_service(
            App::new()
                .wrap(AuthContext)
                .route("/cart", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;
        let req = test::TestRequest::get()
            .uri("/cart")
            .insert_header((USER_ID_HEADER, "user-1"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }
}
