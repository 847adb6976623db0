//! CORS middleware (spec §4.2 "CORS"): configurable allowed origins
//! (exact match, with wildcard permitted only in development or with an
//! explicit `*`), methods, headers, exposed headers, max-age, credentials.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::{header, Method};
use actix_web::Error as ActixError;

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub max_age: u32,
    pub allow_credentials: bool,
    pub environment: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![],
            allowed_methods: vec![
                "GET".into(),
                "POST".into(),
                "PUT".into(),
                "PATCH".into(),
                "DELETE".into(),
                "OPTIONS".into(),
            ],
            allowed_headers: vec!["Content-Type".into(), "Authorization".into(), "X-Correlation-ID".into()],
            exposed_headers: vec!["X-Correlation-ID".into()],
            max_age: 3600,
            allow_credentials: false,
            environment: "production".to_string(),
        }
    }
}

impl CorsConfig {
    fn wildcard_allowed(&self) -> bool {
        self.environment == "development" || self.allowed_origins.iter().any(|o| o == "*")
    }

    /// The value to place in `Access-Control-Allow-Origin`, or `None` if the
    /// origin is not permitted.
    fn resolve_origin(&self, origin: &str) -> Option<(String, bool)> {
        if self.wildcard_allowed() {
            return Some(("*".to_string(), false));
        }
        if self.allowed_origins.iter().any(|o| o == origin) {
            return Some((origin.to_string(), true));
        }
        None
    }
}

pub struct Cors {
    config: CorsConfig,
}

impl Cors {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Cors
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = ActixError;
    type Transform = CorsMiddleware<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(CorsMiddleware {
            service,
            config: self.config.clone(),
        }))
    }
}

pub struct CorsMiddleware<S> {
    service: S,
    config: CorsConfig,
}

impl<S, B> Service<ServiceRequest> for CorsMiddleware<S>
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
        let origin = req
            .headers()
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let resolved = origin.as_deref().and_then(|o| self.config.resolve_origin(o));

        if req.method() == Method::OPTIONS {
            let mut builder = actix_web::HttpResponse::NoContent();
            if let Some((value, vary)) = &resolved {
                builder.insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, value.clone()));
                if *vary {
                    builder.insert_header((header::VARY, "Origin"));
                }
            }
            builder.insert_header((
                header::ACCESS_CONTROL_ALLOW_METHODS,
                self.config.allowed_methods.join(", "),
            ));
            builder.insert_header((
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                self.config.allowed_headers.join(", "),
            ));
            builder.insert_header((header::ACCESS_CONTROL_MAX_AGE, self.config.max_age.to_string()));
            if self.config.allow_credentials {
                builder.insert_header((header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true"));
            }
            let response = builder.finish();
            let (http_req, _payload) = req.into_parts();
            return Box::pin(async move {
                Ok(ServiceResponse::new(http_req, response).map_into_right_body())
            });
        }

        let config = self.config.clone();
        let fut = self.service.call(req);
        Box::pin(async move {
            let mut resp = fut.await?.map_into_left_body();
            if let Some((value, vary)) = resolved {
                if let Ok(hv) = header::HeaderValue::from_str(&value) {
                    resp.headers_mut().insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, hv);
                }
                if vary {
                    resp.headers_mut()
                        .insert(header::VARY, header::HeaderValue::from_static("Origin"));
                }
                if !config.exposed_headers.is_empty() {
                    if let Ok(hv) = header::HeaderValue::from_str(&config.exposed_headers.join(", ")) {
                        resp.headers_mut().insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, hv);
                    }
                }
                if config.allow_credentials {
                    resp.headers_mut().insert(
                        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                        header::HeaderValue::from_static("true"),
                    );
                }
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
    async fn production_mode_omits_header_for_unlisted_origin() {
        let config = CorsConfig {
            allowed_origins: vec!["https://shop.example".into()],
            environment: "production".into(),
            ..Default::default()
        };
        let app = test::init_service(
            App::new()
                .wrap(Cors::new(config))
                .route("/x", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;
        let req = test::TestRequest::get()
            .uri("/x")
            .insert_header((header::ORIGIN, "https://evil.example"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(!resp.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[actix_web::test]
    async fn development_mode_preflight_returns_wildcard() {
        let config = CorsConfig {
            environment: "development".into(),
            ..Default::default()
        };
        let app = test::init_service(
            App::new()
                .wrap(Cors::new(config))
                .route("/api/v1/cart/items", web::post().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;
        let req = test::TestRequest::default()
            .method(Method::OPTIONS)
            .uri("/api/v1/cart/items")
            .insert_header((header::ORIGIN, "https://app.example"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 204);
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
        assert!(resp
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("POST"));
    }
}
