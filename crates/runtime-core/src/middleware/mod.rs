//! HTTP middleware stack (spec §4.2).
//!
//! Composition order, outermost first:
//! recovery -> compression -> server-side timeout -> request-logging ->
//! Prometheus metrics -> tracing -> request-scoped logger enrichment ->
//! route-level (content-type gate, auth-context extraction) -> handler.
//!
//! Each middleware follows the teacher's `Transform`/`Service` wrapping
//! idiom (see `middleware/rate_limit.rs` in the teacher for the pattern
//! this generalizes).

pub mod auth_context;
pub mod content_type;
pub mod cors;
pub mod ip_allowlist;
pub mod logger_enrichment;
pub mod metrics;
pub mod recovery;
pub mod request_logging;
pub mod timeout;
pub mod tracing_mw;

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";
pub const USER_ID_HEADER: &str = "X-User-ID";
pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";
