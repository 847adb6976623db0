//! Per-request context: the single channel for correlation id, auth
//! identity, deadline, and trace ids (spec §3, §9 "Context propagation").
//!
//! No global or module-level mutable state carries per-request data; the
//! context is attached to [`actix_web::HttpRequest`] extensions by the
//! request-logging middleware and read back by downstream middleware and
//! handlers.

use std::time::{Duration, Instant};

use uuid::Uuid;

/// Generates a fresh correlation id. Used when an inbound request carries no
/// `X-Correlation-ID` header.
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: String,
    pub user_id: Option<String>,
    pub role: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(correlation_id: String) -> Self {
        Self {
            correlation_id,
            user_id: None,
            role: None,
            trace_id: None,
            span_id: None,
            deadline: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.span_id = Some(span_id.into());
        self
    }

    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Remaining time before the deadline, or `None` if there is no deadline.
    /// Returns `Some(Duration::ZERO)` once the deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_are_unique() {
        assert_ne!(generate_correlation_id(), generate_correlation_id());
    }

    #[test]
    fn deadline_starts_unexpired_and_expires_after_duration() {
        let ctx = RequestContext::new("abc".into()).with_deadline(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.is_expired());
    }

    #[test]
    fn builder_methods_compose() {
        let ctx = RequestContext::new("c-1".into())
            .with_user("u-1")
            .with_role("admin")
            .with_trace("t-1", "s-1");
        assert_eq!(ctx.user_id.as_deref(), Some("u-1"));
        assert_eq!(ctx.role.as_deref(), Some("admin"));
        assert_eq!(ctx.trace_id.as_deref(), Some("t-1"));
    }
}
