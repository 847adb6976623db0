//! Cross-cutting service runtime shared by every microservice in the
//! commerce fleet: the resilient HTTP client, the HTTP middleware stack,
//! health probes, Kafka producer/consumer wiring with idempotent delivery,
//! and the application lifecycle that composes these with a Postgres pool
//! and orderly shutdown.
//!
//! A concrete service (see `cart-service`) depends on this crate and
//! supplies its own domain routes, repository, and events; everything here
//! is domain-agnostic.

pub mod build_info;
pub mod config;
pub mod context;
pub mod debug;
pub mod error;
pub mod health;
pub mod http_client;
pub mod kafka;
pub mod lifecycle;
pub mod middleware;
pub mod observability;

pub use context::RequestContext;
pub use error::{ErrorCode, RuntimeError};
