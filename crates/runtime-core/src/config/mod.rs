//! Layered configuration (spec §6 "Environment variables recognized").
//! Extends the teacher's `serde`-deserialized settings-struct pattern
//! (`models/settings.rs`) with the `config` crate's env/file layering:
//! environment variables win over file values.

pub mod validation;

use std::time::Duration;

use serde::Deserialize;

use crate::error::RuntimeError;
use crate::middleware::cors::CorsConfig;

fn default_http_port() -> u16 {
    8080
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_db_max_conns() -> u32 {
    10
}

fn default_reservation_ttl_secs() -> u64 {
    900
}

fn default_slow_query_threshold_ms() -> u64 {
    200
}

/// Top-level settings shared by every service built on this runtime. A
/// concrete service (e.g. `cart-service`) embeds this alongside its own
/// domain-specific settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_environment")]
    pub environment: String,

    pub postgres_url: String,

    #[serde(default = "default_db_max_conns")]
    pub db_max_conns: u32,

    pub kafka_brokers: String,

    #[serde(default)]
    pub otel_exporter_endpoint: Option<String>,

    #[serde(default)]
    pub pprof_allowed_cidrs: Vec<String>,

    #[serde(default = "default_slow_query_threshold_ms")]
    pub slow_query_threshold_ms: u64,

    #[serde(default = "default_reservation_ttl_secs")]
    pub reservation_ttl_secs: u64,

    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

impl RuntimeSettings {
    /// Loads settings layered as: built-in defaults (via `serde(default)`)
    /// -> optional `config/<service>.toml` file -> `RUN_MODE`-suffixed file
    /// -> environment variables (highest precedence), matching
    /// `config::Environment`'s override-wins convention used across the
    /// retrieval pack.
    pub fn load(service_name: &str) -> Result<Self, RuntimeError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{service_name}")).required(false))
            .add_source(config::Environment::default().try_parsing(true).list_separator(","));

        let settings = builder
            .build()
            .map_err(|e| RuntimeError::internal(format!("failed to build configuration: {e}")))?;
        settings
            .try_deserialize()
            .map_err(|e| RuntimeError::internal(format!("failed to parse configuration: {e}")))
    }

    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }

    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.reservation_ttl_secs)
    }

    pub fn cors_config(&self) -> CorsConfig {
        CorsConfig {
            allowed_origins: self.cors_allowed_origins.clone(),
            environment: self.environment.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn environment_variables_override_defaults() {
        std::env::set_var("POSTGRES_URL", "postgres://test/test");
        std::env::set_var("KAFKA_BROKERS", "localhost:9092");
        std::env::set_var("HTTP_PORT", "9090");
        let settings = RuntimeSettings::load("test-service").unwrap();
        assert_eq!(settings.http_port, 9090);
        assert_eq!(settings.postgres_url, "postgres://test/test");
        std::env::remove_var("POSTGRES_URL");
        std::env::remove_var("KAFKA_BROKERS");
        std::env::remove_var("HTTP_PORT");
    }

    #[test]
    #[serial]
    fn missing_required_field_errors() {
        std::env::remove_var("POSTGRES_URL");
        std::env::remove_var("KAFKA_BROKERS");
        let result = RuntimeSettings::load("nonexistent-service-xyz");
        assert!(result.is_err());
    }
}
