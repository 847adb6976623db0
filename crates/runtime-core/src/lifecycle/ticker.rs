//! Generic housekeeping ticker supervisor (spec §4.5 "a background
//! reservation-cleanup ticker (1-minute period) or similar housekeeping
//! may also run"). Modeled as a trait object list so a service with no
//! periodic sweeps (like `cart-service`) registers zero tickers while the
//! supervisor loop itself is still exercised by services that do.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;

#[async_trait]
pub trait HousekeepingTicker: Send + Sync {
    fn name(&self) -> &str;
    fn period(&self) -> Duration;
    async fn tick(&self) -> Result<(), RuntimeError>;
}

/// Runs `ticker.tick()` on every period boundary until `shutdown` fires,
/// exiting at the next tick per spec §5 "background tickers exit at the
/// next tick".
pub async fn run_ticker(ticker: Arc<dyn HousekeepingTicker>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(ticker.period());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::info!(ticker = ticker.name(), "housekeeping ticker shutting down");
                return;
            }
            _ = interval.tick() => {
                if let Err(e) = ticker.tick().await {
                    tracing::error!(ticker = ticker.name(), error = %e, "housekeeping tick failed");
                }
            }
        }
    }
}
