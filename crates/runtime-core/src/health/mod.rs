//! Health-probe subsystem (spec §4.3). A registry of named
//! `(probe fn, criticality)` pairs backs `/health/live` and `/health/ready`.

mod registry;
mod routes;

pub use registry::{Criticality, HealthRegistry, ProbeOutcome, ReadinessReport, ReadinessStatus};
pub use routes::configure_health;
