//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Probes (probe.rs):
//!     Periodic timer per check
//!     → Invoke check function (async, or blocking pool)
//!     → Publish latest HealthCheckResult (state.rs)
//!
//! Registry (registry.rs):
//!     Named probes
//!     → get_health_status() folds latest results into a HealthReport
//!     → Worst status wins: Unhealthy > Degraded > Healthy
//! ```
//!
//! # Design Decisions
//! - Probes are independent; a failing check never affects another
//! - Check errors and panics are reported as UNHEALTHY, never propagated
//! - Readers only ever see completed results

pub mod probe;
pub mod registry;
pub mod state;

pub use probe::HealthProbe;
pub use registry::{CheckReport, HealthCheckRegistry, HealthReport, RegistryError};
pub use state::{HealthCheckResult, HealthStatus};
