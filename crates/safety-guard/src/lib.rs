//! safety-guard: protection checks and link monitoring for motor buses
//!
//! - [`check_violations`] classifies temperature, voltage and current readings against a
//!   model's [`ProtectionParams`](motor_registry::ProtectionParams)
//! - [`CommsWatchdog`] tracks consecutive failed poll cycles on a bus

mod types;
pub use types::{ProtectionStatus, StatusLevel, TelemetryMetrics, Violation, ViolationType};

mod engine;
pub use engine::check_violations;

mod watchdogs;
pub use watchdogs::{CommsTransition, CommsWatchdog};
