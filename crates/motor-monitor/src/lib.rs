//! motor-monitor: per-device telemetry sessions
//!
//! A [`TelemetrySession`] owns one [`MotorBus`](motor_bus::MotorBus), polls it on a tokio
//! task, runs the protection checks on every snapshot and publishes [`SessionEvent`]s on a
//! broadcast channel. Motion commands go through the same session so they never race the
//! poll loop for the bus.

mod error;
pub use error::{Result, SessionError};

mod events;
pub use events::{CommandSummary, SessionEvent};

mod calibration;
pub use calibration::{CalibrationStore, MemoryCalibrationStore};

mod metrics;
pub use metrics::MetricsHub;

mod session;
pub use session::{SessionConfig, TelemetrySession, MIN_POLL_INTERVAL};
