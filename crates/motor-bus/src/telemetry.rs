use motor_registry::MotorId;
use safety_guard::{ProtectionStatus, TelemetryMetrics};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// One motor reading, built fresh on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub id: MotorId,
    /// rad (raw counts when the model has no position scale)
    pub position: f64,
    /// rad/s
    pub velocity: f64,
    /// mA
    pub current: Option<f64>,
    /// % of rated load
    pub load: Option<f64>,
    /// °C
    pub temperature: f64,
    /// V
    pub voltage: Option<f64>,
    pub moving: bool,
    /// rad
    pub goal_position: Option<f64>,
    /// Raw hardware error / status bits as reported by the motor.
    pub hardware_error: u8,
    pub protection: ProtectionStatus,
    pub ts: String,
}

impl Telemetry {
    pub fn metrics(&self) -> TelemetryMetrics {
        TelemetryMetrics {
            temperature: Some(self.temperature),
            voltage: self.voltage,
            current: self.current,
        }
    }
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
