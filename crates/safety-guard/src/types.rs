use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall protection level of one telemetry snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    #[default]
    Ok,
    Warning,
    Critical,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusLevel::Ok => "ok",
            StatusLevel::Warning => "warning",
            StatusLevel::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    TempCritical,
    TempWarning,
    VoltageLow,
    VoltageHigh,
    CurrentPeakExceeded,
    CurrentMaxExceeded,
}

impl ViolationType {
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            ViolationType::TempCritical
                | ViolationType::VoltageLow
                | ViolationType::VoltageHigh
                | ViolationType::CurrentPeakExceeded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ViolationType::TempCritical => "temp_critical",
            ViolationType::TempWarning => "temp_warning",
            ViolationType::VoltageLow => "voltage_low",
            ViolationType::VoltageHigh => "voltage_high",
            ViolationType::CurrentPeakExceeded => "current_peak_exceeded",
            ViolationType::CurrentMaxExceeded => "current_max_exceeded",
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    #[serde(rename = "type")]
    pub kind: ViolationType,
    pub value: f64,
    pub limit: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtectionStatus {
    pub status: StatusLevel,
    #[serde(default)]
    pub violations: Vec<Violation>,
}

impl ProtectionStatus {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn is_critical(&self) -> bool {
        self.status == StatusLevel::Critical
    }

    pub fn has(&self, kind: ViolationType) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }
}

/// Physical readings the engine evaluates. Metrics a motor does not report stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMetrics {
    /// °C
    pub temperature: Option<f64>,
    /// V
    pub voltage: Option<f64>,
    /// mA
    pub current: Option<f64>,
}
