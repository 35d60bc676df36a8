use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::protection::ProtectionParams;

/// Motor vendor, one per supported wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum Brand {
    /// Feetech STS/SCS serial servos (Protocol 1.0 style framing).
    Feetech,
    /// Robotis Dynamixel X-series (Protocol 2.0).
    Dynamixel,
    /// Damiao DM-J series on CAN (MIT control frames).
    Damiao,
}

impl Brand {
    pub const ALL: [Brand; 3] = [Brand::Feetech, Brand::Dynamixel, Brand::Damiao];

    pub fn as_str(self) -> &'static str {
        match self {
            Brand::Feetech => "feetech",
            Brand::Dynamixel => "dynamixel",
            Brand::Damiao => "damiao",
        }
    }

    pub fn is_can(self) -> bool {
        matches!(self, Brand::Damiao)
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Brand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feetech" | "sts" | "scs" | "scservo" => Ok(Brand::Feetech),
            "dynamixel" | "dxl" | "robotis" => Ok(Brand::Dynamixel),
            "damiao" | "dm" => Ok(Brand::Damiao),
            other => Err(format!("unknown motor brand: {other}")),
        }
    }
}

/// Kind of protection threshold carried by a model entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    TempWarning,
    TempCritical,
    VoltageMin,
    VoltageMax,
    CurrentMax,
    CurrentPeak,
}

/// Firmware major/minor pair reported by Feetech servos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Symmetric ranges used by MIT-mode CAN frames: position ±p_max (rad), velocity ±v_max
/// (rad/s), torque ±t_max (Nm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct MitRanges {
    pub p_max: f32,
    pub v_max: f32,
    pub t_max: f32,
}

/// Raw-register to physical-unit factors for serial servos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct UnitScales {
    /// raw velocity unit → rad/s
    #[serde(default)]
    pub velocity: Option<f64>,
    /// raw current unit → mA; `None` when the model reports load instead of current
    #[serde(default)]
    pub current_ma: Option<f64>,
    /// raw voltage unit → V
    #[serde(default = "default_voltage_scale")]
    pub voltage: f64,
    /// raw load unit → %
    #[serde(default = "default_load_scale")]
    pub load_pct: f64,
    /// Output-shaft torque constant (Nm/A), used to estimate current from torque feedback.
    #[serde(default)]
    pub torque_constant: Option<f64>,
}

fn default_voltage_scale() -> f64 {
    0.1
}

fn default_load_scale() -> f64 {
    0.1
}

impl Default for UnitScales {
    fn default() -> Self {
        Self {
            velocity: None,
            current_ma: None,
            voltage: default_voltage_scale(),
            load_pct: default_load_scale(),
            torque_constant: None,
        }
    }
}

/// Static description of a motor model or model variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct ModelInfo {
    pub brand: Brand,
    pub model: String,
    #[serde(default)]
    pub variant: Option<String>,
    /// Values the model-number register (or vendor id) may report for this model.
    #[serde(default)]
    pub model_numbers: Vec<u32>,
    /// Firmware that distinguishes this variant from siblings sharing a model number.
    #[serde(default)]
    pub firmware: Option<FirmwareVersion>,
    /// Encoder counts per output revolution.
    pub resolution: u32,
    /// raw position count → rad
    #[serde(default)]
    pub position_scale: Option<f64>,
    #[serde(default)]
    pub limits: BTreeMap<LimitKind, f64>,
    #[serde(default)]
    pub units: UnitScales,
    #[serde(default)]
    pub mit: Option<MitRanges>,
}

impl ModelInfo {
    /// `model` or `model/variant`.
    pub fn display_name(&self) -> String {
        match &self.variant {
            Some(v) => format!("{}/{}", self.model, v),
            None => self.model.clone(),
        }
    }

    pub fn is_base(&self) -> bool {
        self.variant.is_none()
    }

    pub fn limit(&self, kind: LimitKind) -> Option<f64> {
        self.limits.get(&kind).copied()
    }

    /// Case-insensitive exact match on model and (optional) variant.
    pub fn same_identity(&self, model: &str, variant: Option<&str>) -> bool {
        self.model.eq_ignore_ascii_case(model)
            && match (self.variant.as_deref(), variant) {
                (None, None) => true,
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            }
    }

    /// Raw position count at which the shaft is considered to be at 0 rad.
    pub fn center_count(&self) -> f64 {
        f64::from(self.resolution) / 2.0
    }

    pub fn protection(&self) -> ProtectionParams {
        ProtectionParams::from_limits(&self.limits)
    }
}

impl fmt::Display for ModelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.brand, self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brand_aliases() {
        assert_eq!("DXL".parse::<Brand>().unwrap(), Brand::Dynamixel);
        assert_eq!("sts".parse::<Brand>().unwrap(), Brand::Feetech);
        assert_eq!(" damiao ".parse::<Brand>().unwrap(), Brand::Damiao);
        assert!("odrive".parse::<Brand>().is_err());
    }

    #[test]
    fn test_same_identity_variant_rules() {
        let mut info = ModelInfo {
            brand: Brand::Feetech,
            model: "sts3215".into(),
            variant: None,
            model_numbers: vec![777],
            firmware: None,
            resolution: 4096,
            position_scale: None,
            limits: BTreeMap::new(),
            units: UnitScales::default(),
            mit: None,
        };
        assert!(info.same_identity("STS3215", None));
        assert!(!info.same_identity("sts3215", Some("c018")));
        info.variant = Some("c018".into());
        assert!(info.same_identity("sts3215", Some("C018")));
        assert_eq!(info.display_name(), "sts3215/c018");
    }
}
