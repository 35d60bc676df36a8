use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{LimitKind, ModelInfo};

/// Thresholds the protection engine evaluates telemetry against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct ProtectionParams {
    /// °C
    pub temp_warning: f64,
    /// °C
    pub temp_critical: f64,
    /// V
    pub voltage_min: f64,
    /// V
    pub voltage_max: f64,
    /// mA, sustained
    pub current_max: f64,
    /// mA, instantaneous
    pub current_peak: f64,
}

impl Default for ProtectionParams {
    fn default() -> Self {
        Self {
            temp_warning: 60.0,
            temp_critical: 70.0,
            voltage_min: 0.0,
            voltage_max: 60.0,
            current_max: 5_000.0,
            current_peak: 10_000.0,
        }
    }
}

impl ProtectionParams {
    /// Build from a model's limit table, falling back to [`Default`] per missing entry.
    pub fn from_limits(limits: &BTreeMap<LimitKind, f64>) -> Self {
        let d = Self::default();
        let get = |k: LimitKind, fallback: f64| limits.get(&k).copied().unwrap_or(fallback);
        Self {
            temp_warning: get(LimitKind::TempWarning, d.temp_warning),
            temp_critical: get(LimitKind::TempCritical, d.temp_critical),
            voltage_min: get(LimitKind::VoltageMin, d.voltage_min),
            voltage_max: get(LimitKind::VoltageMax, d.voltage_max),
            current_max: get(LimitKind::CurrentMax, d.current_max),
            current_peak: get(LimitKind::CurrentPeak, d.current_peak),
        }
    }

    /// Overlay user overrides; every field present in `ov` wins.
    pub fn merged(mut self, ov: &ProtectionOverrides) -> Self {
        if let Some(v) = ov.temp_warning {
            self.temp_warning = v;
        }
        if let Some(v) = ov.temp_critical {
            self.temp_critical = v;
        }
        if let Some(v) = ov.voltage_min {
            self.voltage_min = v;
        }
        if let Some(v) = ov.voltage_max {
            self.voltage_max = v;
        }
        if let Some(v) = ov.current_max {
            self.current_max = v;
        }
        if let Some(v) = ov.current_peak {
            self.current_peak = v;
        }
        self
    }
}

/// Partial threshold set supplied by the user for one model or variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ProtectionOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_warning: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_critical: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_peak: Option<f64>,
}

impl ProtectionOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Source of per-model overrides (settings file, database, ...).
pub trait OverrideProvider: Send + Sync {
    fn overrides_for(&self, model: &ModelInfo) -> Option<ProtectionOverrides>;
}

/// Overrides keyed by `brand/model` or `brand/model/variant` (lowercase).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(transparent)]
pub struct OverrideTable {
    pub entries: BTreeMap<String, ProtectionOverrides>,
}

impl OverrideTable {
    pub fn key(model: &ModelInfo) -> String {
        format!("{}/{}", model.brand, model.display_name()).to_ascii_lowercase()
    }

    pub fn insert(&mut self, key: impl Into<String>, ov: ProtectionOverrides) {
        self.entries.insert(key.into().to_ascii_lowercase(), ov);
    }
}

impl OverrideProvider for OverrideTable {
    /// The variant-specific entry wins over the base model entry.
    fn overrides_for(&self, model: &ModelInfo) -> Option<ProtectionOverrides> {
        if let Some(ov) = self.entries.get(&Self::key(model)) {
            return Some(*ov);
        }
        let base = format!("{}/{}", model.brand, model.model).to_ascii_lowercase();
        self.entries.get(&base).copied()
    }
}

/// Model defaults merged with whatever the provider holds for that model.
pub fn effective_protection(
    model: &ModelInfo,
    provider: Option<&dyn OverrideProvider>,
) -> ProtectionParams {
    let base = model.protection();
    match provider.and_then(|p| p.overrides_for(model)) {
        Some(ov) => base.merged(&ov),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelRegistry;

    #[test]
    fn test_missing_limits_use_defaults() {
        let mut limits = BTreeMap::new();
        limits.insert(LimitKind::TempCritical, 80.0);
        let p = ProtectionParams::from_limits(&limits);
        assert_eq!(p.temp_critical, 80.0);
        assert_eq!(p.temp_warning, ProtectionParams::default().temp_warning);
    }

    #[test]
    fn test_override_fields_win() {
        let base = ProtectionParams::default();
        let ov = ProtectionOverrides {
            voltage_max: Some(13.0),
            ..Default::default()
        };
        let merged = base.merged(&ov);
        assert_eq!(merged.voltage_max, 13.0);
        assert_eq!(merged.temp_critical, base.temp_critical);
    }

    #[test]
    fn test_table_prefers_variant_key() {
        let reg = ModelRegistry::builtin();
        let c018 = reg
            .lookup(crate::Brand::Feetech, "sts3215", Some("c018"))
            .unwrap();
        let mut table = OverrideTable::default();
        table.insert(
            "feetech/sts3215",
            ProtectionOverrides {
                temp_critical: Some(65.0),
                ..Default::default()
            },
        );
        assert_eq!(
            effective_protection(c018, Some(&table)).temp_critical,
            65.0
        );
        table.insert(
            "Feetech/STS3215/C018",
            ProtectionOverrides {
                temp_critical: Some(55.0),
                ..Default::default()
            },
        );
        assert_eq!(
            effective_protection(c018, Some(&table)).temp_critical,
            55.0
        );
    }

    #[test]
    fn test_overrides_reject_unknown_keys() {
        let ok: ProtectionOverrides = serde_yaml::from_str("temp_warning: 50").unwrap();
        assert_eq!(ok.temp_warning, Some(50.0));
        assert!(serde_yaml::from_str::<ProtectionOverrides>("temp_warn: 50").is_err());
    }
}
