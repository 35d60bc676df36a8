use crate::error::{RegistryError, Result};
use crate::table::builtin_models;
use crate::types::{Brand, FirmwareVersion, ModelInfo};

/// MIT limit comparison tolerance.
const MIT_EPSILON: f32 = 1e-3;

/// Read-only table of known motor models.
///
/// Built once at start-up and shared as `Arc<ModelRegistry>`.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelInfo>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        Self {
            models: builtin_models(),
        }
    }

    /// Add entries loaded from configuration; `(brand, model, variant)` must stay unique.
    pub fn extend(&mut self, models: impl IntoIterator<Item = ModelInfo>) -> Result<()> {
        for m in models {
            if m.resolution == 0 {
                return Err(RegistryError::Invalid {
                    model: m.display_name(),
                    reason: "resolution must be non-zero".into(),
                });
            }
            if self
                .models
                .iter()
                .any(|e| e.brand == m.brand && e.same_identity(&m.model, m.variant.as_deref()))
            {
                return Err(RegistryError::Duplicate(m.to_string()));
            }
            tracing::debug!(brand = %m.brand, model = %m.display_name(), "model registered");
            self.models.push(m);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn all(&self) -> &[ModelInfo] {
        &self.models
    }

    pub fn by_brand(&self, brand: Brand) -> impl Iterator<Item = &ModelInfo> {
        self.models.iter().filter(move |m| m.brand == brand)
    }

    /// Exact `(brand, model, variant)` match, falling back to the base entry of the model
    /// when the variant is not known.
    pub fn lookup(&self, brand: Brand, model: &str, variant: Option<&str>) -> Option<&ModelInfo> {
        let exact = self
            .by_brand(brand)
            .find(|m| m.same_identity(model, variant));
        if exact.is_some() || variant.is_none() {
            return exact;
        }
        tracing::debug!(%brand, model, ?variant, "variant not in table, using base model");
        self.by_brand(brand).find(|m| m.same_identity(model, None))
    }

    pub fn require(&self, brand: Brand, model: &str, variant: Option<&str>) -> Result<&ModelInfo> {
        self.lookup(brand, model, variant)
            .ok_or_else(|| RegistryError::UnknownModel {
                brand,
                model: model.to_string(),
            })
    }

    /// Resolve a model-number register value.
    ///
    /// Several variants may share one model number; `firmware` selects among them, and the
    /// base entry is used when no variant claims that firmware. Without a base entry the
    /// variant with the lowest name wins.
    pub fn by_model_number(
        &self,
        brand: Brand,
        number: u32,
        firmware: Option<FirmwareVersion>,
    ) -> Result<&ModelInfo> {
        let candidates: Vec<&ModelInfo> = self
            .by_brand(brand)
            .filter(|m| m.model_numbers.contains(&number))
            .collect();
        if let Some(fw) = firmware {
            if let Some(m) = candidates.iter().find(|m| m.firmware == Some(fw)) {
                return Ok(*m);
            }
        }
        // `None` sorts first, so a base entry always wins.
        candidates
            .into_iter()
            .min_by(|a, b| (&a.variant, &a.model).cmp(&(&b.variant, &b.model)))
            .ok_or(RegistryError::UnknownModelNumber { brand, number })
    }

    /// Identify a CAN motor from the PMAX/VMAX/TMAX parameters it reports.
    pub fn by_mit_limits(&self, p_max: f32, v_max: f32, t_max: f32) -> Result<&ModelInfo> {
        let close = |a: f32, b: f32| (a - b).abs() <= MIT_EPSILON * b.abs().max(1.0);
        self.models
            .iter()
            .find(|m| {
                m.mit.is_some_and(|r| {
                    close(p_max, r.p_max) && close(v_max, r.v_max) && close(t_max, r.t_max)
                })
            })
            .ok_or(RegistryError::UnknownMitLimits {
                p_max,
                v_max,
                t_max,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_falls_back_to_base() {
        let reg = ModelRegistry::builtin();
        let m = reg
            .lookup(Brand::Feetech, "sts3215", Some("c999"))
            .unwrap();
        assert!(m.is_base());
        let v = reg.lookup(Brand::Feetech, "STS3215", Some("c018")).unwrap();
        assert_eq!(v.variant.as_deref(), Some("c018"));
        assert!(reg.lookup(Brand::Dynamixel, "sts3215", None).is_none());
    }

    #[test]
    fn test_model_number_alias_resolves_base() {
        let reg = ModelRegistry::builtin();
        let m = reg.by_model_number(Brand::Feetech, 0x0C8F, None).unwrap();
        assert_eq!(m.model, "sts3215");
        assert!(m.is_base());
    }

    #[test]
    fn test_firmware_selects_variant() {
        let reg = ModelRegistry::builtin();
        let fw = FirmwareVersion { major: 3, minor: 9 };
        let m = reg.by_model_number(Brand::Feetech, 777, Some(fw)).unwrap();
        assert_eq!(m.variant.as_deref(), Some("c018"));
        let unknown = FirmwareVersion { major: 9, minor: 9 };
        let m = reg
            .by_model_number(Brand::Feetech, 777, Some(unknown))
            .unwrap();
        assert!(m.is_base());
    }

    #[test]
    fn test_model_number_without_base_is_deterministic() {
        let mut reg = ModelRegistry::builtin();
        let template = reg.lookup(Brand::Feetech, "sts3215", None).unwrap().clone();
        let variant = |name: &str| {
            let mut m = template.clone();
            m.model = "sts3250".into();
            m.variant = Some(name.into());
            m.model_numbers = vec![5555];
            m
        };
        reg.extend([variant("zz"), variant("aa")]).unwrap();
        let m = reg.by_model_number(Brand::Feetech, 5555, None).unwrap();
        assert_eq!(m.variant.as_deref(), Some("aa"));
    }

    #[test]
    fn test_unknown_model_number() {
        let reg = ModelRegistry::builtin();
        assert!(matches!(
            reg.by_model_number(Brand::Dynamixel, 4242, None),
            Err(RegistryError::UnknownModelNumber { number: 4242, .. })
        ));
    }

    #[test]
    fn test_mit_limits_identify_variant() {
        let reg = ModelRegistry::builtin();
        assert_eq!(reg.by_mit_limits(12.5, 30.0, 10.0).unwrap().model, "dm4310");
        let hv = reg.by_mit_limits(12.5, 50.0, 10.0).unwrap();
        assert_eq!(hv.display_name(), "dm4310/48v");
        assert!(reg.by_mit_limits(1.0, 2.0, 3.0).is_err());
    }

    #[test]
    fn test_extend_rejects_duplicates() {
        let mut reg = ModelRegistry::builtin();
        let dup = reg.all()[0].clone();
        assert!(matches!(reg.extend([dup]), Err(RegistryError::Duplicate(_))));
    }
}
