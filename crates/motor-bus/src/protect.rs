use motor_registry::{Brand, MotorId, ProtectionOverrides};

use crate::bus::MotorBus;
use crate::telemetry::Telemetry;

/// One protected read for a motor whose model the caller already knows.
///
/// The model comes from the registry (variant falls back to the base entry) and per-call
/// `overrides` win over both the model defaults and the bus-level provider. Every failure is
/// logged and reported as `None`: no data this cycle.
pub fn read_telemetry_with_protection(
    bus: &mut MotorBus,
    id: MotorId,
    brand: Brand,
    model: &str,
    variant: Option<&str>,
    overrides: Option<&ProtectionOverrides>,
) -> Option<Telemetry> {
    if brand != bus.brand() {
        tracing::warn!(%id, %brand, bus = %bus.bus_type(), "brand does not match bus");
        return None;
    }
    let Some(info) = bus.registry().lookup(brand, model, variant).cloned() else {
        tracing::warn!(%id, %brand, model, ?variant, "model not in registry");
        return None;
    };
    let mut params = bus.protection_for(&info);
    if let Some(ov) = overrides {
        params = params.merged(ov);
    }
    bus.register_motor(id, Some(info.clone()));
    match bus.read_checked(id, &info, &params) {
        Ok(t) => Some(t),
        Err(e) => {
            tracing::warn!(%id, error = %e, "telemetry read failed");
            None
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::factory::create_bus;
    use crate::sim::{FeetechSim, SimRig};
    use motor_registry::ModelRegistry;
    use safety_guard::{StatusLevel, ViolationType};
    use std::sync::Arc;

    fn bench() -> (FeetechSim, MotorBus) {
        let sim = FeetechSim::new(1_000_000);
        sim.add_servo(1, 777, (3, 9));
        let rig = SimRig::new();
        rig.attach_feetech("/dev/ttyACM0", sim.clone());
        let mut bus = create_bus(
            "feetech",
            "/dev/ttyACM0",
            1_000_000,
            Arc::new(rig),
            Arc::new(ModelRegistry::builtin()),
        )
        .unwrap();
        bus.connect().unwrap();
        (sim, bus)
    }

    #[test]
    fn test_variant_limits_and_overrides() {
        let (sim, mut bus) = bench();
        // 12 V variant: 11.0 V is fine, on the 7.4 V base model it would be over-voltage.
        sim.set_voltage(1, 110);
        let id = MotorId::Serial(1);
        let t = read_telemetry_with_protection(&mut bus, id, Brand::Feetech, "sts3215", Some("c018"), None)
            .unwrap();
        assert!(t.protection.ok());
        let t = read_telemetry_with_protection(&mut bus, id, Brand::Feetech, "sts3215", None, None)
            .unwrap();
        assert!(t.protection.has(ViolationType::VoltageHigh));

        sim.set_voltage(1, 120);
        sim.set_temperature(1, 50);
        let ov = ProtectionOverrides {
            temp_warning: Some(45.0),
            ..Default::default()
        };
        let t = read_telemetry_with_protection(
            &mut bus,
            id,
            Brand::Feetech,
            "sts3215",
            Some("c018"),
            Some(&ov),
        )
        .unwrap();
        assert_eq!(t.protection.status, StatusLevel::Warning);
        assert!(t.protection.has(ViolationType::TempWarning));
    }

    #[test]
    fn test_failures_yield_none() {
        let (_sim, mut bus) = bench();
        assert!(read_telemetry_with_protection(
            &mut bus,
            MotorId::Serial(1),
            Brand::Damiao,
            "dm4310",
            None,
            None
        )
        .is_none());
        assert!(read_telemetry_with_protection(
            &mut bus,
            MotorId::Serial(1),
            Brand::Feetech,
            "nope",
            None,
            None
        )
        .is_none());
        assert!(read_telemetry_with_protection(
            &mut bus,
            MotorId::Serial(8),
            Brand::Feetech,
            "sts3215",
            None,
            None
        )
        .is_none());
    }
}
