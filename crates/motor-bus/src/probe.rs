//! Rate and brand auto-detection for an interface nobody has described yet.

use can_transport::InterfaceKind;
use motor_registry::{Brand, BusType, ModelInfo, MotorDefinition, MotorId, RobotDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::factory::BusFactory;

/// Ids scanned at each combination unless the request names its own.
pub const DEFAULT_PROBE_IDS: std::ops::RangeInclusive<u16> = 1..=10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceClass {
    Serial,
    Can,
}

impl InterfaceClass {
    pub fn of(interface: &str) -> Self {
        if InterfaceKind::is_can_like(interface) {
            InterfaceClass::Can
        } else {
            InterfaceClass::Serial
        }
    }

    /// Bus types that can live on this kind of interface, most common first.
    pub fn bus_types(self) -> &'static [BusType] {
        match self {
            InterfaceClass::Serial => &[BusType::FeetechSerial, BusType::DynamixelSerial],
            InterfaceClass::Can => &[BusType::DamiaoCan],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub interface: String,
    /// Detected from the interface string when `None`.
    pub kind: Option<InterfaceClass>,
    /// Narrows the candidate bus types; the interface class decides when `None`.
    pub bus_types: Option<Vec<BusType>>,
    /// Every candidate brand is tried at each of these rates when given.
    pub rates: Option<Vec<u32>>,
    pub ids: Option<Vec<u16>>,
}

impl ProbeRequest {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            kind: None,
            bus_types: None,
            rates: None,
            ids: None,
        }
    }

    pub fn class(&self) -> InterfaceClass {
        self.kind
            .unwrap_or_else(|| InterfaceClass::of(&self.interface))
    }

    pub fn candidate_types(&self) -> Vec<BusType> {
        match &self.bus_types {
            Some(types) => types.clone(),
            None => self.class().bus_types().to_vec(),
        }
    }

    /// `(bus type, rate)` attempts in order: rate-major, then brand.
    pub fn plan(&self) -> Vec<(BusType, u32)> {
        let types = self.candidate_types();
        let rates: Vec<u32> = match &self.rates {
            Some(r) => r.clone(),
            None => {
                let mut seen = Vec::new();
                for rate in types.iter().flat_map(|t| t.likely_rates()) {
                    if !seen.contains(rate) {
                        seen.push(*rate);
                    }
                }
                seen
            }
        };
        let explicit = self.rates.is_some();
        rates
            .into_iter()
            .flat_map(|rate| {
                types
                    .iter()
                    .filter(|t| explicit || t.likely_rates().contains(&rate))
                    .map(|t| (*t, rate))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredMotor {
    pub id: MotorId,
    pub model: ModelInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub interface: String,
    pub brand: Brand,
    pub bus_type: BusType,
    pub rate: u32,
    pub motors: Vec<DiscoveredMotor>,
    /// Ids of known robots whose required motors for this brand are exactly these.
    pub matching_robots: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Found(ProbeResult),
    NoMotorsFound,
}

impl ProbeOutcome {
    pub fn found(&self) -> Option<&ProbeResult> {
        match self {
            ProbeOutcome::Found(r) => Some(r),
            ProbeOutcome::NoMotorsFound => None,
        }
    }
}

/// Try each planned combination until one yields an identified motor.
///
/// Open and scan failures are logged and the next combination is tried; running out of
/// combinations is [`ProbeOutcome::NoMotorsFound`], not an error.
pub fn probe(
    request: &ProbeRequest,
    factory: &dyn BusFactory,
    robots: &[RobotDefinition],
) -> ProbeOutcome {
    let ids: Vec<u16> = request
        .ids
        .clone()
        .unwrap_or_else(|| DEFAULT_PROBE_IDS.collect());
    for (bus_type, rate) in request.plan() {
        let span = tracing::debug_span!("probe", interface = %request.interface, bus = %bus_type, rate);
        let _enter = span.enter();

        let mut bus = match factory.create(bus_type, &request.interface, rate) {
            Ok(bus) => bus,
            Err(e) => {
                tracing::warn!(error = %e, "cannot build bus");
                continue;
            }
        };
        if let Err(e) = bus.connect() {
            tracing::warn!(error = %e, "cannot open interface");
            continue;
        }
        let scanned = bus.scan_ids(&ids);
        if let Err(e) = bus.disconnect() {
            tracing::debug!(error = %e, "close after probe failed");
        }
        match scanned {
            Ok(found) if !found.is_empty() => {
                let motors: Vec<DiscoveredMotor> = found
                    .into_iter()
                    .map(|(id, model)| DiscoveredMotor { id, model })
                    .collect();
                let brand = bus_type.brand();
                let matching_robots = matching_robots(brand, &motors, robots);
                tracing::info!(
                    found = motors.len(),
                    robots = matching_robots.len(),
                    "probe hit"
                );
                return ProbeOutcome::Found(ProbeResult {
                    interface: request.interface.clone(),
                    brand,
                    bus_type,
                    rate,
                    motors,
                    matching_robots,
                });
            }
            Ok(_) => tracing::debug!("nothing answered"),
            Err(e) => tracing::warn!(error = %e, "scan failed"),
        }
    }
    tracing::info!(interface = %request.interface, "no motors found");
    ProbeOutcome::NoMotorsFound
}

/// Robots whose required `brand` motors have exactly the discovered ids and compatible models.
pub fn matching_robots(
    brand: Brand,
    motors: &[DiscoveredMotor],
    robots: &[RobotDefinition],
) -> Vec<String> {
    let found_ids: BTreeSet<MotorId> = motors.iter().map(|m| m.id).collect();
    robots
        .iter()
        .filter(|robot| {
            let required = robot.required_motors(brand);
            if required.is_empty() {
                return false;
            }
            let required_ids: BTreeSet<MotorId> = required.iter().map(|m| m.id).collect();
            required_ids == found_ids
                && required.iter().all(|req| {
                    motors
                        .iter()
                        .find(|m| m.id == req.id)
                        .is_some_and(|m| model_compatible(req, &m.model))
                })
        })
        .map(|robot| robot.id.clone())
        .collect()
}

/// Case-insensitive substring on the model; variants compared only when both sides have one.
fn model_compatible(required: &MotorDefinition, found: &ModelInfo) -> bool {
    let model_ok = found
        .model
        .to_ascii_lowercase()
        .contains(&required.model.to_ascii_lowercase());
    let variant_ok = match (required.variant.as_deref(), found.variant.as_deref()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => true,
    };
    model_ok && variant_ok
}


#[cfg(all(test, feature = "mock"))]
mod sim_tests {
    use super::*;
    use crate::error::Result;
    use crate::factory::DefaultBusFactory;
    use crate::link::{LinkProvider, SerialLink};
    use crate::sim::{FeetechSim, SimRig};
    use can_transport::CanBus;
    use motor_registry::ModelRegistry;
    use std::sync::{Arc, Mutex};

    /// Records every open so tests can see which combinations were tried.
    struct Recording {
        rig: SimRig,
        opened: Mutex<Vec<u32>>,
    }

    impl LinkProvider for Recording {
        fn open_serial(&self, path: &str, baud: u32) -> Result<Box<dyn SerialLink>> {
            self.opened.lock().unwrap().push(baud);
            self.rig.open_serial(path, baud)
        }

        fn open_can(&self, interface: &str, bitrate: u32) -> Result<Box<dyn CanBus>> {
            self.opened.lock().unwrap().push(bitrate);
            self.rig.open_can(interface, bitrate)
        }
    }

    const ARM: &str = r#"
id: arm
connections:
  - name: servos
    bus:
      type: feetech_serial
      rate: 500000
      motors:
        a: { id: 1, brand: feetech, model: STS3215 }
        b: { id: 2, brand: feetech, model: sts3215, variant: c001 }
"#;

    const OTHER: &str = r#"
id: other
connections:
  - name: servos
    bus:
      type: feetech_serial
      rate: 500000
      motors:
        a: { id: 1, brand: feetech, model: sts3215 }
"#;

    #[test]
    fn test_probe_stops_at_first_working_combination() {
        let sim = FeetechSim::new(500_000);
        sim.add_servo(1, 777, (3, 0));
        sim.add_servo(2, 777, (3, 6));
        let rig = SimRig::new();
        rig.attach_feetech("/dev/ttyUSB0", sim);
        let links = Arc::new(Recording {
            rig,
            opened: Mutex::new(Vec::new()),
        });
        let factory = DefaultBusFactory::new(links.clone(), Arc::new(ModelRegistry::builtin()));
        let robots: Vec<RobotDefinition> = vec![
            serde_yaml::from_str(ARM).unwrap(),
            serde_yaml::from_str(OTHER).unwrap(),
        ];

        let outcome = probe(&ProbeRequest::new("/dev/ttyUSB0"), &factory, &robots);
        let result = outcome.found().unwrap();
        assert_eq!(result.brand, Brand::Feetech);
        assert_eq!(result.rate, 500_000);
        assert_eq!(result.motors.len(), 2);
        assert_eq!(result.matching_robots, vec!["arm".to_string()]);
        assert_eq!(
            *links.opened.lock().unwrap(),
            vec![1_000_000, 1_000_000, 500_000]
        );
    }

    #[test]
    fn test_probe_reports_nothing_found() {
        let rig = SimRig::new();
        rig.attach_feetech("/dev/ttyUSB0", FeetechSim::new(1_000_000));
        let factory = DefaultBusFactory::new(Arc::new(rig), Arc::new(ModelRegistry::builtin()));
        let mut req = ProbeRequest::new("/dev/ttyUSB0");
        req.rates = Some(vec![1_000_000]);
        assert_eq!(probe(&req, &factory, &[]), ProbeOutcome::NoMotorsFound);

        // A missing port is skipped, not fatal.
        let req = ProbeRequest::new("/dev/ttyMISSING");
        assert_eq!(probe(&req, &factory, &[]), ProbeOutcome::NoMotorsFound);
    }
}
