use async_trait::async_trait;
use motor_bus::{probe, BusFactory, ProbeOutcome, ProbeRequest};
use motor_registry::{RobotConnection, RobotDefinition};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Result, VerifyError};
use crate::types::{DiscoveredBus, RobotRecord};

/// Lists the buses currently attached to the host.
#[async_trait]
pub trait BusDiscovery: Send + Sync {
    /// `robots` are the definitions about to be checked; a source may use them to decide
    /// what to look for.
    async fn discover(&self, robots: &[RobotDefinition]) -> Result<Vec<DiscoveredBus>>;
}

/// Persisted robots.
#[async_trait]
pub trait RobotStore: Send + Sync {
    async fn get(&self, id: &str) -> Option<RobotRecord>;
    async fn list(&self) -> Vec<RobotRecord>;
    async fn upsert(&self, record: RobotRecord);
    /// `true` when a record was removed.
    async fn remove(&self, id: &str) -> bool;
}

#[derive(Debug, Default)]
pub struct MemoryRobotStore {
    robots: RwLock<BTreeMap<String, RobotRecord>>,
}

impl MemoryRobotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RobotStore for MemoryRobotStore {
    async fn get(&self, id: &str) -> Option<RobotRecord> {
        self.robots.read().await.get(id).cloned()
    }

    async fn list(&self) -> Vec<RobotRecord> {
        self.robots.read().await.values().cloned().collect()
    }

    async fn upsert(&self, record: RobotRecord) {
        self.robots
            .write()
            .await
            .insert(record.id().to_string(), record);
    }

    async fn remove(&self, id: &str) -> bool {
        self.robots.write().await.remove(id).is_some()
    }
}

/// Fixed discovery result, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    buses: RwLock<Vec<DiscoveredBus>>,
}

impl StaticDiscovery {
    pub fn new(buses: Vec<DiscoveredBus>) -> Self {
        Self {
            buses: RwLock::new(buses),
        }
    }

    pub async fn set(&self, buses: Vec<DiscoveredBus>) {
        *self.buses.write().await = buses;
    }
}

#[async_trait]
impl BusDiscovery for StaticDiscovery {
    async fn discover(&self, _robots: &[RobotDefinition]) -> Result<Vec<DiscoveredBus>> {
        Ok(self.buses.read().await.clone())
    }
}

/// An adapter the host knows about, as reported by the device registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub interface: String,
    pub serial_number: Option<String>,
}

/// Discovery by probing every known adapter.
///
/// An adapter that some robot's connection points at is probed with that connection's bus
/// type, rate and motor ids; any other adapter gets the default auto-detection. Adapters
/// where nothing answers are still reported, with no motors: the connection is there even
/// if the motors are not.
pub struct ProbeDiscovery {
    factory: Arc<dyn BusFactory>,
    devices: Vec<DeviceInfo>,
}

impl ProbeDiscovery {
    pub fn new(factory: Arc<dyn BusFactory>, devices: Vec<DeviceInfo>) -> Self {
        Self { factory, devices }
    }
}

fn serves(connection: &RobotConnection, device: &DeviceInfo) -> bool {
    let by_serial = connection.serial_number.is_some()
        && connection.serial_number == device.serial_number;
    by_serial || connection.interface.as_deref() == Some(device.interface.as_str())
}

/// What to look for on `device`, given the robots that expect hardware there.
pub fn probe_request_for(device: &DeviceInfo, robots: &[RobotDefinition]) -> ProbeRequest {
    let mut request = ProbeRequest::new(device.interface.clone());
    let mut types = Vec::new();
    let mut rates = Vec::new();
    let mut ids = BTreeSet::new();
    let expected = robots
        .iter()
        .flat_map(|r| &r.connections)
        .filter(|c| serves(c, device))
        .filter_map(|c| c.bus.as_ref());
    for bus in expected {
        if !types.contains(&bus.bus_type) {
            types.push(bus.bus_type);
        }
        if !rates.contains(&bus.rate) {
            rates.push(bus.rate);
        }
        ids.extend(bus.motors.values().map(|m| m.id.address()));
    }
    if types.is_empty() {
        return request;
    }
    request.bus_types = Some(types);
    request.rates = Some(rates);
    if !ids.is_empty() {
        request.ids = Some(ids.into_iter().collect());
    }
    request
}

#[async_trait]
impl BusDiscovery for ProbeDiscovery {
    async fn discover(&self, robots: &[RobotDefinition]) -> Result<Vec<DiscoveredBus>> {
        let mut buses = Vec::with_capacity(self.devices.len());
        for device in &self.devices {
            let factory = self.factory.clone();
            let request = probe_request_for(device, robots);
            let outcome = tokio::task::spawn_blocking(move || probe(&request, factory.as_ref(), &[]))
                .await
                .map_err(|e| VerifyError::Discovery(e.to_string()))?;
            let mut bus = DiscoveredBus::new(device.interface.clone());
            bus.serial_number = device.serial_number.clone();
            if let ProbeOutcome::Found(result) = outcome {
                bus.bus_type = Some(result.bus_type);
                bus.motors = result.motors;
            }
            tracing::debug!(
                interface = %bus.interface,
                motors = bus.motors.len(),
                "discovered"
            );
            buses.push(bus);
        }
        Ok(buses)
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use motor_bus::sim::{FeetechSim, SimRig};
    use motor_bus::DefaultBusFactory;
    use crate::verifier::RobotVerifier;
    use motor_registry::{BusType, ModelRegistry, MotorId};

    #[tokio::test]
    async fn test_probe_discovery_reports_empty_adapters() {
        let sim = FeetechSim::new(1_000_000);
        sim.add_servo(3, 777, (3, 0));
        let rig = SimRig::new();
        rig.attach_feetech("/dev/ttyACM0", sim);
        rig.attach_feetech("/dev/ttyACM1", FeetechSim::new(1_000_000));
        let factory = Arc::new(DefaultBusFactory::new(
            Arc::new(rig),
            Arc::new(ModelRegistry::builtin()),
        ));
        let discovery = ProbeDiscovery::new(
            factory,
            vec![
                DeviceInfo {
                    interface: "/dev/ttyACM0".into(),
                    serial_number: Some("A1".into()),
                },
                DeviceInfo {
                    interface: "/dev/ttyACM1".into(),
                    serial_number: None,
                },
            ],
        );
        let buses = discovery.discover(&[]).await.unwrap();
        assert_eq!(buses.len(), 2);
        assert_eq!(buses[0].bus_type, Some(BusType::FeetechSerial));
        assert_eq!(buses[0].serial_number.as_deref(), Some("A1"));
        assert!(buses[0].motor(MotorId::Serial(3)).is_some());
        assert!(buses[1].motors.is_empty());
        assert_eq!(buses[1].bus_type, None);
    }

    const HIGH_IDS: &str = r#"
id: gantry
connections:
  - name: servos
    serial_number: "B7"
    bus:
      type: feetech_serial
      rate: 500000
      motors:
        x: { id: 12, brand: feetech, model: sts3215 }
        y: { id: 14, brand: feetech, model: sts3215 }
"#;

    #[test]
    fn test_request_follows_matching_connections() {
        let robot: RobotDefinition = serde_yaml::from_str(HIGH_IDS).unwrap();
        let device = DeviceInfo {
            interface: "/dev/ttyUSB3".into(),
            serial_number: Some("B7".into()),
        };
        let req = probe_request_for(&device, std::slice::from_ref(&robot));
        assert_eq!(req.bus_types, Some(vec![BusType::FeetechSerial]));
        assert_eq!(req.rates, Some(vec![500_000]));
        assert_eq!(req.ids, Some(vec![12, 14]));

        let other = DeviceInfo {
            interface: "/dev/ttyUSB4".into(),
            serial_number: None,
        };
        assert_eq!(probe_request_for(&other, &[robot]), ProbeRequest::new("/dev/ttyUSB4"));
    }

    #[tokio::test]
    async fn test_discovery_finds_ids_above_default_range() {
        let sim = FeetechSim::new(500_000);
        sim.add_servo(12, 777, (3, 0));
        sim.add_servo(14, 777, (3, 0));
        let rig = SimRig::new();
        rig.attach_feetech("/dev/ttyUSB3", sim);
        let factory = Arc::new(DefaultBusFactory::new(
            Arc::new(rig),
            Arc::new(ModelRegistry::builtin()),
        ));
        let discovery = ProbeDiscovery::new(
            factory,
            vec![DeviceInfo {
                interface: "/dev/ttyUSB3".into(),
                serial_number: Some("B7".into()),
            }],
        );
        let robot: RobotDefinition = serde_yaml::from_str(HIGH_IDS).unwrap();

        // Auto-detection alone only looks at ids 1..=10.
        let blind = discovery.discover(&[]).await.unwrap();
        assert!(blind[0].motors.is_empty());

        let buses = discovery.discover(std::slice::from_ref(&robot)).await.unwrap();
        assert!(buses[0].motor(MotorId::Serial(12)).is_some());
        assert!(buses[0].motor(MotorId::Serial(14)).is_some());

        let verifier = RobotVerifier::new(Arc::new(MemoryRobotStore::new()), Arc::new(discovery));
        let verification = verifier.verify_robot(robot).await.unwrap();
        assert!(verification.is_available());
    }
}
