use motor_registry::{
    effective_protection, Brand, BusType, ModelInfo, ModelRegistry, MotorId, OverrideProvider,
    ProtectionParams,
};
use safety_guard::check_violations;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::driver::MotorDriver;
use crate::error::{BusError, Result};
use crate::telemetry::Telemetry;

/// Per-item results of a best-effort batch operation.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub succeeded: Vec<(MotorId, T)>,
    pub failed: Vec<(MotorId, BusError)>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BatchOutcome<T> {
    pub fn push(&mut self, id: MotorId, result: Result<T>) {
        match result {
            Ok(v) => self.succeeded.push((id, v)),
            Err(e) => self.failed.push((id, e)),
        }
    }

    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> FromIterator<(MotorId, Result<T>)> for BatchOutcome<T> {
    fn from_iter<I: IntoIterator<Item = (MotorId, Result<T>)>>(iter: I) -> Self {
        let mut out = Self::default();
        for (id, result) in iter {
            out.push(id, result);
        }
        out
    }
}

impl<T> fmt::Display for BatchOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} succeeded", self.succeeded.len(), self.len())?;
        for (id, e) in &self.failed {
            write!(f, "; {id}: {e}")?;
        }
        Ok(())
    }
}

/// Id range scanned when the caller gives none.
pub fn default_scan_range(bus_type: BusType) -> RangeInclusive<u16> {
    match bus_type {
        BusType::FeetechSerial => 1..=253,
        BusType::DynamixelSerial => 1..=252,
        BusType::DamiaoCan => 1..=32,
    }
}

/// Brand-agnostic view of one physical bus and the motors found on it.
pub struct MotorBus {
    bus_type: BusType,
    driver: Box<dyn MotorDriver>,
    registry: Arc<ModelRegistry>,
    motors: BTreeMap<MotorId, Option<ModelInfo>>,
    overrides: Option<Arc<dyn OverrideProvider>>,
}

impl fmt::Debug for MotorBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MotorBus")
            .field("bus_type", &self.bus_type)
            .field("interface", &self.driver.interface())
            .field("rate", &self.driver.rate())
            .field("motors", &self.motors.len())
            .finish()
    }
}

impl MotorBus {
    pub fn new(
        bus_type: BusType,
        driver: Box<dyn MotorDriver>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            bus_type,
            driver,
            registry,
            motors: BTreeMap::new(),
            overrides: None,
        }
    }

    pub fn with_overrides(mut self, overrides: Arc<dyn OverrideProvider>) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn set_overrides(&mut self, overrides: Option<Arc<dyn OverrideProvider>>) {
        self.overrides = overrides;
    }

    pub fn bus_type(&self) -> BusType {
        self.bus_type
    }

    pub fn brand(&self) -> Brand {
        self.bus_type.brand()
    }

    pub fn interface(&self) -> &str {
        self.driver.interface()
    }

    pub fn rate(&self) -> u32 {
        self.driver.rate()
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }

    pub fn connect(&mut self) -> Result<()> {
        self.driver.connect()
    }

    /// Close the driver and forget every motor. The registry is cleared even when closing fails.
    pub fn disconnect(&mut self) -> Result<()> {
        let result = self.driver.disconnect();
        self.motors.clear();
        if let Err(e) = &result {
            tracing::warn!(interface = %self.interface(), error = %e, "error while closing bus");
        }
        result
    }

    /// Scan `ids` (the bus type's full range when `None`) and record every identified motor.
    ///
    /// On CAN buses the range is the set of send ids to probe.
    pub fn scan_motors(
        &mut self,
        ids: Option<RangeInclusive<u16>>,
    ) -> Result<BTreeMap<MotorId, ModelInfo>> {
        let range = ids.unwrap_or_else(|| default_scan_range(self.bus_type));
        let candidates: Vec<u16> = range.collect();
        self.scan_ids(&candidates)
    }

    /// Same as [`scan_motors`](Self::scan_motors) over an explicit id list.
    pub fn scan_ids(&mut self, candidates: &[u16]) -> Result<BTreeMap<MotorId, ModelInfo>> {
        if !self.driver.is_connected() {
            return Err(BusError::NotConnected);
        }
        tracing::debug!(
            bus = %self.bus_type,
            interface = %self.interface(),
            candidates = candidates.len(),
            "scanning"
        );
        let found: BTreeMap<MotorId, ModelInfo> =
            self.driver.scan(candidates)?.into_iter().collect();
        for (id, model) in &found {
            self.motors.insert(*id, Some(model.clone()));
        }
        tracing::info!(bus = %self.bus_type, found = found.len(), "scan complete");
        Ok(found)
    }

    /// Model info for a known motor.
    pub fn get_motor(&self, id: MotorId) -> Option<&ModelInfo> {
        self.motors.get(&id).and_then(Option::as_ref)
    }

    /// Every registered id, identified or not.
    pub fn motor_ids(&self) -> Vec<MotorId> {
        self.motors.keys().copied().collect()
    }

    /// Identified motors only.
    pub fn motors(&self) -> impl Iterator<Item = (MotorId, &ModelInfo)> {
        self.motors
            .iter()
            .filter_map(|(id, m)| m.as_ref().map(|m| (*id, m)))
    }

    /// Track a motor known from configuration; the model is resolved on first use when `None`.
    pub fn register_motor(&mut self, id: MotorId, model: Option<ModelInfo>) {
        self.motors.insert(id, model);
    }

    /// Ask the motor what it is and remember the answer.
    pub fn identify_motor(&mut self, id: MotorId) -> Result<ModelInfo> {
        match self.driver.identify(id) {
            Ok(model) => {
                self.motors.insert(id, Some(model.clone()));
                Ok(model)
            }
            Err(e) if e.is_link_failure() => Err(e),
            Err(e) => {
                tracing::warn!(%id, error = %e, "identification failed");
                Err(BusError::NotFound(id))
            }
        }
    }

    fn model_for(&mut self, id: MotorId) -> Result<ModelInfo> {
        match self.get_motor(id) {
            Some(model) => Ok(model.clone()),
            None => self.identify_motor(id),
        }
    }

    /// Read one motor and evaluate its protection status.
    pub fn read_telemetry(&mut self, id: MotorId) -> Result<Telemetry> {
        let model = self.model_for(id)?;
        let params = self.protection_for(&model);
        self.read_checked(id, &model, &params)
    }

    /// Model defaults merged with the bus-level override provider.
    pub fn protection_for(&self, model: &ModelInfo) -> ProtectionParams {
        effective_protection(model, self.overrides.as_deref())
    }

    pub(crate) fn read_checked(
        &mut self,
        id: MotorId,
        model: &ModelInfo,
        params: &ProtectionParams,
    ) -> Result<Telemetry> {
        let mut telemetry = self.driver.read_telemetry(id, model)?;
        telemetry.protection = check_violations(params, &telemetry.metrics());
        Ok(telemetry)
    }

    pub fn read_bulk_telemetry(&mut self, ids: &[MotorId]) -> BatchOutcome<Telemetry> {
        ids.iter()
            .map(|&id| (id, self.read_telemetry(id)))
            .collect()
    }

    /// rad
    pub fn set_position(&mut self, id: MotorId, position: f64) -> Result<()> {
        let model = self.model_for(id)?;
        self.driver.set_position(id, &model, position)
    }

    pub fn set_positions(&mut self, targets: &[(MotorId, f64)]) -> BatchOutcome<()> {
        targets
            .iter()
            .map(|&(id, p)| (id, self.set_position(id, p)))
            .collect()
    }

    pub fn set_torque(&mut self, id: MotorId, enable: bool) -> Result<()> {
        self.driver.set_torque(id, enable)
    }

    pub fn bulk_set_torque(&mut self, ids: &[MotorId], enable: bool) -> BatchOutcome<()> {
        let outcome: BatchOutcome<()> = self
            .driver
            .bulk_set_torque(ids, enable)
            .into_iter()
            .collect();
        if !outcome.all_ok() {
            tracing::warn!(enable, %outcome, "bulk torque partially failed");
        }
        outcome
    }

    pub fn reboot_motor(&mut self, id: MotorId) -> Result<()> {
        self.driver.reboot(id)
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::driver::{DamiaoDriver, DynamixelDriver, FeetechDriver};
    use crate::sim::{DamiaoSim, DynamixelSim, FeetechSim, SimMotor, SimRig};
    use safety_guard::{StatusLevel, ViolationType};

    fn feetech_bus(sim: FeetechSim) -> MotorBus {
        let rig = SimRig::new();
        rig.attach_feetech("/dev/ttySIM", sim);
        let registry = Arc::new(ModelRegistry::builtin());
        let driver = FeetechDriver::new("/dev/ttySIM", 1_000_000, Arc::new(rig), registry.clone());
        MotorBus::new(BusType::FeetechSerial, Box::new(driver), registry)
    }

    #[test]
    fn test_scan_finds_single_servo_as_base_model() {
        let sim = FeetechSim::new(1_000_000);
        sim.add_servo(5, 0x0C8F, (3, 0));
        let mut bus = feetech_bus(sim);
        bus.connect().unwrap();
        let found = bus.scan_motors(Some(1..=10)).unwrap();
        assert_eq!(found.len(), 1);
        let model = &found[&MotorId::Serial(5)];
        assert_eq!(model.model, "sts3215");
        assert!(model.is_base());
    }

    #[test]
    fn test_scan_requires_connection() {
        let mut bus = feetech_bus(FeetechSim::new(1_000_000));
        assert!(matches!(bus.scan_motors(Some(1..=3)), Err(BusError::NotConnected)));
    }

    #[test]
    fn test_disconnect_is_idempotent_and_clears_registry() {
        let sim = FeetechSim::new(1_000_000);
        sim.add_servo(1, 777, (3, 6));
        let mut bus = feetech_bus(sim);
        bus.connect().unwrap();
        bus.scan_motors(Some(1..=2)).unwrap();
        assert!(bus.get_motor(MotorId::Serial(1)).is_some());
        bus.disconnect().unwrap();
        bus.disconnect().unwrap();
        assert!(bus.get_motor(MotorId::Serial(1)).is_none());
        assert!(!bus.is_connected());
    }

    #[test]
    fn test_read_telemetry_applies_protection() {
        let sim = FeetechSim::new(1_000_000);
        sim.add_servo(2, 777, (3, 6));
        sim.set_temperature(2, 75);
        let mut bus = feetech_bus(sim.clone());
        bus.connect().unwrap();
        let t = bus.read_telemetry(MotorId::Serial(2)).unwrap();
        assert_eq!(t.position, 0.0);
        assert_eq!(t.voltage, Some(7.4));
        assert_eq!(t.protection.status, StatusLevel::Critical);
        assert!(t.protection.has(ViolationType::TempCritical));
    }

    #[test]
    fn test_bulk_operations_report_per_motor() {
        let sim = FeetechSim::new(1_000_000);
        sim.add_servo(1, 777, (3, 6));
        let mut bus = feetech_bus(sim.clone());
        bus.connect().unwrap();
        let ids = [MotorId::Serial(1), MotorId::Serial(9)];
        let outcome = bus.bulk_set_torque(&ids, true);
        assert!(!outcome.all_ok());
        assert_eq!(outcome.succeeded.len(), 1);
        assert_eq!(outcome.failed[0].0, MotorId::Serial(9));
        assert!(sim.torque_enabled(1));

        let reads = bus.read_bulk_telemetry(&ids);
        assert_eq!(reads.succeeded.len(), 1);
        assert!(matches!(reads.failed[0].1, BusError::NotFound(_)));
    }

    #[test]
    fn test_set_position_writes_goal() {
        let sim = FeetechSim::new(1_000_000);
        sim.add_servo(4, 777, (3, 6));
        let mut bus = feetech_bus(sim.clone());
        bus.connect().unwrap();
        bus.set_position(MotorId::Serial(4), std::f64::consts::FRAC_PI_2)
            .unwrap();
        assert_eq!(sim.goal_position(4), Some(3072));
    }

    #[test]
    fn test_dynamixel_scan_and_load_reporting() {
        let sim = DynamixelSim::new(57_600);
        sim.add_servo(3, 1060, 45);
        sim.set_current(3, -125);
        let rig = SimRig::new();
        rig.attach_dynamixel("/dev/ttyDXL", sim.clone());
        let registry = Arc::new(ModelRegistry::builtin());
        let driver = DynamixelDriver::new("/dev/ttyDXL", 57_600, Arc::new(rig), registry.clone());
        let mut bus = MotorBus::new(BusType::DynamixelSerial, Box::new(driver), registry);
        bus.connect().unwrap();

        let found = bus.scan_motors(Some(1..=5)).unwrap();
        assert_eq!(found[&MotorId::Serial(3)].model, "xl430-w250");
        let t = bus.read_telemetry(MotorId::Serial(3)).unwrap();
        // xl430 has no current sense; the register is load in 0.1 %.
        assert!(t.current.is_none());
        assert!((t.load.unwrap() + 12.5).abs() < 1e-9);
        assert_eq!(t.voltage, Some(12.0));
        assert!(t.protection.ok());

        sim.set_hardware_error(3, 0x04);
        assert_eq!(bus.read_telemetry(MotorId::Serial(3)).unwrap().hardware_error, 0x04);
        bus.reboot_motor(MotorId::Serial(3)).unwrap();
        assert!(!sim.torque_enabled(3));
    }

    #[test]
    fn test_can_scan_pairs_send_and_reply_ids() {
        let sim = DamiaoSim::new(1_000_000);
        sim.add_motor(SimMotor::new(3, 7, 12.5, 30.0, 10.0));
        let rig = SimRig::new();
        rig.attach_damiao("mock0", sim.clone());
        let registry = Arc::new(ModelRegistry::builtin());
        let driver = DamiaoDriver::new("mock0", 1_000_000, Arc::new(rig), registry.clone())
            .with_batch_delay(std::time::Duration::ZERO);
        let mut bus = MotorBus::new(BusType::DamiaoCan, Box::new(driver), registry);
        bus.connect().unwrap();

        let found = bus.scan_motors(Some(1..=10)).unwrap();
        let key = MotorId::can(3, 7);
        assert_eq!(found.keys().copied().collect::<Vec<_>>(), vec![key]);
        assert_eq!(found[&key].model, "dm4310");
        let probed = sim.probed_ids();
        assert!(probed.contains(&3));
        assert!(!probed.contains(&7));
    }

    #[test]
    fn test_can_scan_skips_inconsistent_reply() {
        let sim = DamiaoSim::new(1_000_000);
        sim.add_motor(SimMotor::new(2, 0x12, 12.5, 30.0, 10.0).misreporting(5));
        let rig = SimRig::new();
        rig.attach_damiao("mock0", sim);
        let registry = Arc::new(ModelRegistry::builtin());
        let driver = DamiaoDriver::new("mock0", 1_000_000, Arc::new(rig), registry.clone())
            .with_batch_delay(std::time::Duration::ZERO);
        let mut bus = MotorBus::new(BusType::DamiaoCan, Box::new(driver), registry);
        bus.connect().unwrap();
        assert!(bus.scan_motors(Some(1..=4)).unwrap().is_empty());
    }

    #[test]
    fn test_damiao_telemetry_and_commands() {
        let sim = DamiaoSim::new(1_000_000);
        sim.add_motor(SimMotor::new(1, 0x11, 12.5, 30.0, 10.0));
        sim.set_temperature(1, 40, 85);
        sim.set_torque(1, 1.89);
        let rig = SimRig::new();
        rig.attach_damiao("mock0", sim.clone());
        let registry = Arc::new(ModelRegistry::builtin());
        let driver = DamiaoDriver::new("mock0", 1_000_000, Arc::new(rig), registry.clone());
        let mut bus = MotorBus::new(BusType::DamiaoCan, Box::new(driver), registry);
        bus.connect().unwrap();
        let id = MotorId::can(1, 0x11);

        let t = bus.read_telemetry(id).unwrap();
        assert_eq!(t.temperature, 85.0);
        assert!(t.voltage.is_none());
        let current = t.current.unwrap();
        assert!((current - 2000.0).abs() < 20.0, "current {current}");
        assert_eq!(t.protection.status, StatusLevel::Critical);

        bus.set_torque(id, true).unwrap();
        assert!(sim.motor(1).unwrap().enabled);
        bus.set_position(id, 1.0).unwrap();
        assert!((sim.motor(1).unwrap().position - 1.0).abs() < 1e-3);
        let t = bus.read_telemetry(id).unwrap();
        assert_eq!(t.goal_position, Some(1.0));
    }

    #[test]
    fn test_damiao_commands_to_silent_motor_fail() {
        let sim = DamiaoSim::new(1_000_000);
        sim.add_motor(SimMotor::new(1, 0x11, 12.5, 30.0, 10.0));
        let rig = SimRig::new();
        rig.attach_damiao("mock0", sim.clone());
        let registry = Arc::new(ModelRegistry::builtin());
        let driver = DamiaoDriver::new("mock0", 1_000_000, Arc::new(rig), registry.clone());
        let mut bus = MotorBus::new(BusType::DamiaoCan, Box::new(driver), registry);
        bus.connect().unwrap();
        let present = MotorId::can(1, 0x11);
        let absent = MotorId::can(5, 0x15);

        assert!(matches!(
            bus.set_torque(absent, false),
            Err(BusError::Timeout(id)) if id == absent
        ));
        assert!(bus.reboot_motor(absent).is_err());

        let outcome = bus.bulk_set_torque(&[present, absent], false);
        assert!(!outcome.all_ok());
        assert_eq!(outcome.succeeded.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, absent);
        assert!(!sim.motor(1).unwrap().enabled);
    }
}
