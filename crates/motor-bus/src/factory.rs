use motor_registry::{BusType, ModelRegistry};
use std::sync::Arc;

use crate::bus::MotorBus;
use crate::driver::{DamiaoDriver, DynamixelDriver, FeetechDriver, MotorDriver};
use crate::error::{BusError, Result};
use crate::link::LinkProvider;

/// Resolve a brand name (`feetech`, `dxl`, ...) or bus type (`damiao_can`, ...).
pub fn resolve_bus_type(brand_or_type: &str) -> Result<BusType> {
    brand_or_type
        .parse::<BusType>()
        .map_err(|_| BusError::UnknownBusType(brand_or_type.to_string()))
}

/// Build an unconnected bus for `brand_or_type` on `interface`.
pub fn create_bus(
    brand_or_type: &str,
    interface: &str,
    rate: u32,
    links: Arc<dyn LinkProvider>,
    registry: Arc<ModelRegistry>,
) -> Result<MotorBus> {
    let bus_type = resolve_bus_type(brand_or_type)?;
    Ok(bus_for(bus_type, interface, rate, links, registry))
}

pub fn bus_for(
    bus_type: BusType,
    interface: &str,
    rate: u32,
    links: Arc<dyn LinkProvider>,
    registry: Arc<ModelRegistry>,
) -> MotorBus {
    let driver: Box<dyn MotorDriver> = match bus_type {
        BusType::FeetechSerial => Box::new(FeetechDriver::new(interface, rate, links, registry.clone())),
        BusType::DynamixelSerial => {
            Box::new(DynamixelDriver::new(interface, rate, links, registry.clone()))
        }
        BusType::DamiaoCan => Box::new(DamiaoDriver::new(interface, rate, links, registry.clone())),
    };
    MotorBus::new(bus_type, driver, registry)
}

/// Something that can hand out buses; sessions and the probe service take one of these.
pub trait BusFactory: Send + Sync {
    fn create(&self, bus_type: BusType, interface: &str, rate: u32) -> Result<MotorBus>;

    fn create_named(&self, brand_or_type: &str, interface: &str, rate: u32) -> Result<MotorBus> {
        self.create(resolve_bus_type(brand_or_type)?, interface, rate)
    }
}

/// Factory over one link provider and one model registry.
#[derive(Clone)]
pub struct DefaultBusFactory {
    links: Arc<dyn LinkProvider>,
    registry: Arc<ModelRegistry>,
}

impl DefaultBusFactory {
    pub fn new(links: Arc<dyn LinkProvider>, registry: Arc<ModelRegistry>) -> Self {
        Self { links, registry }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }
}

impl BusFactory for DefaultBusFactory {
    fn create(&self, bus_type: BusType, interface: &str, rate: u32) -> Result<MotorBus> {
        Ok(bus_for(
            bus_type,
            interface,
            rate,
            self.links.clone(),
            self.registry.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::SystemLinks;
    use motor_registry::Brand;

    #[test]
    fn test_brand_aliases_resolve() {
        let links: Arc<dyn LinkProvider> = Arc::new(SystemLinks);
        let registry = Arc::new(ModelRegistry::builtin());
        let bus = create_bus("Feetech", "/dev/ttyUSB0", 1_000_000, links.clone(), registry.clone())
            .unwrap();
        assert_eq!(bus.bus_type(), BusType::FeetechSerial);
        assert!(!bus.is_connected());

        let bus = create_bus("damiao_can", "can0", 1_000_000, links.clone(), registry.clone())
            .unwrap();
        assert_eq!(bus.brand(), Brand::Damiao);

        assert!(matches!(
            create_bus("maxon", "can0", 1_000_000, links, registry),
            Err(BusError::UnknownBusType(_))
        ));
    }
}
