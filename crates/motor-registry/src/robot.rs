use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::id::MotorId;
use crate::types::Brand;

/// Concrete bus implementation: one wire protocol on one physical medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum BusType {
    FeetechSerial,
    DynamixelSerial,
    DamiaoCan,
}

impl BusType {
    pub fn brand(self) -> Brand {
        match self {
            BusType::FeetechSerial => Brand::Feetech,
            BusType::DynamixelSerial => Brand::Dynamixel,
            BusType::DamiaoCan => Brand::Damiao,
        }
    }

    pub fn is_can(self) -> bool {
        self.brand().is_can()
    }

    /// Rates worth trying, most likely first.
    pub fn likely_rates(self) -> &'static [u32] {
        match self {
            BusType::FeetechSerial => &[1_000_000, 500_000, 250_000, 128_000, 115_200, 57_600],
            BusType::DynamixelSerial => &[1_000_000, 57_600, 115_200, 2_000_000, 3_000_000],
            BusType::DamiaoCan => &[1_000_000, 500_000, 250_000],
        }
    }

    pub fn default_rate(self) -> u32 {
        self.likely_rates()[0]
    }
}

impl From<Brand> for BusType {
    fn from(brand: Brand) -> Self {
        match brand {
            Brand::Feetech => BusType::FeetechSerial,
            Brand::Dynamixel => BusType::DynamixelSerial,
            Brand::Damiao => BusType::DamiaoCan,
        }
    }
}

impl fmt::Display for BusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BusType::FeetechSerial => "feetech_serial",
            BusType::DynamixelSerial => "dynamixel_serial",
            BusType::DamiaoCan => "damiao_can",
        })
    }
}

impl FromStr for BusType {
    type Err = String;

    /// Accepts a bus type name or any brand name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feetech_serial" => Ok(BusType::FeetechSerial),
            "dynamixel_serial" => Ok(BusType::DynamixelSerial),
            "damiao_can" => Ok(BusType::DamiaoCan),
            other => other.parse::<Brand>().map(BusType::from),
        }
    }
}

/// One motor a robot requires on a bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct MotorDefinition {
    pub id: MotorId,
    pub brand: Brand,
    pub model: String,
    #[serde(default)]
    pub variant: Option<String>,
}

/// Motors expected on one logical bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct MotorBusDefinition {
    #[serde(rename = "type")]
    pub bus_type: BusType,
    pub rate: u32,
    /// logical joint name → motor
    #[serde(default)]
    pub motors: BTreeMap<String, MotorDefinition>,
}

impl MotorBusDefinition {
    pub fn motors_of(&self, brand: Brand) -> impl Iterator<Item = &MotorDefinition> {
        self.motors.values().filter(move |m| m.brand == brand)
    }
}

/// A physical link the robot needs: a USB serial adapter or CAN channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct RobotConnection {
    pub name: String,
    /// USB serial number; preferred over `interface` when matching hardware.
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub bus: Option<MotorBusDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct RobotDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub connections: Vec<RobotConnection>,
}

impl RobotDefinition {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn buses(&self) -> impl Iterator<Item = &MotorBusDefinition> {
        self.connections.iter().filter_map(|c| c.bus.as_ref())
    }

    /// Every motor of `brand` required across all buses.
    pub fn required_motors(&self, brand: Brand) -> Vec<&MotorDefinition> {
        self.buses().flat_map(|b| b.motors_of(brand)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARM: &str = r#"
id: so100-left
name: Left arm
connections:
  - name: servo-bus
    serial_number: "5A46083062"
    bus:
      type: feetech_serial
      rate: 1000000
      motors:
        shoulder_pan: { id: 1, brand: feetech, model: sts3215, variant: c018 }
        gripper: { id: 6, brand: feetech, model: sts3215 }
  - name: wrist-can
    interface: can0
    bus:
      type: damiao_can
      rate: 1000000
      motors:
        wrist_roll: { id: { send: 1, recv: 17 }, brand: damiao, model: dm4310 }
"#;

    #[test]
    fn test_definition_yaml_shape() {
        let def: RobotDefinition = serde_yaml::from_str(ARM).unwrap();
        assert_eq!(def.display_name(), "Left arm");
        assert_eq!(def.connections.len(), 2);
        let feetech = def.required_motors(Brand::Feetech);
        assert_eq!(feetech.len(), 2);
        assert!(feetech.iter().any(|m| m.variant.as_deref() == Some("c018")));
        let dm = def.required_motors(Brand::Damiao);
        assert_eq!(dm[0].id, MotorId::can(1, 17));
    }

    #[test]
    fn test_bus_type_parsing() {
        assert_eq!("dxl".parse::<BusType>().unwrap(), BusType::DynamixelSerial);
        assert_eq!("damiao_can".parse::<BusType>().unwrap(), BusType::DamiaoCan);
        assert_eq!(BusType::FeetechSerial.default_rate(), 1_000_000);
        assert!(BusType::DamiaoCan.is_can());
    }
}
