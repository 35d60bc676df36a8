use motor_bus::DiscoveredMotor;
use motor_registry::{BusType, MotorId, RobotDefinition};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Available,
    Offline,
    Invalid,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceStatus::Available => "available",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Invalid => "invalid",
        })
    }
}

/// One bus currently visible on the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredBus {
    /// Runtime interface string (`/dev/ttyACM0`, `can0`, ...).
    pub interface: String,
    /// USB serial number of the adapter, when the host reports one.
    #[serde(default)]
    pub serial_number: Option<String>,
    /// `None` when the adapter is present but no motor answered.
    #[serde(default)]
    pub bus_type: Option<BusType>,
    #[serde(default)]
    pub motors: Vec<DiscoveredMotor>,
}

impl DiscoveredBus {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            serial_number: None,
            bus_type: None,
            motors: Vec::new(),
        }
    }

    pub fn with_serial_number(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    pub fn motor(&self, id: MotorId) -> Option<&DiscoveredMotor> {
        self.motors.iter().find(|m| m.id == id)
    }
}

/// Why a robot is not available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum Issue {
    ConnectionMissing {
        connection: String,
    },
    MotorCount {
        connection: String,
        expected: usize,
        found: usize,
    },
    MotorMissing {
        connection: String,
        motor: String,
        id: MotorId,
    },
    ModelMismatch {
        connection: String,
        motor: String,
        id: MotorId,
        expected: String,
        found: String,
    },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::ConnectionMissing { connection } => {
                write!(f, "connection '{connection}' not found")
            }
            Issue::MotorCount {
                connection,
                expected,
                found,
            } => write!(
                f,
                "connection '{connection}': expected {expected} motors, found {found}"
            ),
            Issue::MotorMissing {
                connection,
                motor,
                id,
            } => write!(f, "connection '{connection}': motor '{motor}' (id {id}) missing"),
            Issue::ModelMismatch {
                connection,
                motor,
                id,
                expected,
                found,
            } => write!(
                f,
                "connection '{connection}': motor '{motor}' (id {id}) is {found}, expected {expected}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub robot_id: String,
    pub status: DeviceStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
}

impl Verification {
    pub fn is_available(&self) -> bool {
        self.status == DeviceStatus::Available
    }

    pub fn summary(&self) -> String {
        self.issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A robot known to the host and its last computed status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotRecord {
    pub definition: RobotDefinition,
    pub status: DeviceStatus,
    /// Discovered but never saved. Removed instead of being reported offline.
    #[serde(default)]
    pub transient: bool,
    #[serde(default)]
    pub checked_at: Option<String>,
}

impl RobotRecord {
    pub fn id(&self) -> &str {
        &self.definition.id
    }
}

/// Outcome of re-checking one robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub robot_id: String,
    pub previous: DeviceStatus,
    pub status: DeviceStatus,
    /// The robot was transient and its hardware is gone, so the record was dropped.
    pub removed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
}

impl StatusUpdate {
    pub fn changed(&self) -> bool {
        self.removed || self.previous != self.status
    }
}
