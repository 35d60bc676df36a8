//! motor-bus: wire codecs, per-brand drivers and the brand-agnostic motor bus
//!
//! Serial servos (Feetech, Dynamixel Protocol 2.0) and Damiao CAN motors all sit behind
//! [`MotorDriver`]; [`MotorBus`] wraps one driver together with the motors it has
//! identified. [`probe`] finds the brand and rate of an unknown interface. Physical links
//! are opened through a [`LinkProvider`], so the `mock` feature's [`sim::SimRig`] can stand
//! in for hardware.

mod error;
pub use error::{BusError, Result};

pub mod protocol;
pub use protocol::FrameError;

mod link;
#[cfg(feature = "serial")]
pub use link::list_serial_ports;
pub use link::{LinkProvider, SerialLink, SystemLinks};

mod telemetry;
pub use telemetry::Telemetry;

pub mod driver;
pub use driver::{DamiaoDriver, DamiaoGains, DynamixelDriver, FeetechDriver, MotorDriver};

mod bus;
pub use bus::{default_scan_range, BatchOutcome, MotorBus};

mod factory;
pub use factory::{bus_for, create_bus, resolve_bus_type, BusFactory, DefaultBusFactory};

mod probe;
pub use probe::{
    matching_robots, probe, DiscoveredMotor, InterfaceClass, ProbeOutcome, ProbeRequest,
    ProbeResult, DEFAULT_PROBE_IDS,
};

mod protect;
pub use protect::read_telemetry_with_protection;

#[cfg(feature = "mock")]
pub mod sim;
