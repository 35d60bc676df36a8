//! robot-verify: does the hardware on the host match a robot definition?
//!
//! [`evaluate`] is the pure check. [`RobotVerifier`] runs it against live discovery,
//! keeps robot records current and retires transient robots whose hardware is gone.

mod error;
pub use error::{Result, VerifyError};

mod types;
pub use types::{DeviceStatus, DiscoveredBus, Issue, RobotRecord, StatusUpdate, Verification};

mod check;
pub use check::{evaluate, find_bus};

mod sources;
pub use sources::{
    probe_request_for, BusDiscovery, DeviceInfo, MemoryRobotStore, ProbeDiscovery, RobotStore,
    StaticDiscovery,
};

mod verifier;
pub use verifier::RobotVerifier;
