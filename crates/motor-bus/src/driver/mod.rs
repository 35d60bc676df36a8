//! One driver per brand, each owning a single physical connection.

mod damiao;
mod dynamixel;
mod feetech;
mod serial_io;

pub use damiao::{DamiaoDriver, DamiaoGains};
pub use dynamixel::DynamixelDriver;
pub use feetech::FeetechDriver;

use motor_registry::{Brand, ModelInfo, MotorId};

use crate::error::Result;
use crate::telemetry::Telemetry;

/// Capability set shared by every brand.
///
/// All calls block on I/O with bounded per-frame waits. Failures come back as `Err`;
/// nothing here panics or aborts on a misbehaving motor.
pub trait MotorDriver: Send {
    fn brand(&self) -> Brand;
    fn interface(&self) -> &str;
    fn rate(&self) -> u32;
    fn is_connected(&self) -> bool;

    fn connect(&mut self) -> Result<()>;
    /// Close the link. Safe to call when already closed.
    fn disconnect(&mut self) -> Result<()>;

    /// Any well-formed reply from the addressed motor counts as presence.
    fn ping(&mut self, id: MotorId) -> Result<bool>;
    /// Probe each id and identify responders. Unidentifiable motors are logged and skipped.
    fn scan(&mut self, ids: &[u16]) -> Result<Vec<(MotorId, ModelInfo)>>;
    fn identify(&mut self, id: MotorId) -> Result<ModelInfo>;

    /// Read every metric; protection is left at `ok` for the caller to evaluate.
    fn read_telemetry(&mut self, id: MotorId, model: &ModelInfo) -> Result<Telemetry>;
    /// rad, clamped to the protocol's valid range.
    fn set_position(&mut self, id: MotorId, model: &ModelInfo, position: f64) -> Result<()>;
    fn set_torque(&mut self, id: MotorId, enable: bool) -> Result<()>;
    fn reboot(&mut self, id: MotorId) -> Result<()>;

    /// Best effort over all ids; one failure does not stop the rest.
    fn bulk_set_torque(&mut self, ids: &[MotorId], enable: bool) -> Vec<(MotorId, Result<()>)> {
        ids.iter()
            .map(|&id| (id, self.set_torque(id, enable)))
            .collect()
    }
}

/// Raw position count → rad, or the raw count when the model has no scale.
pub(crate) fn counts_to_rad(raw: f64, model: &ModelInfo) -> f64 {
    match model.position_scale {
        Some(scale) => (raw - model.center_count()) * scale,
        None => raw,
    }
}

/// rad → raw count clamped to `0..resolution`.
pub(crate) fn rad_to_counts(rad: f64, model: &ModelInfo) -> i64 {
    let raw = match model.position_scale {
        Some(scale) if scale > 0.0 => rad / scale + model.center_count(),
        _ => rad,
    };
    let max = i64::from(model.resolution.saturating_sub(1));
    (raw.round() as i64).clamp(0, max)
}
