use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

/// Where a session learns whether a device has been calibrated.
#[async_trait]
pub trait CalibrationStore: Send + Sync {
    /// Names of the motors on `device` that have a homing-offset calibration.
    async fn calibrated_motors(&self, device: &str) -> Vec<String>;

    /// Motion commands are only accepted once at least one motor is calibrated.
    async fn is_calibrated(&self, device: &str) -> bool {
        !self.calibrated_motors(device).await.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct MemoryCalibrationStore {
    devices: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl MemoryCalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_calibrated(&self, device: &str, motor: &str) {
        self.devices
            .write()
            .await
            .entry(device.to_string())
            .or_default()
            .insert(motor.to_string());
    }

    pub async fn clear(&self, device: &str) {
        self.devices.write().await.remove(device);
    }
}

#[async_trait]
impl CalibrationStore for MemoryCalibrationStore {
    async fn calibrated_motors(&self, device: &str) -> Vec<String> {
        self.devices
            .read()
            .await
            .get(device)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }
}
