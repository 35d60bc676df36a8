use motor_registry::RobotDefinition;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::check::evaluate;
use crate::error::{Result, VerifyError};
use crate::sources::{BusDiscovery, RobotStore};
use crate::types::{DeviceStatus, DiscoveredBus, RobotRecord, StatusUpdate, Verification};

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// Keeps robot records in line with the hardware on the host.
#[derive(Clone)]
pub struct RobotVerifier {
    store: Arc<dyn RobotStore>,
    discovery: Arc<dyn BusDiscovery>,
}

impl RobotVerifier {
    pub fn new(store: Arc<dyn RobotStore>, discovery: Arc<dyn BusDiscovery>) -> Self {
        Self { store, discovery }
    }

    /// Check a robot before accepting it and save it when its hardware is all there.
    ///
    /// Missing connections are a [`VerifyError::Conflict`]; present but different hardware
    /// is a [`VerifyError::Validation`]. Nothing is saved in either case.
    pub async fn verify_robot(&self, definition: RobotDefinition) -> Result<Verification> {
        let buses = self
            .discovery
            .discover(std::slice::from_ref(&definition))
            .await?;
        let verification = evaluate(&definition, &buses);
        match verification.status {
            DeviceStatus::Offline => {
                tracing::warn!(robot = %definition.id, issues = %verification.summary(), "verification: offline");
                Err(VerifyError::Conflict {
                    robot: definition.id,
                    detail: verification.summary(),
                })
            }
            DeviceStatus::Invalid => {
                tracing::warn!(robot = %definition.id, issues = %verification.summary(), "verification: invalid");
                Err(VerifyError::Validation {
                    robot: definition.id,
                    detail: verification.summary(),
                })
            }
            DeviceStatus::Available => {
                tracing::info!(robot = %definition.id, "robot verified");
                self.store
                    .upsert(RobotRecord {
                        definition,
                        status: DeviceStatus::Available,
                        transient: false,
                        checked_at: Some(now_rfc3339()),
                    })
                    .await;
                Ok(verification)
            }
        }
    }

    /// Remember a robot that was discovered but not saved by the user.
    pub async fn track_transient(&self, definition: RobotDefinition) -> Result<Verification> {
        let buses = self
            .discovery
            .discover(std::slice::from_ref(&definition))
            .await?;
        let verification = evaluate(&definition, &buses);
        self.store
            .upsert(RobotRecord {
                definition,
                status: verification.status,
                transient: true,
                checked_at: Some(now_rfc3339()),
            })
            .await;
        Ok(verification)
    }

    /// Re-check one robot, or all of them, against a fresh discovery.
    ///
    /// Transient robots that went offline are removed from the store.
    pub async fn refresh_status(&self, robot_id: Option<&str>) -> Result<Vec<StatusUpdate>> {
        let records = match robot_id {
            Some(id) => vec![self
                .store
                .get(id)
                .await
                .ok_or_else(|| VerifyError::UnknownRobot(id.to_string()))?],
            None => self.store.list().await,
        };
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let definitions: Vec<RobotDefinition> =
            records.iter().map(|r| r.definition.clone()).collect();
        let buses = self.discovery.discover(&definitions).await?;
        let mut updates = Vec::with_capacity(records.len());
        for record in records {
            updates.push(self.refresh_one(record, &buses).await);
        }
        Ok(updates)
    }

    async fn refresh_one(&self, mut record: RobotRecord, buses: &[DiscoveredBus]) -> StatusUpdate {
        let verification = evaluate(&record.definition, buses);
        let previous = record.status;
        let removed = record.transient && verification.status == DeviceStatus::Offline;
        if removed {
            self.store.remove(record.id()).await;
            tracing::info!(robot = %record.id(), "transient robot gone, removed");
        } else {
            if previous != verification.status {
                tracing::info!(robot = %record.id(), from = %previous, to = %verification.status, "status changed");
            }
            record.status = verification.status;
            record.checked_at = Some(now_rfc3339());
            self.store.upsert(record).await;
        }
        StatusUpdate {
            robot_id: verification.robot_id,
            previous,
            status: verification.status,
            removed,
            issues: verification.issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{MemoryRobotStore, StaticDiscovery};
    use motor_bus::DiscoveredMotor;
    use motor_registry::{Brand, ModelRegistry, MotorId};

    fn definition(id: &str, model: &str) -> RobotDefinition {
        serde_yaml::from_str(&format!(
            r#"
id: {id}
connections:
  - name: can
    interface: can0
    bus:
      type: damiao_can
      rate: 1000000
      motors:
        joint1: {{ id: {{ send: 1, recv: 17 }}, brand: damiao, model: {model} }}
"#
        ))
        .unwrap()
    }

    fn can_bus(model: &str) -> DiscoveredBus {
        let registry = ModelRegistry::builtin();
        let mut bus = DiscoveredBus::new("can0");
        bus.motors = vec![DiscoveredMotor {
            id: MotorId::can(1, 17),
            model: registry.lookup(Brand::Damiao, model, None).cloned().unwrap(),
        }];
        bus
    }

    fn verifier(buses: Vec<DiscoveredBus>) -> (Arc<MemoryRobotStore>, Arc<StaticDiscovery>, RobotVerifier) {
        let store = Arc::new(MemoryRobotStore::new());
        let discovery = Arc::new(StaticDiscovery::new(buses));
        let verifier = RobotVerifier::new(store.clone(), discovery.clone());
        (store, discovery, verifier)
    }

    #[tokio::test]
    async fn test_verify_new_robot() {
        let (store, _d, verifier) = verifier(vec![can_bus("dm4310")]);
        let v = verifier.verify_robot(definition("arm", "dm4310")).await.unwrap();
        assert!(v.is_available());
        assert_eq!(store.get("arm").await.unwrap().status, DeviceStatus::Available);

        let err = verifier
            .verify_robot(definition("wrong", "dm4340"))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Validation { .. }));
        assert!(store.get("wrong").await.is_none());
    }

    #[tokio::test]
    async fn test_verify_offline_is_conflict() {
        let (store, _d, verifier) = verifier(Vec::new());
        let err = verifier
            .verify_robot(definition("arm", "dm4310"))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Conflict { .. }));
        assert!(err.to_string().contains("connection 'can' not found"));
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_retires_transient_robots() {
        let (store, discovery, verifier) = verifier(vec![can_bus("dm4310")]);
        verifier.verify_robot(definition("saved", "dm4310")).await.unwrap();
        verifier
            .track_transient(definition("seen", "dm4310"))
            .await
            .unwrap();
        assert_eq!(store.list().await.len(), 2);

        discovery.set(Vec::new()).await;
        let updates = verifier.refresh_status(None).await.unwrap();
        assert_eq!(updates.len(), 2);
        let saved = updates.iter().find(|u| u.robot_id == "saved").unwrap();
        assert_eq!(saved.status, DeviceStatus::Offline);
        assert!(!saved.removed);
        assert!(saved.changed());
        let seen = updates.iter().find(|u| u.robot_id == "seen").unwrap();
        assert!(seen.removed);

        assert!(store.get("seen").await.is_none());
        assert_eq!(store.get("saved").await.unwrap().status, DeviceStatus::Offline);
    }

    #[tokio::test]
    async fn test_refresh_single_robot() {
        let (store, discovery, verifier) = verifier(vec![can_bus("dm4310")]);
        verifier.verify_robot(definition("arm", "dm4310")).await.unwrap();

        // Someone swapped the actuator: present but wrong, so the record stays.
        discovery.set(vec![can_bus("dm4340")]).await;
        let updates = verifier.refresh_status(Some("arm")).await.unwrap();
        assert_eq!(updates[0].status, DeviceStatus::Invalid);
        assert!(!updates[0].removed);
        assert_eq!(store.get("arm").await.unwrap().status, DeviceStatus::Invalid);

        assert!(matches!(
            verifier.refresh_status(Some("ghost")).await,
            Err(VerifyError::UnknownRobot(_))
        ));
    }
}
