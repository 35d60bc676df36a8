use motor_bus::DiscoveredMotor;
use motor_registry::{MotorDefinition, RobotConnection, RobotDefinition};

use crate::types::{DeviceStatus, DiscoveredBus, Issue, Verification};

/// The discovered bus backing `connection`: serial number first, interface string otherwise.
pub fn find_bus<'a>(
    connection: &RobotConnection,
    buses: &'a [DiscoveredBus],
) -> Option<&'a DiscoveredBus> {
    let by_serial = connection.serial_number.as_deref().and_then(|sn| {
        buses
            .iter()
            .find(|b| b.serial_number.as_deref() == Some(sn))
    });
    by_serial.or_else(|| {
        let iface = connection.interface.as_deref()?;
        buses.iter().find(|b| b.interface == iface)
    })
}

/// Status of `definition` given what is on the host right now.
///
/// Any missing connection makes the robot offline and motors are not compared. With every
/// connection present, each bus definition must match its discovered motors one to one.
pub fn evaluate(definition: &RobotDefinition, buses: &[DiscoveredBus]) -> Verification {
    let mut found = Vec::with_capacity(definition.connections.len());
    let mut issues = Vec::new();
    for conn in &definition.connections {
        match find_bus(conn, buses) {
            Some(bus) => found.push((conn, bus)),
            None => issues.push(Issue::ConnectionMissing {
                connection: conn.name.clone(),
            }),
        }
    }
    if !issues.is_empty() {
        return Verification {
            robot_id: definition.id.clone(),
            status: DeviceStatus::Offline,
            issues,
        };
    }

    for (conn, bus) in found {
        let Some(expected) = &conn.bus else { continue };
        if expected.motors.len() != bus.motors.len() {
            issues.push(Issue::MotorCount {
                connection: conn.name.clone(),
                expected: expected.motors.len(),
                found: bus.motors.len(),
            });
        }
        for (name, required) in &expected.motors {
            match bus.motor(required.id) {
                None => issues.push(Issue::MotorMissing {
                    connection: conn.name.clone(),
                    motor: name.clone(),
                    id: required.id,
                }),
                Some(motor) if !identity_matches(required, motor) => {
                    issues.push(Issue::ModelMismatch {
                        connection: conn.name.clone(),
                        motor: name.clone(),
                        id: required.id,
                        expected: expected_label(required),
                        found: motor.model.to_string(),
                    })
                }
                Some(_) => {}
            }
        }
    }

    let status = if issues.is_empty() {
        DeviceStatus::Available
    } else {
        DeviceStatus::Invalid
    };
    Verification {
        robot_id: definition.id.clone(),
        status,
        issues,
    }
}

// A definition without a variant accepts any variant of the model.
fn identity_matches(required: &MotorDefinition, found: &DiscoveredMotor) -> bool {
    found.model.brand == required.brand
        && found.model.model.eq_ignore_ascii_case(&required.model)
        && match required.variant.as_deref() {
            Some(v) => found
                .model
                .variant
                .as_deref()
                .is_some_and(|f| f.eq_ignore_ascii_case(v)),
            None => true,
        }
}

fn expected_label(required: &MotorDefinition) -> String {
    match &required.variant {
        Some(v) => format!("{} {}/{}", required.brand, required.model, v),
        None => format!("{} {}", required.brand, required.model),
    }
}
