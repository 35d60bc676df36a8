use motor_bus::{BatchOutcome, Telemetry};
use motor_registry::MotorId;
use safety_guard::ProtectionStatus;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Everything a session publishes, in the order it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Telemetry {
        device: String,
        snapshots: Vec<Telemetry>,
        /// Motors that produced no data this cycle.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        missing: Vec<MotorId>,
        ts: String,
    },
    /// A motor went critical for the first time since the session started.
    Safety {
        device: String,
        motor: MotorId,
        status: ProtectionStatus,
        torque_disabled: bool,
        ts: String,
    },
    Ack {
        device: String,
        command: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        ts: String,
    },
    CommsLost {
        device: String,
        consecutive_failures: u32,
        last_error: String,
        ts: String,
    },
    CommsRestored {
        device: String,
        ts: String,
    },
    /// The session's own machinery failed, as opposed to the bus.
    Error {
        device: String,
        message: String,
        ts: String,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Telemetry { .. } => "telemetry",
            SessionEvent::Safety { .. } => "safety",
            SessionEvent::Ack { .. } => "ack",
            SessionEvent::CommsLost { .. } => "comms_lost",
            SessionEvent::CommsRestored { .. } => "comms_restored",
            SessionEvent::Error { .. } => "error",
        }
    }

    pub(crate) fn ack(device: &str, command: &str, result: Result<(), String>) -> Self {
        let (ok, detail) = match result {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e)),
        };
        SessionEvent::Ack {
            device: device.to_string(),
            command: command.to_string(),
            ok,
            detail,
            ts: now_rfc3339(),
        }
    }
}

/// Per-motor result of a best-effort command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSummary {
    pub succeeded: Vec<MotorId>,
    pub failed: Vec<(MotorId, String)>,
}

impl CommandSummary {
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }

    /// `None` when everything succeeded, otherwise a one-line description of the failures.
    pub fn failure_detail(&self) -> Option<String> {
        if self.all_ok() {
            return None;
        }
        let parts: Vec<String> = self
            .failed
            .iter()
            .map(|(id, e)| format!("{id}: {e}"))
            .collect();
        Some(format!(
            "{}/{} failed: {}",
            self.failed.len(),
            self.failed.len() + self.succeeded.len(),
            parts.join("; ")
        ))
    }
}

impl From<BatchOutcome<()>> for CommandSummary {
    fn from(outcome: BatchOutcome<()>) -> Self {
        Self {
            succeeded: outcome.succeeded.into_iter().map(|(id, _)| id).collect(),
            failed: outcome
                .failed
                .into_iter()
                .map(|(id, e)| (id, e.to_string()))
                .collect(),
        }
    }
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_tagged() {
        let ev = SessionEvent::ack("arm", "set_torque", Err("motor 3 not found".into()));
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "ack");
        assert_eq!(json["ok"], false);
        assert_eq!(json["detail"], "motor 3 not found");
        assert_eq!(ev.kind(), "ack");

        let ok = serde_json::to_value(SessionEvent::ack("arm", "stop", Ok(()))).unwrap();
        assert!(ok.get("detail").is_none());
    }

    #[test]
    fn test_summary_detail() {
        let summary = CommandSummary {
            succeeded: vec![MotorId::Serial(1)],
            failed: vec![(MotorId::Serial(2), "timeout".into())],
        };
        assert!(!summary.all_ok());
        assert_eq!(summary.failure_detail().unwrap(), "1/2 failed: 2: timeout");
        assert!(CommandSummary::default().failure_detail().is_none());
    }
}
