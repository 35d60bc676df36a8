use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Address of one motor on one bus.
///
/// Serial servos answer on the id they are addressed with. CAN motors are commanded on a
/// send id and report on a receive (master) id that may differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(untagged)]
pub enum MotorId {
    Serial(u16),
    Can { send: u16, recv: u16 },
}

impl MotorId {
    pub fn can(send: u16, recv: u16) -> Self {
        MotorId::Can { send, recv }
    }

    /// Id used to address the motor (serial id or CAN send id).
    pub fn address(&self) -> u16 {
        match *self {
            MotorId::Serial(id) => id,
            MotorId::Can { send, .. } => send,
        }
    }

    pub fn serial(&self) -> Option<u8> {
        match *self {
            MotorId::Serial(id) => u8::try_from(id).ok(),
            MotorId::Can { .. } => None,
        }
    }

    pub fn is_can(&self) -> bool {
        matches!(self, MotorId::Can { .. })
    }
}

impl fmt::Display for MotorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotorId::Serial(id) => write!(f, "{id}"),
            MotorId::Can { send, recv } => write!(f, "0x{send:02X}:0x{recv:02X}"),
        }
    }
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let t = s.trim();
    let parsed = match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => t.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid motor id '{t}': {e}"))
}

impl FromStr for MotorId {
    type Err = String;

    /// `5` → serial, `0x01:0x11` or `1:17` → CAN send/recv pair.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((send, recv)) => Ok(MotorId::can(parse_u16(send)?, parse_u16(recv)?)),
            None => Ok(MotorId::Serial(parse_u16(s)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        assert_eq!("5".parse::<MotorId>().unwrap(), MotorId::Serial(5));
        let can: MotorId = "0x01:0x11".parse().unwrap();
        assert_eq!(can, MotorId::can(1, 0x11));
        assert_eq!(can.to_string(), "0x01:0x11");
        assert_eq!("3:7".parse::<MotorId>().unwrap(), MotorId::can(3, 7));
        assert!("x".parse::<MotorId>().is_err());
    }

    #[test]
    fn test_serde_untagged_shapes() {
        let serial: MotorId = serde_json::from_str("12").unwrap();
        assert_eq!(serial, MotorId::Serial(12));
        let can: MotorId = serde_json::from_str(r#"{"send":3,"recv":7}"#).unwrap();
        assert_eq!(can.address(), 3);
        assert_eq!(serde_json::to_string(&can).unwrap(), r#"{"send":3,"recv":7}"#);
    }
}
