use core::fmt;
use time::OffsetDateTime;

/// 11-bit or 29-bit CAN identifier
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct CanId {
    raw: u32,
    extended: bool,
}

impl CanId {
    pub fn standard(id11: u16) -> Option<Self> {
        if id11 <= 0x7FF {
            Some(Self {
                raw: id11 as u32,
                extended: false,
            })
        } else {
            None
        }
    }

    pub fn extended(id29: u32) -> Option<Self> {
        if id29 <= 0x1FFF_FFFF {
            Some(Self {
                raw: id29,
                extended: true,
            })
        } else {
            None
        }
    }

    /// Standard id when it fits in 11 bits, extended otherwise.
    pub fn from_raw(raw: u32) -> Option<Self> {
        if raw <= 0x7FF {
            Self::standard(raw as u16)
        } else {
            Self::extended(raw)
        }
    }

    pub fn raw(&self) -> u32 {
        self.raw
    }
    pub fn is_extended(&self) -> bool {
        self.extended
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "0x{raw:08X}", raw = self.raw)
        } else {
            write!(f, "0x{raw:03X}", raw = self.raw)
        }
    }
}

/// A CAN data frame (no CAN FD features yet)
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CanFrame {
    pub id: CanId,
    pub len: u8,
    pub data: [u8; 8],
    pub rtr: bool,
    pub timestamp: Option<Timestamp>,
}

impl CanFrame {
    pub fn new(id: CanId, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            id,
            len: data.len() as u8,
            data: buf,
            rtr: false,
            timestamp: None,
        })
    }

    /// The valid bytes of the frame (`data[..len]`).
    pub fn payload(&self) -> &[u8] {
        let len = usize::from(self.len).min(self.data.len());
        &self.data[..len]
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CanFilter {
    pub id: CanId,
    pub mask: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

impl Timestamp {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }
}

#[derive(Clone, Debug)]
pub struct BusInfo {
    pub name: String,
    pub driver: String,
}

/// Controller error state as reported by the backend.
///
/// Backends that cannot observe the controller report `ErrorActive`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BusState {
    #[default]
    ErrorActive,
    ErrorWarning,
    ErrorPassive,
    BusOff,
}

impl BusState {
    /// Passive or bus-off: the controller is not acknowledging traffic, which on a freshly
    /// opened channel almost always means the bit rate is wrong.
    pub fn is_degraded(self) -> bool {
        matches!(self, BusState::ErrorPassive | BusState::BusOff)
    }
}

impl fmt::Display for BusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BusState::ErrorActive => "error-active",
            BusState::ErrorWarning => "error-warning",
            BusState::ErrorPassive => "error-passive",
            BusState::BusOff => "bus-off",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_picks_frame_format() {
        let std_id = CanId::from_raw(0x7FF).unwrap();
        assert!(!std_id.is_extended());
        let ext_id = CanId::from_raw(0x800).unwrap();
        assert!(ext_id.is_extended());
        assert!(CanId::from_raw(0x2000_0000).is_none());
    }

    #[test]
    fn test_frame_payload_is_trimmed() {
        let id = CanId::standard(0x10).unwrap();
        let frame = CanFrame::new(id, &[1, 2, 3]).unwrap();
        assert_eq!(frame.payload(), &[1, 2, 3]);
        assert!(CanFrame::new(id, &[0; 9]).is_none());
    }

    #[test]
    fn test_bus_state_degraded() {
        assert!(!BusState::ErrorActive.is_degraded());
        assert!(!BusState::ErrorWarning.is_degraded());
        assert!(BusState::ErrorPassive.is_degraded());
        assert!(BusState::BusOff.is_degraded());
    }
}
