//! Backend selection from an interface string.
//!
//! Conventions, checked in order:
//! - `mock:<name>` or `mock<N>`: in-process [`MockBus`](crate::MockBus)
//! - `slcan:<path>`, or anything that looks like a serial device (`/dev/tty*`, `/dev/cu.*`,
//!   `COM<N>`): SLCAN adapter
//! - `socketcan:<iface>`, or a bare kernel interface name (`can0`, `vcan0`, `slcan0`): SocketCAN
//! - `gs_usb:`, `pcan:`, `kvaser:`, `ixxat:` vendor adapters

use crate::{CanBus, Result, TransportError};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InterfaceKind {
    Mock(String),
    Slcan(String),
    SocketCan(String),
    Vendor { vendor: String, channel: String },
}

impl InterfaceKind {
    pub fn parse(interface: &str) -> Result<Self> {
        let s = interface.trim();
        if s.is_empty() {
            return Err(TransportError::InterfaceNotFound(String::new()));
        }
        if let Some((prefix, rest)) = s.split_once(':') {
            let rest = rest.to_string();
            return match prefix.to_ascii_lowercase().as_str() {
                "mock" => Ok(Self::Mock(rest)),
                "slcan" => Ok(Self::Slcan(rest)),
                "socketcan" => Ok(Self::SocketCan(rest)),
                "gs_usb" | "pcan" | "kvaser" | "ixxat" | "candle" => Ok(Self::Vendor {
                    vendor: prefix.to_ascii_lowercase(),
                    channel: rest,
                }),
                // Windows drive-like prefixes never reach here; treat `COM3:` etc. as serial.
                _ if looks_like_serial(prefix) => Ok(Self::Slcan(prefix.to_string())),
                _ => Err(TransportError::InterfaceNotFound(s.to_string())),
            };
        }
        if s.starts_with("mock") {
            return Ok(Self::Mock(s.to_string()));
        }
        if looks_like_serial(s) {
            return Ok(Self::Slcan(s.to_string()));
        }
        Ok(Self::SocketCan(s.to_string()))
    }

    /// True when the string names a CAN channel rather than a plain serial port.
    ///
    /// SLCAN adapters are serial devices too, so callers that must pick between a serial
    /// servo protocol and CAN need an explicit prefix for those.
    pub fn is_can_like(interface: &str) -> bool {
        let s = interface.trim();
        match Self::parse(s) {
            Ok(Self::Slcan(_)) => s.to_ascii_lowercase().starts_with("slcan:"),
            Ok(_) => true,
            Err(_) => false,
        }
    }
}

fn looks_like_serial(s: &str) -> bool {
    let upper = s.to_ascii_uppercase();
    s.starts_with("/dev/tty")
        || s.starts_with("/dev/cu.")
        || s.starts_with("/dev/serial")
        || (upper.starts_with("COM") && upper[3..].chars().all(|c| c.is_ascii_digit()) && s.len() > 3)
}

/// Open the backend named by `interface` at `bitrate` bit/s.
pub fn open_interface(interface: &str, bitrate: u32) -> Result<Box<dyn CanBus>> {
    let kind = InterfaceKind::parse(interface)?;
    tracing::debug!(interface, bitrate, ?kind, "opening CAN interface");
    match kind {
        #[cfg(feature = "mock")]
        InterfaceKind::Mock(name) => Ok(Box::new(crate::MockBus::open(&name)?)),
        #[cfg(feature = "slcan")]
        InterfaceKind::Slcan(path) => Ok(Box::new(crate::SlcanBus::open_at(&path, bitrate)?)),
        #[cfg(all(feature = "socketcan", target_os = "linux"))]
        InterfaceKind::SocketCan(name) => {
            Ok(Box::new(crate::SocketCanBus::open_with(&name, Some(bitrate))?))
        }
        InterfaceKind::Vendor { .. } => Err(TransportError::Unsupported(
            "vendor CAN adapters are not built into this binary",
        )),
        #[allow(unreachable_patterns)]
        _ => Err(TransportError::Unsupported("backend not enabled at build time")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_conventions() {
        assert_eq!(
            InterfaceKind::parse("can0").unwrap(),
            InterfaceKind::SocketCan("can0".into())
        );
        assert_eq!(
            InterfaceKind::parse("socketcan:vcan1").unwrap(),
            InterfaceKind::SocketCan("vcan1".into())
        );
        assert_eq!(
            InterfaceKind::parse("/dev/ttyACM0").unwrap(),
            InterfaceKind::Slcan("/dev/ttyACM0".into())
        );
        assert_eq!(
            InterfaceKind::parse("slcan:/dev/cu.usbmodem1").unwrap(),
            InterfaceKind::Slcan("/dev/cu.usbmodem1".into())
        );
        assert_eq!(
            InterfaceKind::parse("COM7").unwrap(),
            InterfaceKind::Slcan("COM7".into())
        );
        assert_eq!(
            InterfaceKind::parse("mock0").unwrap(),
            InterfaceKind::Mock("mock0".into())
        );
        assert!(matches!(
            InterfaceKind::parse("pcan:usb1").unwrap(),
            InterfaceKind::Vendor { .. }
        ));
        assert!(InterfaceKind::parse("").is_err());
        assert!(InterfaceKind::parse("bogus:thing").is_err());
    }

    #[test]
    fn test_can_like() {
        assert!(InterfaceKind::is_can_like("can0"));
        assert!(InterfaceKind::is_can_like("slcan:/dev/ttyACM0"));
        assert!(!InterfaceKind::is_can_like("/dev/ttyUSB0"));
        assert!(!InterfaceKind::is_can_like("COM3"));
    }

    #[test]
    fn test_vendor_is_unsupported() {
        assert!(matches!(
            open_interface("kvaser:0", 1_000_000),
            Err(TransportError::Unsupported(_))
        ));
    }

    #[cfg(feature = "mock")]
    #[test]
    fn test_open_mock() {
        let mut bus = open_interface("mock:bench", 1_000_000).unwrap();
        assert!(matches!(bus.recv(Some(1)), Err(TransportError::Timeout)));
    }
}
