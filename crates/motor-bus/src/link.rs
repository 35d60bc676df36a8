//! Physical link opening, shared by every driver.

use can_transport::CanBus;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::{BusError, Result};

/// Byte stream to a serial servo bus.
pub trait SerialLink: Read + Write + Send {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
    /// Drop unread input (stale replies from a previous transaction).
    fn clear_input(&mut self) -> io::Result<()>;
}

/// Opens serial ports and CAN channels. Drivers hold one and open their link on `connect`.
pub trait LinkProvider: Send + Sync {
    fn open_serial(&self, path: &str, baud: u32) -> Result<Box<dyn SerialLink>>;
    fn open_can(&self, interface: &str, bitrate: u32) -> Result<Box<dyn CanBus>>;
}

/// Real hardware: `serialport` for serial buses, `can_transport::open_interface` for CAN.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLinks;

#[cfg(feature = "serial")]
struct PortLink(Box<dyn serialport::SerialPort>);

#[cfg(feature = "serial")]
impl Read for PortLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

#[cfg(feature = "serial")]
impl Write for PortLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

#[cfg(feature = "serial")]
impl SerialLink for PortLink {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.0.set_timeout(timeout).map_err(io::Error::from)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.0
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}

impl LinkProvider for SystemLinks {
    #[cfg(feature = "serial")]
    fn open_serial(&self, path: &str, baud: u32) -> Result<Box<dyn SerialLink>> {
        let port = serialport::new(path, baud)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| BusError::Connect {
                interface: path.to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!(path, baud, "serial port opened");
        Ok(Box::new(PortLink(port)))
    }

    #[cfg(not(feature = "serial"))]
    fn open_serial(&self, _path: &str, _baud: u32) -> Result<Box<dyn SerialLink>> {
        Err(BusError::Unsupported("serial support not enabled at build time"))
    }

    fn open_can(&self, interface: &str, bitrate: u32) -> Result<Box<dyn CanBus>> {
        can_transport::open_interface(interface, bitrate).map_err(|e| BusError::Connect {
            interface: interface.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Serial port names visible to the OS.
#[cfg(feature = "serial")]
pub fn list_serial_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports().map_err(io::Error::from)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
