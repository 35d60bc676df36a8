//! In-process motor simulators behind the same [`LinkProvider`] seam as real hardware.
//!
//! Serial simulators answer only when the port is opened at their configured baud rate,
//! and CAN simulators only at their bitrate, so rate probing behaves like a real bench.

mod damiao;
mod dynamixel;
mod feetech;

pub use damiao::{DamiaoSim, SimMotor};
pub use dynamixel::DynamixelSim;
pub use feetech::FeetechSim;

use can_transport::CanBus;
use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{BusError, Result};
use crate::link::{LinkProvider, SerialLink};

/// Inbox bytes kept before a stuck partial frame is thrown away.
const MAX_INBOX: usize = 1024;

/// Packet-level device model shared by every port opened on it.
pub(crate) trait SerialDevice: Send {
    fn baud(&self) -> u32;
    /// Consume complete packets from `inbox`, leaving a trailing partial frame in place.
    fn receive(&mut self, inbox: &mut Vec<u8>, outbox: &mut VecDeque<u8>);
}

/// One open handle on a simulated serial bus.
pub(crate) struct SimPort<D: SerialDevice> {
    device: Arc<Mutex<D>>,
    baud: u32,
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
}

impl<D: SerialDevice> SimPort<D> {
    pub(crate) fn new(device: Arc<Mutex<D>>, baud: u32) -> Self {
        Self {
            device,
            baud,
            inbox: Vec::new(),
            outbox: VecDeque::new(),
        }
    }
}

impl<D: SerialDevice> Read for SimPort<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.outbox.is_empty() {
            return Err(io::Error::new(ErrorKind::TimedOut, "no reply"));
        }
        let n = buf.len().min(self.outbox.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl<D: SerialDevice> Write for SimPort<D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut device = self
            .device
            .lock()
            .map_err(|_| io::Error::other("simulator state poisoned"))?;
        // At the wrong baud rate the servos see line noise and stay silent.
        if device.baud() != self.baud {
            return Ok(buf.len());
        }
        self.inbox.extend_from_slice(buf);
        device.receive(&mut self.inbox, &mut self.outbox);
        if self.inbox.len() > MAX_INBOX {
            self.inbox.clear();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<D: SerialDevice + 'static> SerialLink for SimPort<D> {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.outbox.clear();
        Ok(())
    }
}

#[derive(Clone)]
enum SerialSim {
    Feetech(FeetechSim),
    Dynamixel(DynamixelSim),
}

/// A bench of simulated buses keyed by port path or CAN interface name.
#[derive(Default)]
pub struct SimRig {
    serial: Mutex<HashMap<String, SerialSim>>,
    can: Mutex<HashMap<String, DamiaoSim>>,
}

impl SimRig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach_feetech(&self, port: &str, sim: FeetechSim) {
        if let Ok(mut map) = self.serial.lock() {
            map.insert(port.to_string(), SerialSim::Feetech(sim));
        }
    }

    pub fn attach_dynamixel(&self, port: &str, sim: DynamixelSim) {
        if let Ok(mut map) = self.serial.lock() {
            map.insert(port.to_string(), SerialSim::Dynamixel(sim));
        }
    }

    pub fn attach_damiao(&self, interface: &str, sim: DamiaoSim) {
        if let Ok(mut map) = self.can.lock() {
            map.insert(interface.to_string(), sim);
        }
    }

    /// Interfaces with something attached, serial ports first.
    pub fn interfaces(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .serial
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        out.sort();
        let mut can: Vec<String> = self
            .can
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        can.sort();
        out.extend(can);
        out
    }

    /// A small mixed bench: an SO-101 style Feetech arm, two Dynamixel joints and a
    /// pair of Damiao actuators.
    pub fn demo() -> Self {
        let rig = Self::new();

        let arm = FeetechSim::new(1_000_000);
        for id in 1..=6 {
            arm.add_servo(id, 777, (3, 6));
        }
        rig.attach_feetech("/dev/ttyMOCK0", arm);

        let dxl = DynamixelSim::new(57_600);
        dxl.add_servo(1, 1060, 45);
        dxl.add_servo(2, 1060, 45);
        rig.attach_dynamixel("/dev/ttyMOCK1", dxl);

        let can = DamiaoSim::new(1_000_000);
        can.add_motor(SimMotor::new(0x01, 0x11, 12.5, 30.0, 10.0));
        can.add_motor(SimMotor::new(0x02, 0x12, 12.5, 8.0, 28.0));
        rig.attach_damiao("mock0", can);

        rig
    }
}

impl LinkProvider for SimRig {
    fn open_serial(&self, path: &str, baud: u32) -> Result<Box<dyn SerialLink>> {
        let sim = self
            .serial
            .lock()
            .ok()
            .and_then(|m| m.get(path).cloned())
            .ok_or_else(|| BusError::Connect {
                interface: path.to_string(),
                reason: "no such port".to_string(),
            })?;
        tracing::debug!(path, baud, "simulated serial port opened");
        Ok(match sim {
            SerialSim::Feetech(s) => s.open(baud),
            SerialSim::Dynamixel(s) => s.open(baud),
        })
    }

    fn open_can(&self, interface: &str, bitrate: u32) -> Result<Box<dyn CanBus>> {
        let sim = self
            .can
            .lock()
            .ok()
            .and_then(|m| m.get(interface).cloned())
            .ok_or_else(|| BusError::Connect {
                interface: interface.to_string(),
                reason: "no such interface".to_string(),
            })?;
        tracing::debug!(interface, bitrate, "simulated CAN channel opened");
        Ok(Box::new(sim.open(interface, bitrate)))
    }
}
