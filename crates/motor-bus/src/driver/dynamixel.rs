use motor_registry::{Brand, ModelInfo, ModelRegistry, MotorId};
use std::sync::Arc;
use std::time::Duration;

use super::serial_io;
use super::{counts_to_rad, rad_to_counts, MotorDriver};
use crate::error::{BusError, Result};
use crate::link::{LinkProvider, SerialLink};
use crate::protocol::dynamixel::{self as proto, reg, Instruction, ALERT_BIT};
use crate::protocol::FrameError;
use crate::telemetry::{now_rfc3339, Telemetry};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);
pub const SCAN_TIMEOUT: Duration = Duration::from_millis(20);

/// Dynamixel X-series servos speaking Protocol 2.0.
pub struct DynamixelDriver {
    interface: String,
    baud: u32,
    links: Arc<dyn LinkProvider>,
    registry: Arc<ModelRegistry>,
    link: Option<Box<dyn SerialLink>>,
    timeout: Duration,
    scan_timeout: Duration,
}

impl DynamixelDriver {
    pub fn new(
        interface: &str,
        baud: u32,
        links: Arc<dyn LinkProvider>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            interface: interface.to_string(),
            baud,
            links,
            registry,
            link: None,
            timeout: DEFAULT_TIMEOUT,
            scan_timeout: SCAN_TIMEOUT,
        }
    }

    fn serial_id(id: MotorId) -> Result<u8> {
        match id.serial() {
            Some(n) if n <= proto::MAX_ID => Ok(n),
            _ => Err(BusError::InvalidId(id)),
        }
    }

    fn link(&mut self) -> Result<&mut dyn SerialLink> {
        match self.link.as_deref_mut() {
            Some(l) => Ok(l),
            None => Err(BusError::NotConnected),
        }
    }

    /// Send one instruction and return the status payload (error byte stripped).
    fn transact(&mut self, id: u8, packet: &[u8]) -> Result<Vec<u8>> {
        let mid = MotorId::Serial(u16::from(id));
        let link = self.link()?;
        serial_io::send(link, packet)?;
        let mut frame = serial_io::sync_to_header(link, &proto::HEADER, mid)?;
        let mut prefix = [0u8; 3];
        serial_io::read_exact(link, &mut prefix, mid)?;
        frame.extend_from_slice(&prefix);
        let total = proto::frame_len(&frame)
            .ok_or(BusError::frame(mid, FrameError::Malformed("length")))?;
        let mut rest = vec![0u8; total.saturating_sub(frame.len())];
        serial_io::read_exact(link, &mut rest, mid)?;
        frame.extend_from_slice(&rest);

        let packet = proto::parse_packet(&frame).map_err(|e| BusError::frame(mid, e))?;
        if packet.id != id {
            return Err(BusError::frame(
                mid,
                FrameError::IdMismatch {
                    expected: id,
                    got: packet.id,
                },
            ));
        }
        let (error, data) = packet.status().map_err(|e| BusError::frame(mid, e))?;
        if error & !ALERT_BIT != 0 {
            return Err(BusError::Rejected {
                id: mid,
                status: error,
            });
        }
        if error & ALERT_BIT != 0 {
            tracing::debug!(id, "hardware alert pending");
        }
        Ok(data.to_vec())
    }

    fn read_reg(&mut self, id: u8, addr: u16, len: u16) -> Result<Vec<u8>> {
        let data = self.transact(id, &proto::read_request(id, addr, len))?;
        if data.len() != usize::from(len) {
            return Err(BusError::frame(
                MotorId::Serial(u16::from(id)),
                FrameError::Malformed("read reply length"),
            ));
        }
        Ok(data)
    }

    fn read_u8(&mut self, id: u8, addr: u16) -> Result<u8> {
        Ok(self.read_reg(id, addr, 1)?[0])
    }

    fn read_u16(&mut self, id: u8, addr: u16) -> Result<u16> {
        let b = self.read_reg(id, addr, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_i32(&mut self, id: u8, addr: u16) -> Result<i32> {
        let b = self.read_reg(id, addr, 4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn write_reg(&mut self, id: u8, addr: u16, data: &[u8]) -> Result<()> {
        tracing::trace!(id, addr, ?data, "dynamixel write");
        self.transact(id, &proto::write_request(id, addr, data))
            .map(|_| ())
    }
}

impl MotorDriver for DynamixelDriver {
    fn brand(&self) -> Brand {
        Brand::Dynamixel
    }

    fn interface(&self) -> &str {
        &self.interface
    }

    fn rate(&self) -> u32 {
        self.baud
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn connect(&mut self) -> Result<()> {
        if self.link.is_some() {
            return Ok(());
        }
        let mut link = self.links.open_serial(&self.interface, self.baud)?;
        link.set_timeout(self.timeout)?;
        self.link = Some(link);
        tracing::info!(interface = %self.interface, baud = self.baud, "dynamixel bus connected");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.link.take().is_some() {
            tracing::info!(interface = %self.interface, "dynamixel bus disconnected");
        }
        Ok(())
    }

    fn ping(&mut self, id: MotorId) -> Result<bool> {
        let sid = Self::serial_id(id)?;
        match self.transact(sid, &proto::instruction(sid, Instruction::Ping, &[])) {
            Ok(_) | Err(BusError::Rejected { .. }) => Ok(true),
            Err(BusError::Timeout(_)) => Ok(false),
            Err(BusError::Frame { source, .. }) => {
                tracing::debug!(%id, error = %source, "malformed ping reply");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn scan(&mut self, ids: &[u16]) -> Result<Vec<(MotorId, ModelInfo)>> {
        let scan_timeout = self.scan_timeout;
        self.link()?.set_timeout(scan_timeout)?;
        let mut found = Vec::new();
        let mut outcome = Ok(());
        for &n in ids {
            let id = MotorId::Serial(n);
            if Self::serial_id(id).is_err() {
                continue;
            }
            match self.ping(id) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
            match self.identify(id) {
                Ok(model) => {
                    tracing::info!(%id, model = %model.display_name(), "dynamixel servo found");
                    found.push((id, model));
                }
                Err(e) => tracing::warn!(%id, error = %e, "servo responded but was not identified"),
            }
        }
        let timeout = self.timeout;
        if let Some(link) = self.link.as_deref_mut() {
            link.set_timeout(timeout)?;
        }
        outcome.map(|_| found)
    }

    fn identify(&mut self, id: MotorId) -> Result<ModelInfo> {
        let sid = Self::serial_id(id)?;
        let number = self.read_u16(sid, reg::MODEL_NUMBER)?;
        let firmware = self.read_u8(sid, reg::FIRMWARE_VERSION)?;
        tracing::debug!(%id, number, firmware, "dynamixel model register");
        self.registry
            .by_model_number(Brand::Dynamixel, u32::from(number), None)
            .cloned()
            .map_err(|source| BusError::Identify { id, source })
    }

    fn read_telemetry(&mut self, id: MotorId, model: &ModelInfo) -> Result<Telemetry> {
        let sid = Self::serial_id(id)?;
        let position = self.read_i32(sid, reg::PRESENT_POSITION)?;
        let velocity = self.read_i32(sid, reg::PRESENT_VELOCITY)?;
        // Current on current-sensing models, load (0.1 %) on the rest.
        let current_or_load = self.read_u16(sid, reg::PRESENT_CURRENT)? as i16;
        let voltage = self.read_u16(sid, reg::PRESENT_INPUT_VOLTAGE)?;
        let temperature = self.read_u8(sid, reg::PRESENT_TEMPERATURE)?;
        let moving = self.read_u8(sid, reg::MOVING)?;
        let hardware_error = self.read_u8(sid, reg::HARDWARE_ERROR)?;
        let goal = self.read_i32(sid, reg::GOAL_POSITION)?;

        let (current, load) = match model.units.current_ma {
            Some(unit) => (Some(f64::from(current_or_load) * unit), None),
            None => (None, Some(f64::from(current_or_load) * model.units.load_pct)),
        };
        if model.position_scale.is_none() {
            tracing::warn!(%id, model = %model.display_name(), "no position scale, reporting raw counts");
        }
        Ok(Telemetry {
            id,
            position: counts_to_rad(f64::from(position), model),
            velocity: f64::from(velocity) * model.units.velocity.unwrap_or(1.0),
            current,
            load,
            temperature: f64::from(temperature),
            voltage: Some(f64::from(voltage) * model.units.voltage),
            moving: moving != 0,
            goal_position: Some(counts_to_rad(f64::from(goal), model)),
            hardware_error,
            protection: Default::default(),
            ts: now_rfc3339(),
        })
    }

    fn set_position(&mut self, id: MotorId, model: &ModelInfo, position: f64) -> Result<()> {
        let sid = Self::serial_id(id)?;
        let counts = rad_to_counts(position, model) as i32;
        self.write_reg(sid, reg::GOAL_POSITION, &counts.to_le_bytes())
    }

    fn set_torque(&mut self, id: MotorId, enable: bool) -> Result<()> {
        let sid = Self::serial_id(id)?;
        self.write_reg(sid, reg::TORQUE_ENABLE, &[u8::from(enable)])
    }

    fn reboot(&mut self, id: MotorId) -> Result<()> {
        let sid = Self::serial_id(id)?;
        self.transact(sid, &proto::instruction(sid, Instruction::Reboot, &[]))?;
        tracing::info!(%id, "dynamixel rebooted");
        Ok(())
    }
}
