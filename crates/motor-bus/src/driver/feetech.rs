use motor_registry::{Brand, FirmwareVersion, ModelInfo, ModelRegistry, MotorId};
use std::sync::Arc;
use std::time::Duration;

use super::serial_io;
use super::{counts_to_rad, rad_to_counts, MotorDriver};
use crate::error::{BusError, Result};
use crate::link::{LinkProvider, SerialLink};
use crate::protocol::feetech::{self as proto, reg, Instruction, LOAD_SIGN_BIT, SIGN_BIT};
use crate::protocol::{decode_sign_magnitude, encode_sign_magnitude, FrameError};
use crate::telemetry::{now_rfc3339, Telemetry};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);
pub const SCAN_TIMEOUT: Duration = Duration::from_millis(20);

/// Feetech STS/SCS servos on a half-duplex serial bus.
pub struct FeetechDriver {
    interface: String,
    baud: u32,
    links: Arc<dyn LinkProvider>,
    registry: Arc<ModelRegistry>,
    link: Option<Box<dyn SerialLink>>,
    timeout: Duration,
    scan_timeout: Duration,
}

impl FeetechDriver {
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

    pub fn with_timeouts(mut self, io: Duration, scan: Duration) -> Self {
        self.timeout = io;
        self.scan_timeout = scan;
        self
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

    fn transact(&mut self, id: u8, packet: &[u8]) -> Result<proto::Packet> {
        let mid = MotorId::Serial(u16::from(id));
        let link = self.link()?;
        serial_io::send(link, packet)?;
        let mut frame = serial_io::sync_to_header(link, &proto::HEADER, mid)?;
        let mut id_len = [0u8; 2];
        serial_io::read_exact(link, &mut id_len, mid)?;
        frame.extend_from_slice(&id_len);
        let mut rest = vec![0u8; usize::from(id_len[1])];
        serial_io::read_exact(link, &mut rest, mid)?;
        frame.extend_from_slice(&rest);

        let status = proto::parse_packet(&frame).map_err(|e| BusError::frame(mid, e))?;
        if status.id != id {
            return Err(BusError::frame(
                mid,
                FrameError::IdMismatch {
                    expected: id,
                    got: status.id,
                },
            ));
        }
        if status.code != 0 {
            tracing::debug!(id, status = status.code, "servo reports error bits");
        }
        Ok(status)
    }

    fn read_reg(&mut self, id: u8, addr: u8, len: u8) -> Result<Vec<u8>> {
        let status = self.transact(id, &proto::read_request(id, addr, len))?;
        if status.params.len() != usize::from(len) {
            return Err(BusError::frame(
                MotorId::Serial(u16::from(id)),
                FrameError::Malformed("read reply length"),
            ));
        }
        Ok(status.params)
    }

    fn read_u8(&mut self, id: u8, addr: u8) -> Result<u8> {
        Ok(self.read_reg(id, addr, 1)?[0])
    }

    fn read_u16(&mut self, id: u8, addr: u8) -> Result<u16> {
        let b = self.read_reg(id, addr, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn write_reg(&mut self, id: u8, addr: u8, data: &[u8]) -> Result<()> {
        tracing::trace!(id, addr, ?data, "feetech write");
        self.transact(id, &proto::write_request(id, addr, data))
            .map(|_| ())
    }
}

impl MotorDriver for FeetechDriver {
    fn brand(&self) -> Brand {
        Brand::Feetech
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
        tracing::info!(interface = %self.interface, baud = self.baud, "feetech bus connected");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.link.take().is_some() {
            tracing::info!(interface = %self.interface, "feetech bus disconnected");
        }
        Ok(())
    }

    fn ping(&mut self, id: MotorId) -> Result<bool> {
        let sid = Self::serial_id(id)?;
        match self.transact(sid, &proto::instruction(sid, Instruction::Ping, &[])) {
            Ok(_) => Ok(true),
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
                    tracing::info!(%id, model = %model.display_name(), "feetech servo found");
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
        let firmware = FirmwareVersion {
            major: self.read_u8(sid, reg::FIRMWARE_MAJOR)?,
            minor: self.read_u8(sid, reg::FIRMWARE_MINOR)?,
        };
        tracing::debug!(%id, number, %firmware, "feetech model register");
        self.registry
            .by_model_number(Brand::Feetech, u32::from(number), Some(firmware))
            .cloned()
            .map_err(|source| BusError::Identify { id, source })
    }

    fn read_telemetry(&mut self, id: MotorId, model: &ModelInfo) -> Result<Telemetry> {
        let sid = Self::serial_id(id)?;
        let position = decode_sign_magnitude(self.read_u16(sid, reg::PRESENT_POSITION)?, SIGN_BIT);
        let velocity = decode_sign_magnitude(self.read_u16(sid, reg::PRESENT_VELOCITY)?, SIGN_BIT);
        let load = decode_sign_magnitude(self.read_u16(sid, reg::PRESENT_LOAD)?, LOAD_SIGN_BIT);
        let voltage = self.read_u8(sid, reg::PRESENT_VOLTAGE)?;
        let temperature = self.read_u8(sid, reg::PRESENT_TEMPERATURE)?;
        let moving = self.read_u8(sid, reg::MOVING)?;
        let status = self.read_u8(sid, reg::STATUS)?;
        let goal = decode_sign_magnitude(self.read_u16(sid, reg::GOAL_POSITION)?, SIGN_BIT);
        let current = match model.units.current_ma {
            Some(unit) => {
                let raw = decode_sign_magnitude(self.read_u16(sid, reg::PRESENT_CURRENT)?, SIGN_BIT);
                Some(f64::from(raw) * unit)
            }
            None => None,
        };

        if model.position_scale.is_none() {
            tracing::warn!(%id, model = %model.display_name(), "no position scale, reporting raw counts");
        }
        Ok(Telemetry {
            id,
            position: counts_to_rad(f64::from(position), model),
            velocity: f64::from(velocity) * model.units.velocity.unwrap_or(1.0),
            current,
            load: Some(f64::from(load) * model.units.load_pct),
            temperature: f64::from(temperature),
            voltage: Some(f64::from(voltage) * model.units.voltage),
            moving: moving != 0,
            goal_position: Some(counts_to_rad(f64::from(goal), model)),
            hardware_error: status,
            protection: Default::default(),
            ts: now_rfc3339(),
        })
    }

    fn set_position(&mut self, id: MotorId, model: &ModelInfo, position: f64) -> Result<()> {
        let sid = Self::serial_id(id)?;
        let counts = rad_to_counts(position, model);
        let raw = encode_sign_magnitude(counts as i32, SIGN_BIT);
        self.write_reg(sid, reg::GOAL_POSITION, &raw.to_le_bytes())
    }

    fn set_torque(&mut self, id: MotorId, enable: bool) -> Result<()> {
        let sid = Self::serial_id(id)?;
        self.write_reg(sid, reg::TORQUE_ENABLE, &[u8::from(enable)])
    }

    fn reboot(&mut self, id: MotorId) -> Result<()> {
        let sid = Self::serial_id(id)?;
        let link = self.link()?;
        // The servo resets instead of answering.
        serial_io::send(link, &proto::instruction(sid, Instruction::Reboot, &[]))?;
        tracing::info!(%id, "feetech reboot sent");
        Ok(())
    }
}
