use can_transport::{BusState, CanBus, CanFrame, TransportError};
use motor_registry::{Brand, MitRanges, ModelInfo, ModelRegistry, MotorId};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::MotorDriver;
use crate::error::{BusError, Result};
use crate::link::LinkProvider;
use crate::protocol::damiao::{self as proto, rid, Control, MitCommand};
use crate::protocol::FrameError;
use crate::telemetry::{now_rfc3339, Telemetry};

pub const REPLY_TIMEOUT: Duration = Duration::from_millis(10);
pub const BATCH_SIZE: usize = 10;
pub const BATCH_DELAY: Duration = Duration::from_millis(20);
/// |velocity| above this counts as moving, rad/s.
const MOVING_THRESHOLD: f64 = 0.05;

/// Position-hold gains used for MIT position commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamiaoGains {
    pub kp: f32,
    pub kd: f32,
}

impl Default for DamiaoGains {
    fn default() -> Self {
        Self { kp: 10.0, kd: 0.5 }
    }
}

/// Damiao motors on one CAN channel.
pub struct DamiaoDriver {
    interface: String,
    bitrate: u32,
    links: Arc<dyn LinkProvider>,
    registry: Arc<ModelRegistry>,
    bus: Option<Box<dyn CanBus>>,
    gains: DamiaoGains,
    reply_timeout: Duration,
    batch_delay: Duration,
    goals: HashMap<MotorId, f64>,
}

impl DamiaoDriver {
    pub fn new(
        interface: &str,
        bitrate: u32,
        links: Arc<dyn LinkProvider>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            interface: interface.to_string(),
            bitrate,
            links,
            registry,
            bus: None,
            gains: DamiaoGains::default(),
            reply_timeout: REPLY_TIMEOUT,
            batch_delay: BATCH_DELAY,
            goals: HashMap::new(),
        }
    }

    pub fn with_gains(mut self, gains: DamiaoGains) -> Self {
        self.gains = gains;
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn bus_state(&self) -> BusState {
        self.bus
            .as_ref()
            .map(|b| b.bus_state())
            .unwrap_or_default()
    }

    fn can_id(id: MotorId) -> Result<(u16, u16)> {
        match id {
            MotorId::Can { send, recv } if send <= 0x7FF && recv <= 0x7FF => Ok((send, recv)),
            other => Err(BusError::InvalidId(other)),
        }
    }

    fn bus(&mut self) -> Result<&mut dyn CanBus> {
        match self.bus.as_deref_mut() {
            Some(b) => Ok(b),
            None => Err(BusError::NotConnected),
        }
    }

    fn send(&mut self, id: MotorId, frame: Result<CanFrame, FrameError>) -> Result<()> {
        let frame = frame.map_err(|e| BusError::frame(id, e))?;
        self.bus()?.send(&frame)?;
        Ok(())
    }

    /// Feed received frames to `on_frame` until it returns true or the reply window closes.
    fn collect(
        bus: &mut dyn CanBus,
        window: Duration,
        mut on_frame: impl FnMut(&CanFrame) -> bool,
    ) -> Result<bool> {
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            let ms = remaining.as_millis().max(1) as u64;
            match bus.recv(Some(ms)) {
                Ok(frame) => {
                    if on_frame(&frame) {
                        return Ok(true);
                    }
                }
                Err(TransportError::Timeout) => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Wait for feedback from `(send, recv)`.
    fn await_feedback(&mut self, id: MotorId) -> Result<CanFrame> {
        let (send, recv) = Self::can_id(id)?;
        let window = self.reply_timeout;
        let mut reply = None;
        let bus = self.bus()?;
        Self::collect(bus, window, |f| {
            if f.id.raw() == u32::from(recv) && proto::feedback_matches(f.payload(), send) {
                reply = Some(f.clone());
                true
            } else {
                false
            }
        })?;
        reply.ok_or(BusError::Timeout(id))
    }

    fn read_param(&mut self, id: MotorId, register: u8) -> Result<f32> {
        let (send, recv) = Self::can_id(id)?;
        self.send(id, proto::read_param_frame(send, register))?;
        let window = self.reply_timeout;
        let mut value = None;
        let bus = self.bus()?;
        Self::collect(bus, window, |f| {
            if f.id.raw() != u32::from(recv) {
                return false;
            }
            match proto::parse_param_reply(f.payload()) {
                Some((s, r, v)) if s == send && r == register => {
                    value = Some(v);
                    true
                }
                _ => false,
            }
        })?;
        value.ok_or(BusError::Timeout(id))
    }

    fn ranges(model: &ModelInfo) -> Result<MitRanges> {
        model
            .mit
            .ok_or(BusError::Unsupported("model has no MIT ranges"))
    }

    /// Send a command and wait for the feedback frame that acknowledges it.
    ///
    /// No feedback within the reply window is a failure: the motor is absent or dead.
    fn command(&mut self, id: MotorId, frame: Result<CanFrame, FrameError>) -> Result<()> {
        self.send(id, frame)?;
        self.await_feedback(id).map(|_| ()).inspect_err(|e| {
            tracing::debug!(%id, error = %e, "no feedback after command");
        })
    }

    /// Probe `candidates` as send ids and pair each with the arbitration id it answers on.
    fn discover(&mut self, candidates: &[u16]) -> Result<Vec<MotorId>> {
        let window = self.reply_timeout;
        let delay = self.batch_delay;
        let bus = self.bus()?;
        bus.drain();
        let mut seen_replies: BTreeSet<u16> = BTreeSet::new();
        let mut found: Vec<MotorId> = Vec::new();

        'batches: for (n, batch) in candidates.chunks(BATCH_SIZE).enumerate() {
            if n > 0 {
                std::thread::sleep(delay);
            }
            for &send in batch {
                if send == 0 || send > 0x7FF {
                    continue;
                }
                if seen_replies.contains(&send) {
                    tracing::debug!(send, "id already seen as a reply id, not probing");
                    continue;
                }
                let probe = proto::refresh_frame(send)
                    .map_err(|e| BusError::frame(MotorId::can(send, send), e))?;
                match bus.send(&probe) {
                    Ok(()) => {}
                    Err(TransportError::BusOff) => {
                        tracing::warn!(send, "bus-off while probing");
                        break 'batches;
                    }
                    Err(e) => return Err(e.into()),
                }
                Self::collect(bus, window, |f| {
                    let raw = f.id.raw();
                    if f.id.is_extended() || raw == u32::from(proto::PARAM_CHANNEL) {
                        return false;
                    }
                    let recv = raw as u16;
                    seen_replies.insert(recv);
                    if !proto::feedback_matches(f.payload(), send) {
                        tracing::debug!(send, recv, "reply does not carry the probed id, skipped");
                        return false;
                    }
                    let key = MotorId::can(send, recv);
                    if !found.contains(&key) {
                        tracing::debug!(%key, "CAN motor answered");
                        found.push(key);
                    }
                    true
                })?;
            }
            let state = bus.bus_state();
            if state.is_degraded() && found.is_empty() {
                tracing::warn!(%state, "controller degraded with no motors found, aborting scan");
                break;
            }
        }
        Ok(found)
    }
}

impl MotorDriver for DamiaoDriver {
    fn brand(&self) -> Brand {
        Brand::Damiao
    }

    fn interface(&self) -> &str {
        &self.interface
    }

    fn rate(&self) -> u32 {
        self.bitrate
    }

    fn is_connected(&self) -> bool {
        self.bus.is_some()
    }

    fn connect(&mut self) -> Result<()> {
        if self.bus.is_some() {
            return Ok(());
        }
        let bus = self.links.open_can(&self.interface, self.bitrate)?;
        self.bus = Some(bus);
        tracing::info!(interface = %self.interface, bitrate = self.bitrate, "damiao bus connected");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.goals.clear();
        if self.bus.take().is_some() {
            tracing::info!(interface = %self.interface, "damiao bus disconnected");
        }
        Ok(())
    }

    fn ping(&mut self, id: MotorId) -> Result<bool> {
        let (send, _) = Self::can_id(id)?;
        self.send(id, proto::refresh_frame(send))?;
        match self.await_feedback(id) {
            Ok(_) => Ok(true),
            Err(BusError::Timeout(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn scan(&mut self, ids: &[u16]) -> Result<Vec<(MotorId, ModelInfo)>> {
        let keys = self.discover(ids)?;
        let mut out = Vec::with_capacity(keys.len());
        for id in keys {
            match self.identify(id) {
                Ok(model) => {
                    tracing::info!(%id, model = %model.display_name(), "damiao motor found");
                    out.push((id, model));
                }
                Err(e) => tracing::warn!(%id, error = %e, "motor answered but was not identified"),
            }
        }
        Ok(out)
    }

    fn identify(&mut self, id: MotorId) -> Result<ModelInfo> {
        let p_max = self.read_param(id, rid::PMAX)?;
        let v_max = self.read_param(id, rid::VMAX)?;
        let t_max = self.read_param(id, rid::TMAX)?;
        tracing::debug!(%id, p_max, v_max, t_max, "damiao limits");
        self.registry
            .by_mit_limits(p_max, v_max, t_max)
            .cloned()
            .map_err(|source| BusError::Identify { id, source })
    }

    fn read_telemetry(&mut self, id: MotorId, model: &ModelInfo) -> Result<Telemetry> {
        let ranges = Self::ranges(model)?;
        let (send, _) = Self::can_id(id)?;
        self.send(id, proto::refresh_frame(send))?;
        let frame = self.await_feedback(id)?;
        let fb = proto::decode_feedback(frame.payload(), &ranges)
            .map_err(|e| BusError::frame(id, e))?;

        let torque = f64::from(fb.torque);
        let current = model
            .units
            .torque_constant
            .filter(|kt| *kt > 0.0)
            .map(|kt| torque / kt * 1000.0);
        let velocity = f64::from(fb.velocity);
        Ok(Telemetry {
            id,
            position: f64::from(fb.position),
            velocity,
            current,
            load: Some(torque / f64::from(ranges.t_max) * 100.0),
            temperature: f64::from(fb.t_mos.max(fb.t_rotor)),
            voltage: None,
            moving: velocity.abs() > MOVING_THRESHOLD,
            goal_position: self.goals.get(&id).copied(),
            hardware_error: if proto::state::is_fault(fb.state) {
                fb.state
            } else {
                0
            },
            protection: Default::default(),
            ts: now_rfc3339(),
        })
    }

    fn set_position(&mut self, id: MotorId, model: &ModelInfo, position: f64) -> Result<()> {
        let ranges = Self::ranges(model)?;
        let (send, _) = Self::can_id(id)?;
        let target = (position as f32).clamp(-ranges.p_max, ranges.p_max);
        let cmd = MitCommand {
            position: target,
            kp: self.gains.kp,
            kd: self.gains.kd,
            ..Default::default()
        };
        self.command(id, proto::mit_frame(send, &cmd, &ranges))?;
        self.goals.insert(id, f64::from(target));
        Ok(())
    }

    fn set_torque(&mut self, id: MotorId, enable: bool) -> Result<()> {
        let (send, _) = Self::can_id(id)?;
        let cmd = if enable {
            Control::Enable
        } else {
            Control::Disable
        };
        self.command(id, proto::control_frame(send, cmd))
    }

    /// Damiao has no reboot instruction; clearing the latched fault is the closest recovery.
    fn reboot(&mut self, id: MotorId) -> Result<()> {
        let (send, _) = Self::can_id(id)?;
        self.command(id, proto::control_frame(send, Control::ClearError))
    }
}
