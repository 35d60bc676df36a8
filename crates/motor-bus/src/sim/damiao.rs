use can_transport::{CanFrame, CanId, MockBus, MockHandle};
use motor_registry::MitRanges;
use std::sync::{Arc, Mutex};

use crate::protocol::damiao::{self as proto, rid, state, Control, Feedback, ParamRequest};

/// One simulated Damiao actuator.
#[derive(Debug, Clone)]
pub struct SimMotor {
    pub send: u16,
    pub recv: u16,
    pub ranges: MitRanges,
    pub kt: f32,
    pub gear_ratio: f32,
    pub position: f32,
    pub velocity: f32,
    pub torque: f32,
    pub t_mos: u8,
    pub t_rotor: u8,
    pub enabled: bool,
    /// Fault nibble reported instead of the enable state, 0 when healthy.
    pub fault: u8,
    /// Id nibble to put in feedback instead of the real one.
    pub reported_nibble: Option<u8>,
}

impl SimMotor {
    pub fn new(send: u16, recv: u16, p_max: f32, v_max: f32, t_max: f32) -> Self {
        Self {
            send,
            recv,
            ranges: MitRanges {
                p_max,
                v_max,
                t_max,
            },
            kt: 0.945,
            gear_ratio: 10.0,
            position: 0.0,
            velocity: 0.0,
            torque: 0.0,
            t_mos: 28,
            t_rotor: 26,
            enabled: false,
            fault: 0,
            reported_nibble: None,
        }
    }

    /// Feedback carries `nibble` instead of the motor's own id.
    pub fn misreporting(mut self, nibble: u8) -> Self {
        self.reported_nibble = Some(nibble & 0x0F);
        self
    }

    fn feedback(&self) -> Option<CanFrame> {
        let state = if self.fault != 0 {
            self.fault
        } else if self.enabled {
            state::ENABLED
        } else {
            state::DISABLED
        };
        let fb = Feedback {
            id_nibble: self
                .reported_nibble
                .unwrap_or((self.send & 0x0F) as u8),
            state,
            position: self.position,
            velocity: self.velocity,
            torque: self.torque,
            t_mos: self.t_mos,
            t_rotor: self.t_rotor,
        };
        reply(self.recv, &proto::encode_feedback(&fb, &self.ranges))
    }

    fn param(&self, register: u8) -> Option<f32> {
        Some(match register {
            rid::KT => self.kt,
            rid::GEAR_RATIO => self.gear_ratio,
            rid::PMAX => self.ranges.p_max,
            rid::VMAX => self.ranges.v_max,
            rid::TMAX => self.ranges.t_max,
            _ => return None,
        })
    }
}

fn reply(id: u16, data: &[u8]) -> Option<CanFrame> {
    CanId::standard(id).and_then(|id| CanFrame::new(id, data))
}

struct Bench {
    bitrate: u32,
    motors: Vec<SimMotor>,
}

impl Bench {
    fn respond(&mut self, frame: &CanFrame) -> Vec<CanFrame> {
        if frame.id.is_extended() {
            return Vec::new();
        }
        let id = frame.id.raw() as u16;
        if id == proto::PARAM_CHANNEL {
            return match proto::parse_param_request(frame.payload()) {
                Some(ParamRequest::Refresh { send_id }) => self
                    .motors
                    .iter()
                    .filter(|m| m.send == send_id)
                    .filter_map(SimMotor::feedback)
                    .collect(),
                Some(ParamRequest::Read { send_id, rid }) => self
                    .motors
                    .iter()
                    .filter(|m| m.send == send_id)
                    .filter_map(|m| {
                        let value = m.param(rid)?;
                        reply(m.recv, &proto::param_reply(send_id, rid, value))
                    })
                    .collect(),
                None => Vec::new(),
            };
        }
        let mut out = Vec::new();
        for motor in self.motors.iter_mut().filter(|m| m.send == id) {
            match Control::parse(frame.payload()) {
                Some(Control::Enable) => motor.enabled = true,
                Some(Control::Disable) => motor.enabled = false,
                Some(Control::ClearError) => motor.fault = 0,
                Some(Control::SaveZero) => motor.position = 0.0,
                None => match proto::decode_mit(frame.payload(), &motor.ranges) {
                    Ok(cmd) if motor.enabled => motor.position = cmd.position,
                    Ok(_) => {}
                    Err(_) => continue,
                },
            }
            out.extend(motor.feedback());
        }
        out
    }
}

/// Simulated Damiao CAN bench.
#[derive(Clone)]
pub struct DamiaoSim {
    bench: Arc<Mutex<Bench>>,
    last_handle: Arc<Mutex<Option<MockHandle>>>,
}

impl DamiaoSim {
    pub fn new(bitrate: u32) -> Self {
        Self {
            bench: Arc::new(Mutex::new(Bench {
                bitrate,
                motors: Vec::new(),
            })),
            last_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn add_motor(&self, motor: SimMotor) {
        self.update_all(|motors| motors.push(motor));
    }

    pub fn set_temperature(&self, send: u16, t_mos: u8, t_rotor: u8) {
        self.update(send, |m| {
            m.t_mos = t_mos;
            m.t_rotor = t_rotor;
        });
    }

    pub fn set_fault(&self, send: u16, nibble: u8) {
        self.update(send, |m| m.fault = nibble);
    }

    /// Output torque in Nm reported by feedback.
    pub fn set_torque(&self, send: u16, nm: f32) {
        self.update(send, |m| m.torque = nm);
    }

    pub fn motor(&self, send: u16) -> Option<SimMotor> {
        self.bench
            .lock()
            .ok()
            .and_then(|b| b.motors.iter().find(|m| m.send == send).cloned())
    }

    /// Handle on the most recently opened channel.
    pub fn handle(&self) -> Option<MockHandle> {
        self.last_handle.lock().ok().and_then(|h| h.clone())
    }

    /// Send ids the host has probed with a refresh request, in order.
    pub fn probed_ids(&self) -> Vec<u16> {
        self.handle()
            .map(|h| h.sent())
            .unwrap_or_default()
            .iter()
            .filter(|f| f.id.raw() == u32::from(proto::PARAM_CHANNEL))
            .filter_map(|f| match proto::parse_param_request(f.payload()) {
                Some(ParamRequest::Refresh { send_id }) => Some(send_id),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn open(&self, interface: &str, bitrate: u32) -> MockBus {
        let bench = self.bench.clone();
        let bus = MockBus::with_responder(
            interface,
            Box::new(move |frame: &CanFrame| match bench.lock() {
                // A mismatched bitrate only produces error frames on a real bus.
                Ok(mut bench) if bench.bitrate == bitrate => bench.respond(frame),
                _ => Vec::new(),
            }),
        );
        if let Ok(mut last) = self.last_handle.lock() {
            *last = Some(bus.handle());
        }
        bus
    }

    fn update(&self, send: u16, f: impl FnOnce(&mut SimMotor)) {
        self.update_all(|motors| {
            if let Some(m) = motors.iter_mut().find(|m| m.send == send) {
                f(m);
            }
        });
    }

    fn update_all(&self, f: impl FnOnce(&mut Vec<SimMotor>)) {
        if let Ok(mut bench) = self.bench.lock() {
            f(&mut bench.motors);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_transport::CanBus;

    #[test]
    fn test_refresh_answers_on_master_id() {
        let sim = DamiaoSim::new(1_000_000);
        sim.add_motor(SimMotor::new(0x01, 0x11, 12.5, 30.0, 10.0));
        let mut bus = sim.open("mock0", 1_000_000);
        bus.send(&proto::refresh_frame(0x01).unwrap()).unwrap();
        let reply = bus.recv(Some(10)).unwrap();
        assert_eq!(reply.id.raw(), 0x11);
        assert!(proto::feedback_matches(reply.payload(), 0x01));
        assert_eq!(sim.probed_ids(), vec![0x01]);
    }

    #[test]
    fn test_enable_and_wrong_bitrate() {
        let sim = DamiaoSim::new(1_000_000);
        sim.add_motor(SimMotor::new(0x02, 0x12, 12.5, 8.0, 28.0));
        let mut slow = sim.open("mock0", 500_000);
        slow.send(&proto::control_frame(0x02, Control::Enable).unwrap())
            .unwrap();
        assert!(slow.recv(Some(10)).is_err());
        assert!(!sim.motor(0x02).unwrap().enabled);

        let mut bus = sim.open("mock0", 1_000_000);
        bus.send(&proto::control_frame(0x02, Control::Enable).unwrap())
            .unwrap();
        assert!(bus.recv(Some(10)).is_ok());
        assert!(sim.motor(0x02).unwrap().enabled);
    }
}
