//! Damiao DM-J series CAN frames.
//!
//! Commands travel on the motor's send id, feedback comes back on its master (receive) id.
//! MIT command payload, big-endian bit fields:
//! `p[15:8] p[7:0] v[11:4] v[3:0]|kp[11:8] kp[7:0] kd[11:4] kd[3:0]|t[11:8] t[7:0]`.
//! Feedback payload:
//! `err<<4|id[3:0] p[15:8] p[7:0] v[11:4] v[3:0]|t[11:8] t[7:0] T_mos T_rotor`.

use can_transport::{CanFrame, CanId};
use motor_registry::MitRanges;

use super::FrameError;

/// Broadcast channel for parameter access and state refresh.
pub const PARAM_CHANNEL: u16 = 0x7FF;
pub const KP_MAX: f32 = 500.0;
pub const KD_MAX: f32 = 5.0;

const CMD_REFRESH: u8 = 0xCC;
const CMD_READ_PARAM: u8 = 0x33;

/// Register ids readable through [`read_param_frame`].
pub mod rid {
    pub const KT: u8 = 1;
    pub const GEAR_RATIO: u8 = 20;
    pub const PMAX: u8 = 21;
    pub const VMAX: u8 = 22;
    pub const TMAX: u8 = 23;
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Enable = 0xFC,
    Disable = 0xFD,
    SaveZero = 0xFE,
    ClearError = 0xFB,
}

impl Control {
    /// Recognise a control frame payload (`FF` x7 then the command byte).
    pub fn parse(data: &[u8]) -> Option<Self> {
        match data {
            [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, cmd] => match *cmd {
                0xFC => Some(Control::Enable),
                0xFD => Some(Control::Disable),
                0xFE => Some(Control::SaveZero),
                0xFB => Some(Control::ClearError),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Error nibble of a feedback frame.
pub mod state {
    pub const DISABLED: u8 = 0x0;
    pub const ENABLED: u8 = 0x1;
    pub const OVER_VOLTAGE: u8 = 0x8;
    pub const UNDER_VOLTAGE: u8 = 0x9;
    pub const OVER_CURRENT: u8 = 0xA;
    pub const MOS_OVER_TEMP: u8 = 0xB;
    pub const ROTOR_OVER_TEMP: u8 = 0xC;
    pub const COMM_LOST: u8 = 0xD;
    pub const OVERLOAD: u8 = 0xE;

    pub fn is_fault(nibble: u8) -> bool {
        nibble >= OVER_VOLTAGE
    }
}

/// Float → n-bit unsigned, clamped to `[min, max]`.
pub fn map_to_uint(x: f32, min: f32, max: f32, nbits: u32) -> u32 {
    let hi = ((1u64 << nbits) - 1) as f32;
    if !(min < max) {
        return 0;
    }
    let mut y = (x - min) / (max - min);
    if y.is_nan() {
        y = 0.0;
    }
    (y.clamp(0.0, 1.0) * hi).round() as u32
}

pub fn unmap_from_uint(u: u32, min: f32, max: f32, nbits: u32) -> f32 {
    if !(min < max) {
        return min;
    }
    let hi = ((1u64 << nbits) - 1) as f32;
    min + (u as f32 / hi) * (max - min)
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MitCommand {
    /// rad
    pub position: f32,
    /// rad/s
    pub velocity: f32,
    pub kp: f32,
    pub kd: f32,
    /// Nm
    pub torque: f32,
}

pub fn encode_mit(cmd: &MitCommand, r: &MitRanges) -> [u8; 8] {
    let p = map_to_uint(cmd.position, -r.p_max, r.p_max, 16) as u16;
    let v = map_to_uint(cmd.velocity, -r.v_max, r.v_max, 12) as u16;
    let kp = map_to_uint(cmd.kp, 0.0, KP_MAX, 12) as u16;
    let kd = map_to_uint(cmd.kd, 0.0, KD_MAX, 12) as u16;
    let t = map_to_uint(cmd.torque, -r.t_max, r.t_max, 12) as u16;
    [
        (p >> 8) as u8,
        (p & 0xFF) as u8,
        (v >> 4) as u8,
        ((v & 0x0F) as u8) << 4 | (kp >> 8) as u8 & 0x0F,
        (kp & 0xFF) as u8,
        (kd >> 4) as u8,
        ((kd & 0x0F) as u8) << 4 | (t >> 8) as u8 & 0x0F,
        (t & 0xFF) as u8,
    ]
}

pub fn decode_mit(data: &[u8], r: &MitRanges) -> Result<MitCommand, FrameError> {
    let d: &[u8; 8] = data
        .try_into()
        .map_err(|_| FrameError::Malformed("MIT payload must be 8 bytes"))?;
    let p = u32::from(d[0]) << 8 | u32::from(d[1]);
    let v = u32::from(d[2]) << 4 | u32::from(d[3] >> 4);
    let kp = u32::from(d[3] & 0x0F) << 8 | u32::from(d[4]);
    let kd = u32::from(d[5]) << 4 | u32::from(d[6] >> 4);
    let t = u32::from(d[6] & 0x0F) << 8 | u32::from(d[7]);
    Ok(MitCommand {
        position: unmap_from_uint(p, -r.p_max, r.p_max, 16),
        velocity: unmap_from_uint(v, -r.v_max, r.v_max, 12),
        kp: unmap_from_uint(kp, 0.0, KP_MAX, 12),
        kd: unmap_from_uint(kd, 0.0, KD_MAX, 12),
        torque: unmap_from_uint(t, -r.t_max, r.t_max, 12),
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feedback {
    /// Low nibble of the motor's send id.
    pub id_nibble: u8,
    pub state: u8,
    pub position: f32,
    pub velocity: f32,
    pub torque: f32,
    /// °C
    pub t_mos: u8,
    /// °C
    pub t_rotor: u8,
}

pub fn encode_feedback(fb: &Feedback, r: &MitRanges) -> [u8; 8] {
    let p = map_to_uint(fb.position, -r.p_max, r.p_max, 16) as u16;
    let v = map_to_uint(fb.velocity, -r.v_max, r.v_max, 12) as u16;
    let t = map_to_uint(fb.torque, -r.t_max, r.t_max, 12) as u16;
    [
        (fb.state << 4) | (fb.id_nibble & 0x0F),
        (p >> 8) as u8,
        (p & 0xFF) as u8,
        (v >> 4) as u8,
        ((v & 0x0F) as u8) << 4 | (t >> 8) as u8 & 0x0F,
        (t & 0xFF) as u8,
        fb.t_mos,
        fb.t_rotor,
    ]
}

pub fn decode_feedback(data: &[u8], r: &MitRanges) -> Result<Feedback, FrameError> {
    let d: &[u8; 8] = data
        .try_into()
        .map_err(|_| FrameError::Malformed("feedback payload must be 8 bytes"))?;
    let p = u32::from(d[1]) << 8 | u32::from(d[2]);
    let v = u32::from(d[3]) << 4 | u32::from(d[4] >> 4);
    let t = u32::from(d[4] & 0x0F) << 8 | u32::from(d[5]);
    Ok(Feedback {
        id_nibble: d[0] & 0x0F,
        state: d[0] >> 4,
        position: unmap_from_uint(p, -r.p_max, r.p_max, 16),
        velocity: unmap_from_uint(v, -r.v_max, r.v_max, 12),
        torque: unmap_from_uint(t, -r.t_max, r.t_max, 12),
        t_mos: d[6],
        t_rotor: d[7],
    })
}

/// True when a feedback payload claims to come from `send_id`.
pub fn feedback_matches(data: &[u8], send_id: u16) -> bool {
    data.len() == 8 && u16::from(data[0] & 0x0F) == send_id & 0x0F
}

fn frame(id: u16, data: &[u8]) -> Result<CanFrame, FrameError> {
    CanId::standard(id)
        .and_then(|id| CanFrame::new(id, data))
        .ok_or(FrameError::Malformed("CAN id out of range"))
}

pub fn control_frame(send_id: u16, cmd: Control) -> Result<CanFrame, FrameError> {
    let mut data = [0xFF; 8];
    data[7] = cmd as u8;
    frame(send_id, &data)
}

pub fn mit_frame(send_id: u16, cmd: &MitCommand, r: &MitRanges) -> Result<CanFrame, FrameError> {
    frame(send_id, &encode_mit(cmd, r))
}

/// Ask a motor to report its state without changing it.
pub fn refresh_frame(send_id: u16) -> Result<CanFrame, FrameError> {
    let [lo, hi] = send_id.to_le_bytes();
    frame(PARAM_CHANNEL, &[lo, hi, CMD_REFRESH, 0, 0, 0, 0, 0])
}

pub fn read_param_frame(send_id: u16, rid: u8) -> Result<CanFrame, FrameError> {
    let [lo, hi] = send_id.to_le_bytes();
    frame(PARAM_CHANNEL, &[lo, hi, CMD_READ_PARAM, rid, 0, 0, 0, 0])
}

/// Requests on the parameter channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRequest {
    Refresh { send_id: u16 },
    Read { send_id: u16, rid: u8 },
}

pub fn parse_param_request(data: &[u8]) -> Option<ParamRequest> {
    match data {
        [lo, hi, CMD_REFRESH, ..] => Some(ParamRequest::Refresh {
            send_id: u16::from_le_bytes([*lo, *hi]),
        }),
        [lo, hi, CMD_READ_PARAM, rid, ..] => Some(ParamRequest::Read {
            send_id: u16::from_le_bytes([*lo, *hi]),
            rid: *rid,
        }),
        _ => None,
    }
}

pub fn param_reply(send_id: u16, rid: u8, value: f32) -> [u8; 8] {
    let [lo, hi] = send_id.to_le_bytes();
    let [v0, v1, v2, v3] = value.to_le_bytes();
    [lo, hi, CMD_READ_PARAM, rid, v0, v1, v2, v3]
}

/// `(send_id, rid, value)` from a parameter read reply.
pub fn parse_param_reply(data: &[u8]) -> Option<(u16, u8, f32)> {
    match data {
        [lo, hi, CMD_READ_PARAM, rid, v0, v1, v2, v3] => Some((
            u16::from_le_bytes([*lo, *hi]),
            *rid,
            f32::from_le_bytes([*v0, *v1, *v2, *v3]),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DM4310: MitRanges = MitRanges {
        p_max: 12.5,
        v_max: 30.0,
        t_max: 10.0,
    };

    #[test]
    fn test_mit_extremes_within_one_step() {
        let step_p = 2.0 * DM4310.p_max / 65535.0;
        for p in [-DM4310.p_max, DM4310.p_max] {
            let cmd = MitCommand {
                position: p,
                ..Default::default()
            };
            let back = decode_mit(&encode_mit(&cmd, &DM4310), &DM4310).unwrap();
            assert!((back.position - p).abs() <= step_p, "{p} -> {}", back.position);
        }
    }

    #[test]
    fn test_mit_gains_and_clamping() {
        let cmd = MitCommand {
            position: 100.0,
            velocity: -3.0,
            kp: 600.0,
            kd: 1.0,
            torque: 2.5,
        };
        let back = decode_mit(&encode_mit(&cmd, &DM4310), &DM4310).unwrap();
        assert!((back.position - DM4310.p_max).abs() < 1e-3);
        assert!((back.kp - KP_MAX).abs() < 1e-3);
        assert!((back.kd - 1.0).abs() <= KD_MAX / 4095.0);
        assert!((back.velocity + 3.0).abs() <= 2.0 * DM4310.v_max / 4095.0);
        assert!((back.torque - 2.5).abs() <= 2.0 * DM4310.t_max / 4095.0);
    }

    #[test]
    fn test_zero_command_layout() {
        // Mid-scale position 0x8000 and mid-scale velocity/torque 0x800.
        let bytes = encode_mit(&MitCommand::default(), &DM4310);
        assert_eq!(bytes, [0x80, 0x00, 0x80, 0x00, 0x00, 0x00, 0x08, 0x00]);
    }

    #[test]
    fn test_feedback_fields() {
        let fb = Feedback {
            id_nibble: 3,
            state: state::ENABLED,
            position: 1.0,
            velocity: -2.0,
            torque: 0.5,
            t_mos: 41,
            t_rotor: 38,
        };
        let data = encode_feedback(&fb, &DM4310);
        assert_eq!(data[0], 0x13);
        assert!(feedback_matches(&data, 3));
        assert!(feedback_matches(&data, 0x13));
        assert!(!feedback_matches(&data, 4));
        let back = decode_feedback(&data, &DM4310).unwrap();
        assert_eq!((back.t_mos, back.t_rotor, back.state), (41, 38, 1));
        assert!((back.position - 1.0).abs() < 1e-3);
        assert!(decode_feedback(&data[..7], &DM4310).is_err());
    }

    #[test]
    fn test_param_frames() {
        let f = read_param_frame(0x02, rid::PMAX).unwrap();
        assert_eq!(f.id.raw(), 0x7FF);
        assert_eq!(
            parse_param_request(f.payload()),
            Some(ParamRequest::Read {
                send_id: 2,
                rid: rid::PMAX
            })
        );
        let reply = param_reply(2, rid::VMAX, 30.0);
        assert_eq!(parse_param_reply(&reply), Some((2, rid::VMAX, 30.0)));

        let refresh = refresh_frame(5).unwrap();
        assert_eq!(refresh.payload()[..3], [5, 0, 0xCC]);
        let enable = control_frame(1, Control::Enable).unwrap();
        assert_eq!(Control::parse(enable.payload()), Some(Control::Enable));
    }
}
