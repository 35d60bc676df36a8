//! Dynamixel Protocol 2.0: `FF FF FD 00 ID LEN_L LEN_H INST PARAMS.. CRC_L CRC_H`.
//!
//! `LEN` counts the instruction byte, the (stuffed) params and the two CRC bytes. The CRC
//! is CRC-16/BUYPASS (poly 0x8005, init 0, not reflected) over everything before it.
//! Inside the params any `FF FF FD` run is followed by an extra `FD`.

use super::FrameError;

pub const HEADER: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];
pub const BROADCAST_ID: u8 = 0xFE;
pub const MAX_ID: u8 = 252;
/// Instruction byte of every status packet.
pub const STATUS: u8 = 0x55;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    Reboot = 0x08,
}

impl Instruction {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => Instruction::Ping,
            0x02 => Instruction::Read,
            0x03 => Instruction::Write,
            0x08 => Instruction::Reboot,
            _ => return None,
        })
    }
}

/// X-series control table
pub mod reg {
    /// 2 bytes
    pub const MODEL_NUMBER: u16 = 0;
    pub const FIRMWARE_VERSION: u16 = 6;
    pub const ID: u16 = 7;
    pub const BAUD_RATE: u16 = 8;
    pub const TORQUE_ENABLE: u16 = 64;
    pub const HARDWARE_ERROR: u16 = 70;
    /// 4 bytes
    pub const GOAL_VELOCITY: u16 = 104;
    /// 4 bytes
    pub const GOAL_POSITION: u16 = 116;
    pub const MOVING: u16 = 122;
    /// 2 bytes; current on current-sensing models, load otherwise
    pub const PRESENT_CURRENT: u16 = 126;
    /// 4 bytes, 0.229 rpm
    pub const PRESENT_VELOCITY: u16 = 128;
    /// 4 bytes
    pub const PRESENT_POSITION: u16 = 132;
    /// 2 bytes, 0.1 V
    pub const PRESENT_INPUT_VOLTAGE: u16 = 144;
    /// °C
    pub const PRESENT_TEMPERATURE: u16 = 146;
}

/// Status packet error byte: bit 7 flags a pending hardware alert.
pub const ALERT_BIT: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: u8,
    pub instruction: u8,
    /// Unstuffed params. For status packets `params[0]` is the error byte.
    pub params: Vec<u8>,
}

impl Packet {
    pub fn is_status(&self) -> bool {
        self.instruction == STATUS
    }

    /// Error byte and payload of a status packet.
    pub fn status(&self) -> Result<(u8, &[u8]), FrameError> {
        match self.params.split_first() {
            Some((err, data)) if self.is_status() => Ok((*err, data)),
            _ => Err(FrameError::Malformed("not a status packet")),
        }
    }
}

pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in bytes {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x8005
            } else {
                crc << 1
            };
        }
    }
    crc
}

pub fn stuff(params: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(params.len() + 2);
    for &b in params {
        out.push(b);
        if out.len() >= 3 && out[out.len() - 3..] == [0xFF, 0xFF, 0xFD] {
            out.push(0xFD);
        }
    }
    out
}

pub fn unstuff(params: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(params.len());
    let mut i = 0;
    while i < params.len() {
        out.push(params[i]);
        if params[i] == 0xFD
            && i >= 2
            && params[i - 2..i] == [0xFF, 0xFF]
            && params.get(i + 1) == Some(&0xFD)
        {
            i += 1;
        }
        i += 1;
    }
    out
}

pub fn build_packet(id: u8, instruction: u8, params: &[u8]) -> Vec<u8> {
    let body = stuff(params);
    let len = (body.len() + 3) as u16;
    let mut packet = Vec::with_capacity(10 + body.len());
    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.extend_from_slice(&len.to_le_bytes());
    packet.push(instruction);
    packet.extend_from_slice(&body);
    let crc = crc16(&packet);
    packet.extend_from_slice(&crc.to_le_bytes());
    packet
}

pub fn instruction(id: u8, instr: Instruction, params: &[u8]) -> Vec<u8> {
    build_packet(id, instr as u8, params)
}

pub fn read_request(id: u8, addr: u16, len: u16) -> Vec<u8> {
    let [a0, a1] = addr.to_le_bytes();
    let [l0, l1] = len.to_le_bytes();
    instruction(id, Instruction::Read, &[a0, a1, l0, l1])
}

pub fn write_request(id: u8, addr: u16, data: &[u8]) -> Vec<u8> {
    let mut params = Vec::with_capacity(2 + data.len());
    params.extend_from_slice(&addr.to_le_bytes());
    params.extend_from_slice(data);
    instruction(id, Instruction::Write, &params)
}

pub fn status_packet(id: u8, error: u8, data: &[u8]) -> Vec<u8> {
    let mut params = Vec::with_capacity(1 + data.len());
    params.push(error);
    params.extend_from_slice(data);
    build_packet(id, STATUS, &params)
}

/// Total frame length once the 7-byte prefix (header, id, length) is available.
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    match buf {
        [_, _, _, _, _, lo, hi, ..] => Some(7 + usize::from(u16::from_le_bytes([*lo, *hi]))),
        _ => None,
    }
}

pub fn parse_packet(frame: &[u8]) -> Result<Packet, FrameError> {
    if frame.len() < 10 {
        return Err(FrameError::Incomplete {
            need: 10,
            have: frame.len(),
        });
    }
    if frame[..4] != HEADER {
        return Err(FrameError::BadHeader);
    }
    let total = frame_len(frame).ok_or(FrameError::Malformed("length"))?;
    if total < 10 {
        return Err(FrameError::Malformed("length below 3"));
    }
    if frame.len() < total {
        return Err(FrameError::Incomplete {
            need: total,
            have: frame.len(),
        });
    }
    let expected = crc16(&frame[..total - 2]);
    let got = u16::from_le_bytes([frame[total - 2], frame[total - 1]]);
    if expected != got {
        return Err(FrameError::Checksum { expected, got });
    }
    Ok(Packet {
        id: frame[4],
        instruction: frame[7],
        params: unstuff(&frame[8..total - 2]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_crc_matches_reference() {
        let ping = instruction(1, Instruction::Ping, &[]);
        assert_eq!(
            ping,
            vec![0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x03, 0x00, 0x01, 0x19, 0x4E]
        );
    }

    #[test]
    fn test_read_request_matches_reference() {
        let read = read_request(1, reg::PRESENT_POSITION, 4);
        assert_eq!(&read[read.len() - 2..], &[0x1D, 0x15]);
    }

    #[test]
    fn test_crc_reproduces_transmitted_bytes() {
        for frame in [
            write_request(3, reg::GOAL_POSITION, &2048i32.to_le_bytes()),
            status_packet(7, 0, &[0xFF, 0xFF, 0xFD, 0x01]),
            instruction(BROADCAST_ID, Instruction::Reboot, &[]),
        ] {
            let n = frame.len();
            let crc = crc16(&frame[..n - 2]).to_le_bytes();
            assert_eq!(&frame[n - 2..], &crc);
            assert_eq!(frame_len(&frame), Some(n));
        }
    }

    #[test]
    fn test_stuffing_inserts_and_removes_fd() {
        let raw = [0x01, 0xFF, 0xFF, 0xFD, 0x02];
        let stuffed = stuff(&raw);
        assert_eq!(stuffed, vec![0x01, 0xFF, 0xFF, 0xFD, 0xFD, 0x02]);
        assert_eq!(unstuff(&stuffed), raw.to_vec());

        let status = status_packet(2, 0, &[0xFF, 0xFF, 0xFD]);
        let p = parse_packet(&status).unwrap();
        assert_eq!(p.status().unwrap(), (0, &[0xFF, 0xFF, 0xFD][..]));
    }

    #[test]
    fn test_parse_rejects_corruption() {
        let mut status = status_packet(2, 0, &[0xAE, 0x04]);
        let n = status.len();
        status[n - 3] ^= 0xFF;
        assert!(matches!(
            parse_packet(&status),
            Err(FrameError::Checksum { .. })
        ));
        let ping = instruction(1, Instruction::Ping, &[]);
        assert!(parse_packet(&ping).unwrap().status().is_err());
    }
}
