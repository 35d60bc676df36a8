//! Feetech STS/SCS packet format: `FF FF ID LEN CODE PARAMS.. CHK`.
//!
//! `LEN` counts `CODE`, the params and the checksum. `CHK` is the one's complement of
//! the byte sum of `ID`, `LEN`, `CODE` and the params. Instruction and status packets
//! share the layout; `CODE` is the instruction going out and the error byte coming back.

use super::FrameError;

pub const HEADER: [u8; 2] = [0xFF, 0xFF];
pub const BROADCAST_ID: u8 = 0xFE;
pub const MAX_ID: u8 = 253;

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    RegWrite = 0x04,
    Action = 0x05,
    Reset = 0x06,
    Reboot = 0x08,
    SyncWrite = 0x83,
}

impl Instruction {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => Instruction::Ping,
            0x02 => Instruction::Read,
            0x03 => Instruction::Write,
            0x04 => Instruction::RegWrite,
            0x05 => Instruction::Action,
            0x06 => Instruction::Reset,
            0x08 => Instruction::Reboot,
            0x83 => Instruction::SyncWrite,
            _ => return None,
        })
    }
}

/// STS-series control table
pub mod reg {
    pub const FIRMWARE_MAJOR: u8 = 0;
    pub const FIRMWARE_MINOR: u8 = 1;
    /// 2 bytes
    pub const MODEL_NUMBER: u8 = 3;
    pub const ID: u8 = 5;
    pub const BAUD_RATE: u8 = 6;
    pub const TORQUE_ENABLE: u8 = 40;
    /// 2 bytes
    pub const GOAL_POSITION: u8 = 42;
    /// 2 bytes, sign bit 15
    pub const GOAL_VELOCITY: u8 = 46;
    pub const LOCK: u8 = 55;
    /// 2 bytes, sign bit 15
    pub const PRESENT_POSITION: u8 = 56;
    /// 2 bytes, sign bit 15
    pub const PRESENT_VELOCITY: u8 = 58;
    /// 2 bytes, sign bit 10, 0.1 %
    pub const PRESENT_LOAD: u8 = 60;
    /// 0.1 V
    pub const PRESENT_VOLTAGE: u8 = 62;
    /// °C
    pub const PRESENT_TEMPERATURE: u8 = 63;
    pub const STATUS: u8 = 65;
    pub const MOVING: u8 = 66;
    /// 2 bytes, sign bit 15
    pub const PRESENT_CURRENT: u8 = 69;
}

/// Sign bit of position, velocity and current registers.
pub const SIGN_BIT: u8 = 15;
/// Sign bit of the load register.
pub const LOAD_SIGN_BIT: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: u8,
    /// Instruction (host → servo) or error bits (servo → host).
    pub code: u8,
    pub params: Vec<u8>,
}

pub fn checksum(bytes: &[u8]) -> u8 {
    let sum: u32 = bytes.iter().map(|&b| u32::from(b)).sum();
    !(sum as u8)
}

pub fn build_packet(id: u8, code: u8, params: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(6 + params.len());
    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.push((params.len() + 2) as u8);
    packet.push(code);
    packet.extend_from_slice(params);
    let chk = checksum(&packet[2..]);
    packet.push(chk);
    packet
}

pub fn instruction(id: u8, instr: Instruction, params: &[u8]) -> Vec<u8> {
    build_packet(id, instr as u8, params)
}

pub fn read_request(id: u8, addr: u8, len: u8) -> Vec<u8> {
    instruction(id, Instruction::Read, &[addr, len])
}

pub fn write_request(id: u8, addr: u8, data: &[u8]) -> Vec<u8> {
    let mut params = Vec::with_capacity(1 + data.len());
    params.push(addr);
    params.extend_from_slice(data);
    instruction(id, Instruction::Write, &params)
}

/// Number of bytes the frame starting at `buf[0]` occupies, once `ID` and `LEN` are known.
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    buf.get(3).map(|&len| 4 + usize::from(len))
}

/// Parse one complete packet (header included).
pub fn parse_packet(frame: &[u8]) -> Result<Packet, FrameError> {
    if frame.len() < 6 {
        return Err(FrameError::Incomplete {
            need: 6,
            have: frame.len(),
        });
    }
    if frame[..2] != HEADER {
        return Err(FrameError::BadHeader);
    }
    let len = usize::from(frame[3]);
    if len < 2 {
        return Err(FrameError::Malformed("length below 2"));
    }
    let total = 4 + len;
    if frame.len() < total {
        return Err(FrameError::Incomplete {
            need: total,
            have: frame.len(),
        });
    }
    let expected = checksum(&frame[2..total - 1]);
    let got = frame[total - 1];
    if expected != got {
        return Err(FrameError::Checksum {
            expected: u16::from(expected),
            got: u16::from(got),
        });
    }
    Ok(Packet {
        id: frame[2],
        code: frame[4],
        params: frame[5..total - 1].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_value() {
        // ~(1+4+3+30+0+2) = ~40
        assert_eq!(checksum(&[1, 4, 0x03, 30, 0, 2]), 215);
    }

    #[test]
    fn test_ping_packet_layout() {
        let p = instruction(1, Instruction::Ping, &[]);
        assert_eq!(p, vec![0xFF, 0xFF, 0x01, 0x02, 0x01, 0xFB]);
    }

    #[test]
    fn test_checksum_reproduces_transmitted_byte() {
        for frame in [
            read_request(5, reg::MODEL_NUMBER, 2),
            write_request(12, reg::GOAL_POSITION, &[0x00, 0x08]),
            instruction(BROADCAST_ID, Instruction::Reboot, &[]),
        ] {
            let last = frame.len() - 1;
            assert_eq!(checksum(&frame[2..last]), frame[last]);
            assert_eq!(frame_len(&frame), Some(frame.len()));
        }
    }

    #[test]
    fn test_parse_status_and_errors() {
        let status = build_packet(5, 0x00, &[0x8F, 0x0C]);
        let p = parse_packet(&status).unwrap();
        assert_eq!((p.id, p.code), (5, 0));
        assert_eq!(u16::from_le_bytes([p.params[0], p.params[1]]), 0x0C8F);

        let mut corrupt = status.clone();
        corrupt[5] ^= 0x01;
        assert!(matches!(
            parse_packet(&corrupt),
            Err(FrameError::Checksum { .. })
        ));
        assert!(matches!(
            parse_packet(&status[..4]),
            Err(FrameError::Incomplete { .. })
        ));
        assert_eq!(
            parse_packet(&[0xFF, 0xFE, 1, 2, 0, 0xFC]),
            Err(FrameError::BadHeader)
        );
    }
}
