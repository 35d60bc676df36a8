//! Pure wire codecs. Nothing in here touches a port.

pub mod damiao;
pub mod dynamixel;
pub mod feetech;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame too short: need {need} bytes, have {have}")]
    Incomplete { need: usize, have: usize },
    #[error("bad header")]
    BadHeader,
    #[error("checksum mismatch: expected 0x{expected:04X}, got 0x{got:04X}")]
    Checksum { expected: u16, got: u16 },
    #[error("reply from id {got}, expected {expected}")]
    IdMismatch { expected: u8, got: u8 },
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

/// Decode a sign-magnitude register where `sign_bit` flags a negative value.
pub fn decode_sign_magnitude(raw: u16, sign_bit: u8) -> i32 {
    let sign = 1u16 << sign_bit;
    let magnitude = i32::from(raw & (sign - 1));
    if raw & sign != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Encode into sign-magnitude, saturating the magnitude to the bits below `sign_bit`.
pub fn encode_sign_magnitude(value: i32, sign_bit: u8) -> u16 {
    let sign = 1u32 << sign_bit;
    let magnitude = value.unsigned_abs().min(sign - 1) as u16;
    if value < 0 {
        magnitude | sign as u16
    } else {
        magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_magnitude_bit15() {
        assert_eq!(encode_sign_magnitude(-100, 15), 0x8064);
        assert_eq!(decode_sign_magnitude(0x8064, 15), -100);
        assert_eq!(decode_sign_magnitude(100, 15), 100);
        assert_eq!(encode_sign_magnitude(i32::MAX, 15), 0x7FFF);
    }

    #[test]
    fn test_sign_magnitude_bit10_load() {
        // 0x0400 | 250 → -25.0 %
        assert_eq!(decode_sign_magnitude(0x04FA, 10), -250);
        assert_eq!(encode_sign_magnitude(-250, 10), 0x04FA);
        assert_eq!(encode_sign_magnitude(5000, 10), 0x03FF);
    }
}
