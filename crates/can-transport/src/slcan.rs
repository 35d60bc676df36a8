//! Lawicel SLCAN: ASCII CAN frames over a USB serial adapter.

use crate::{BusInfo, CanBus, CanFilter, CanFrame, CanId, Result, Timestamp, TransportError};
use serialport::{SerialPort, SerialPortType};
use std::fmt::Write as _;
use std::io::{Read, Write};
use std::time::Duration;

/// `S<n>` setup codes for the standard bit rates.
const SETUP_CODES: [(u32, u8); 9] = [
    (10_000, b'0'),
    (20_000, b'1'),
    (50_000, b'2'),
    (100_000, b'3'),
    (125_000, b'4'),
    (250_000, b'5'),
    (500_000, b'6'),
    (800_000, b'7'),
    (1_000_000, b'8'),
];

const DEFAULT_BITRATE: u32 = 500_000;

/// Setup code for `bitrate`, or `None` when the adapter has no preset for it.
fn setup_code(bitrate: u32) -> Option<u8> {
    SETUP_CODES
        .iter()
        .find(|(bps, _)| *bps == bitrate)
        .map(|(_, code)| *code)
}

pub struct SlcanBus {
    path: String,
    port: Box<dyn SerialPort>,
    // Bytes read past the last complete line.
    pending: Vec<u8>,
}

impl SlcanBus {
    /// Close any open channel, program `bitrate` and reopen.
    pub fn open_at(path: &str, bitrate: u32) -> Result<Self> {
        let code = setup_code(bitrate).ok_or(TransportError::UnsupportedBitrate(bitrate))?;
        let mut port = serialport::new(path, 115_200)
            .timeout(Duration::from_millis(200))
            .open()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        // A channel that was never opened rejects `C`; that is fine.
        if let Err(e) = command(&mut *port, b"C\r") {
            tracing::trace!(path, error = %e, "slcan close before setup");
        }
        command(&mut *port, &[b'S', code, b'\r'])?;
        command(&mut *port, b"O\r")?;
        tracing::debug!(path, bitrate, "slcan channel open");
        Ok(Self {
            path: path.to_string(),
            port,
            pending: Vec::with_capacity(64),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next complete frame line already buffered, skipping command acks.
    fn take_line(&mut self) -> Option<Vec<u8>> {
        while let Some(end) = self.pending.iter().position(|&b| b == b'\r' || b == 0x07) {
            let mut line: Vec<u8> = self.pending.drain(..=end).collect();
            line.pop();
            if matches!(line.first(), Some(b't' | b'T' | b'r' | b'R')) {
                return Some(line);
            }
        }
        None
    }
}

fn command(port: &mut dyn SerialPort, bytes: &[u8]) -> Result<()> {
    port.write_all(bytes)
        .map_err(|e| TransportError::Io(e.to_string()))
}

fn encode(frame: &CanFrame) -> Result<String> {
    if frame.rtr {
        return Err(TransportError::Unsupported("slcan remote frames"));
    }
    if frame.len > 8 {
        return Err(TransportError::InvalidFrame("dlc > 8"));
    }
    let mut line = String::with_capacity(32);
    // Writing into a String cannot fail.
    let _ = if frame.id.is_extended() {
        write!(line, "T{:08X}{}", frame.id.raw(), frame.len)
    } else {
        write!(line, "t{:03X}{}", frame.id.raw(), frame.len)
    };
    for byte in frame.payload() {
        let _ = write!(line, "{byte:02X}");
    }
    line.push('\r');
    Ok(line)
}

fn hex<T: TryFrom<u32>>(digits: &[u8], what: &'static str) -> Result<T> {
    let text = std::str::from_utf8(digits).map_err(|_| TransportError::InvalidFrame(what))?;
    let value = u32::from_str_radix(text, 16).map_err(|_| TransportError::InvalidFrame(what))?;
    T::try_from(value).map_err(|_| TransportError::InvalidFrame(what))
}

/// Parse one line without its terminator.
fn decode(line: &[u8]) -> Result<CanFrame> {
    let (&tag, rest) = line
        .split_first()
        .ok_or(TransportError::InvalidFrame("empty"))?;
    let extended = tag.is_ascii_uppercase();
    let id_digits = if extended { 8 } else { 3 };
    if !matches!(tag, b't' | b'T' | b'r' | b'R') {
        return Err(TransportError::InvalidFrame("unknown header"));
    }
    if rest.len() <= id_digits {
        return Err(TransportError::InvalidFrame("short header"));
    }
    let raw: u32 = hex(&rest[..id_digits], "id")?;
    let id = if extended {
        CanId::extended(raw)
    } else {
        u16::try_from(raw).ok().and_then(CanId::standard)
    }
    .ok_or(TransportError::InvalidFrame("id range"))?;

    let dlc = match rest[id_digits] {
        d @ b'0'..=b'8' => usize::from(d - b'0'),
        _ => return Err(TransportError::InvalidFrame("dlc")),
    };
    let body = &rest[id_digits + 1..];
    if body.len() < dlc * 2 {
        return Err(TransportError::InvalidFrame("short data"));
    }
    let mut data = [0u8; 8];
    for (slot, pair) in data.iter_mut().zip(body.chunks_exact(2)).take(dlc) {
        *slot = hex(pair, "byte")?;
    }
    Ok(CanFrame {
        id,
        len: dlc as u8,
        data,
        rtr: matches!(tag, b'r' | b'R'),
        timestamp: Some(Timestamp::now()),
    })
}

impl CanBus for SlcanBus {
    fn open(path: &str) -> Result<Self> {
        Self::open_at(path, DEFAULT_BITRATE)
    }

    /// Every serial port; USB ones are the likely adapters.
    fn list() -> Result<Vec<BusInfo>> {
        let ports =
            serialport::available_ports().map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(ports
            .into_iter()
            .map(|p| BusInfo {
                driver: match p.port_type {
                    SerialPortType::UsbPort(_) => "slcan-usb",
                    _ => "serial",
                }
                .to_string(),
                name: p.port_name,
            })
            .collect())
    }

    fn set_filters(&mut self, _filters: &[CanFilter]) -> Result<()> {
        Err(TransportError::Unsupported("slcan acceptance filters"))
    }

    fn recv(&mut self, timeout_ms: Option<u64>) -> Result<CanFrame> {
        if let Some(ms) = timeout_ms {
            if let Err(e) = self.port.set_timeout(Duration::from_millis(ms)) {
                tracing::debug!(path = %self.path, error = %e, "cannot set read timeout");
            }
        }
        let mut chunk = [0u8; 128];
        loop {
            if let Some(line) = self.take_line() {
                return decode(&line);
            }
            match self.port.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Timeout),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(TransportError::Timeout)
                }
                Err(e) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        let line = encode(frame)?;
        command(&mut *self.port, line.as_bytes())
    }
}
