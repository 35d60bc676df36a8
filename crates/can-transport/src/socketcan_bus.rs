//! Linux SocketCAN backend.
//!
//! The kernel owns the bit rate (`ip link set can0 type can bitrate ...`); opening only
//! checks that the requested rate is plausible and logs it. Error frames are consumed here
//! and folded into [`BusState`] instead of being handed to callers.

use crate::{BusInfo, BusState, CanBus, CanFrame, CanId, Result, Timestamp, TransportError};
use socketcan::{
    CanError as SocketCanError, CanErrorFrame, CanFrame as RawFrame, CanSocket, EmbeddedFrame,
    ExtendedId, Frame, Socket, StandardId,
};
use std::convert::TryFrom;
use std::time::Duration;
use tracing::{trace, warn};

pub struct SocketCanBus {
    interface: String,
    socket: CanSocket,
    state: BusState,
}

impl SocketCanBus {
    pub fn open_with(interface: &str, bitrate: Option<u32>) -> Result<Self> {
        let socket = CanSocket::open(interface).map_err(|e| {
            TransportError::InterfaceNotFound(format!("{interface}: {e}"))
        })?;
        if let Some(bps) = bitrate {
            // Configuration happens outside the process; the requested rate is informational.
            trace!(interface, bps, "socketcan bit rate is managed by the kernel");
        }
        Ok(Self {
            interface: interface.to_string(),
            socket,
            state: BusState::ErrorActive,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn note_error_frame(&mut self, frame: RawFrame) {
        let Ok(error_frame) = CanErrorFrame::try_from(frame) else {
            warn!("received CAN error frame but failed to parse, ignoring");
            return;
        };
        match SocketCanError::from(error_frame) {
            SocketCanError::BusOff => {
                warn!(interface = %self.interface, "CAN bus off");
                self.state = BusState::BusOff;
            }
            SocketCanError::ControllerProblem(problem) => {
                let text = problem.to_string().to_lowercase();
                if text.contains("passive") {
                    self.state = BusState::ErrorPassive;
                } else if text.contains("warning") && self.state == BusState::ErrorActive {
                    self.state = BusState::ErrorWarning;
                } else if text.contains("active") {
                    self.state = BusState::ErrorActive;
                }
                trace!(interface = %self.interface, %problem, "CAN controller problem");
            }
            other => trace!(interface = %self.interface, error = %other, "CAN error frame"),
        }
    }
}

impl CanBus for SocketCanBus {
    fn open(name: &str) -> Result<Self> {
        Self::open_with(name, None)
    }

    fn list() -> Result<Vec<BusInfo>> {
        let entries = std::fs::read_dir("/sys/class/net")
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            // ARPHRD_CAN = 280
            let kind = std::fs::read_to_string(entry.path().join("type")).unwrap_or_default();
            if kind.trim() == "280" {
                out.push(BusInfo {
                    name,
                    driver: "socketcan".to_string(),
                });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn recv(&mut self, timeout_ms: Option<u64>) -> Result<CanFrame> {
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(100).max(1));
        self.socket
            .set_read_timeout(timeout)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        loop {
            let raw = match self.socket.read_frame() {
                Ok(f) => f,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    return Err(TransportError::Timeout)
                }
                Err(e) => return Err(TransportError::Io(e.to_string())),
            };
            if raw.is_error_frame() {
                self.note_error_frame(raw);
                continue;
            }
            // Traffic is flowing again.
            if self.state.is_degraded() {
                self.state = BusState::ErrorActive;
            }
            let id = CanId::from_raw(raw.raw_id()).ok_or(TransportError::InvalidFrame("id"))?;
            let mut frame = CanFrame::new(id, raw.data()).ok_or(TransportError::InvalidFrame("len"))?;
            frame.rtr = raw.is_remote_frame();
            frame.timestamp = Some(Timestamp::now());
            return Ok(frame);
        }
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        let raw = if frame.id.is_extended() {
            ExtendedId::new(frame.id.raw()).and_then(|id| RawFrame::new(id, frame.payload()))
        } else {
            StandardId::new(frame.id.raw() as u16).and_then(|id| RawFrame::new(id, frame.payload()))
        }
        .ok_or(TransportError::InvalidFrame("socketcan frame"))?;
        self.socket.write_frame(&raw).map_err(|e| {
            if self.state == BusState::BusOff {
                TransportError::BusOff
            } else {
                TransportError::Io(e.to_string())
            }
        })
    }

    fn bus_state(&self) -> BusState {
        self.state
    }
}
