use can_transport::TransportError;
use motor_registry::{MotorId, RegistryError};
use thiserror::Error;

use crate::protocol::FrameError;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus is not connected")]
    NotConnected,
    #[error("failed to open {interface}: {reason}")]
    Connect { interface: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timeout waiting for motor {0}")]
    Timeout(MotorId),
    #[error("bad frame from motor {id}: {source}")]
    Frame { id: MotorId, source: FrameError },
    #[error("motor {id} rejected the instruction (status 0x{status:02X})")]
    Rejected { id: MotorId, status: u8 },
    #[error("motor {0} not found")]
    NotFound(MotorId),
    #[error("motor {id} could not be identified: {source}")]
    Identify { id: MotorId, source: RegistryError },
    #[error("motor id {0} is not valid on this bus")]
    InvalidId(MotorId),
    #[error("unknown bus type or brand: {0}")]
    UnknownBusType(String),
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl BusError {
    pub(crate) fn frame(id: MotorId, source: FrameError) -> Self {
        BusError::Frame { id, source }
    }

    /// Errors that mean the link itself is gone rather than one motor misbehaving.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            BusError::NotConnected
                | BusError::Connect { .. }
                | BusError::Io(_)
                | BusError::Transport(TransportError::BusOff | TransportError::Io(_))
        )
    }
}

pub type Result<T, E = BusError> = std::result::Result<T, E>;
