use motor_bus::BusError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("calibration required for device {0}")]
    CalibrationRequired(String),
    #[error("no driver attached to session {0}")]
    NoDriver(String),
    #[error("session {0} is closed")]
    Closed(String),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("blocking task failed: {0}")]
    Task(String),
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
