use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    /// Some connection of the robot is not present on the host.
    #[error("robot {robot} is offline: {detail}")]
    Conflict { robot: String, detail: String },
    /// Hardware is present but is not what the definition asks for.
    #[error("robot {robot} does not match its hardware: {detail}")]
    Validation { robot: String, detail: String },
    #[error("unknown robot {0}")]
    UnknownRobot(String),
    #[error("discovery failed: {0}")]
    Discovery(String),
}

pub type Result<T, E = VerifyError> = std::result::Result<T, E>;
