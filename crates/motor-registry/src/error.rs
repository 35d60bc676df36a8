use thiserror::Error;

use crate::types::Brand;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown model {brand} {model}")]
    UnknownModel { brand: Brand, model: String },
    #[error("no {brand} model reports model number {number}")]
    UnknownModelNumber { brand: Brand, number: u32 },
    #[error("no model matches MIT limits p={p_max} v={v_max} t={t_max}")]
    UnknownMitLimits { p_max: f32, v_max: f32, t_max: f32 },
    #[error("duplicate model entry {0}")]
    Duplicate(String),
    #[error("invalid model entry {model}: {reason}")]
    Invalid { model: String, reason: String },
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
