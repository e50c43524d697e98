use std::path::PathBuf;

use crate::catalog::FilterId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No absorption table for material {material}")]
    UnknownMaterial { material: String },

    #[error("Photon energy {energy} eV is outside the {material} table range [{min}, {max}] eV")]
    EnergyOutOfRange {
        material: String,
        energy: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid absorption table for {material}: {reason}")]
    InvalidTable { material: String, reason: String },

    #[error("Failed to read absorption table {path}: {source}")]
    TableIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse absorption table {path}: {source}")]
    TableParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid device descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown blade index {0}")]
    UnknownBlade(usize),

    #[error("Unknown filter {0}")]
    UnknownFilter(FilterId),

    #[error("Motion command queue is closed")]
    MotionQueueClosed,

    #[error("Failed to publish status: {0}")]
    Publish(String),
}

pub type Result<T> = std::result::Result<T, Error>;
