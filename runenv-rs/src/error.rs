use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("no run description on stdin")]
    MissingInput,

    #[error("unsupported run description format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("`{key}` must be a non-negative integer, got {value}")]
    InvalidCount {
        key: &'static str,
        value: serde_json::Value,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
