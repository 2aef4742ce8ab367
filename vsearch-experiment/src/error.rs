use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExperimentError>;

#[derive(Error, Debug)]
pub enum ExperimentError {
    /// The stimuli root or one of its category subdirectories is absent.
    #[error("stimulus directory does not exist: {0}")]
    MissingStimulusDir(PathBuf),

    /// A category directory exists but holds no usable images.
    #[error("no images (.png/.jpg/.jpeg) found in {0}")]
    EmptyStimulusDir(PathBuf),

    #[error("cannot read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
