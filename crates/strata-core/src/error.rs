use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    // ── Descriptor validation ──
    #[error("invalid image reference {reference:?}: {reason}")]
    InvalidImageRef {
        reference: String,
        reason: &'static str,
    },

    #[error("invalid timezone identifier {id:?}: {reason}")]
    InvalidTimezone { id: String, reason: &'static str },

    #[error("invalid context destination {path:?}: {reason}")]
    InvalidDestination { path: String, reason: &'static str },

    #[error("invalid manifest path {path:?}: {reason}")]
    InvalidManifestPath { path: String, reason: &'static str },

    #[error("invalid environment variable name {name:?}")]
    InvalidEnvName { name: String },

    #[error("entry point command must contain at least one element")]
    EmptyEntrypoint,
}
