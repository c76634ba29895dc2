//! Errors raised while loading, saving or checking `config.ron`.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but is not valid RON for [`Config`](crate::Config).
    #[error("malformed config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },

    #[error("cannot encode config: {0}")]
    Encode(#[from] ron::Error),

    /// A setting parsed but cannot be used.
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// No platform config directory could be determined.
    #[error("no config directory available on this platform")]
    NoConfigDir,
}
