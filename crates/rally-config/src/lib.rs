//! Configuration system for Rally.
//!
//! Settings persist to disk as a RON file and can be overridden from the
//! command line via clap. Missing fields fall back to defaults so older
//! config files keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, NetworkConfig, RelayConfig};
pub use error::ConfigError;
