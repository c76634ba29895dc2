//! Command-line arguments shared by the Rally binaries.

use std::path::PathBuf;

use clap::Args;

use crate::Config;

/// Common command-line overrides.
///
/// Binaries flatten this into their own parser. CLI values override
/// settings loaded from `config.ron`.
#[derive(Args, Debug, Default, Clone)]
pub struct CliArgs {
    /// Relay address (`host:port`) for game clients.
    #[arg(long)]
    pub relay: Option<String>,

    /// Address the relay server binds to.
    #[arg(long)]
    pub bind: Option<String>,

    /// Maximum concurrent relay connections.
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Request reliable delivery.
    #[arg(long)]
    pub reliable: Option<bool>,

    /// Joiner connect timeout in milliseconds (0 = wait forever).
    #[arg(long)]
    pub join_timeout_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config. Call [`Config::validate`]
    /// afterwards; overrides are not checked here.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.relay {
            self.network.relay_address = addr.clone();
        }
        if let Some(ref bind) = args.bind {
            self.relay.bind_address = bind.clone();
        }
        if let Some(max) = args.max_connections {
            self.relay.max_connections = max;
        }
        if let Some(reliable) = args.reliable {
            self.network.reliable = reliable;
        }
        if let Some(timeout) = args.join_timeout_ms {
            self.network.join_timeout_ms = timeout;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        common: CliArgs,
    }

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            relay: Some("192.168.1.1:7878".to_string()),
            reliable: Some(false),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.relay_address, "192.168.1.1:7878");
        assert!(!config.network.reliable);
        // Non-overridden fields retain defaults
        assert_eq!(config.network.join_timeout_ms, 10_000);
        assert_eq!(config.relay.max_connections, 256);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_flags_parse() {
        let cli = TestCli::parse_from([
            "rally",
            "--bind",
            "127.0.0.1:9000",
            "--max-connections",
            "8",
            "--log-level",
            "debug",
        ]);
        let mut config = Config::default();
        config.apply_cli_overrides(&cli.common);
        assert_eq!(config.relay.bind_address, "127.0.0.1:9000");
        assert_eq!(config.relay.max_connections, 8);
        assert_eq!(config.debug.log_level, "debug");
    }

    #[test]
    fn test_overrides_can_be_rejected_by_validate() {
        let cli = TestCli::parse_from(["rally", "--max-connections", "0"]);
        let mut config = Config::default();
        config.apply_cli_overrides(&cli.common);
        assert!(matches!(
            config.validate(),
            Err(crate::ConfigError::Invalid {
                field: "relay.max_connections",
                ..
            })
        ));

        let cli = TestCli::parse_from(["rally", "--bind", "nowhere"]);
        let mut config = Config::default();
        config.apply_cli_overrides(&cli.common);
        assert!(config.validate().is_err());
    }
}
