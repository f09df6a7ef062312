use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared by the janitor binaries
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(
        short,
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Enable quiet mode (warnings and errors only)"
    )]
    pub quiet: bool,
}

/// Commands that inspect the configuration instead of touching storage
#[derive(Subcommand, Debug, Clone)]
pub enum CommonCommands {
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Log filter implied by the verbosity flags
    pub fn default_log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging based on CLI arguments; `RUST_LOG` wins when set
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_log_level(args)));

        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration");
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        let mut shown = config.clone();
        shown.storage.dsn = config.redacted_dsn();

        if json {
            let json = serde_json::to_string_pretty(&shown)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("Multipart Janitor Configuration:");
            println!("================================");
            println!("Storage DSN: {}", shown.storage.dsn);
            println!("Connect timeout: {:?}", shown.storage.connect_timeout);
            println!("Operation timeout: {:?}", shown.storage.operation_timeout);
            println!("Max attempts: {}", shown.storage.max_attempts);
            println!("Dry run: {}", shown.cleanup.dry_run);
            println!("On missing upload: {:?}", shown.cleanup.on_missing_upload);
            println!("Report sizes: {}", shown.cleanup.report_sizes);
            println!("Watch interval: {:?}", shown.watch.interval);
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        tracing::info!("Validating configuration...");
        config.validate().context("Invalid configuration")?;
        tracing::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle commands that don't need a storage client
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<()> {
        match command {
            CommonCommands::Config { json } => display_config(config, *json),
            CommonCommands::Validate => validate_config(config),
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(())
            }
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!("multipart-janitor {}", env!("CARGO_PKG_VERSION"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_level() {
        let args = CommonArgs::default();
        assert_eq!(utils::default_log_level(&args), "info");

        let args = CommonArgs {
            verbose: true,
            ..Default::default()
        };
        assert_eq!(utils::default_log_level(&args), "debug");

        let args = CommonArgs {
            quiet: true,
            ..Default::default()
        };
        assert_eq!(utils::default_log_level(&args), "warn");
    }

    #[test]
    fn test_version_info() {
        let version = utils::version_info();
        assert!(version.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_validate_rejects_default_configuration() {
        let config = crate::config::Configuration::default();
        assert!(utils::validate_config(&config).is_err());
    }
}
