use clap::{Args, Subcommand, ValueEnum};
use std::fmt::Display;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use crate::config::{Config, ConfigValue};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Initialize configuration file
    Init,
}

const DEFAULT_CONFIG: &str = r#"# docsync configuration

# Directory holding synced documents (default: platform data dir)
# Relative paths are resolved against this file's directory.
# data_dir: ~/.local/share/docsync

# User whose documents are synced
# user_id: your-name

sync:
  # Set to false to keep edits local
  enabled: true
  # Quiet period before an edit is saved
  debounce_ms: 1000
  # Minimum share of remote changes that must merge cleanly
  merge_threshold: 0.5
  # How often to look for changes made by other processes
  poll_interval_ms: 500
"#;

impl ConfigCommand {
    pub fn run(
        &self,
        config: &Config,
        cli_config_path: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => print_text(config),
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                let config_path = cli_config_path.unwrap_or_else(Config::default_config_path);

                // Check if config already exists
                if config_path.exists() {
                    println!("Config file already exists: {}", config_path.display());
                    println!("Use 'docsync config show' to view current configuration.");
                    return Ok(());
                }

                // Create parent directory
                if let Some(parent) = config_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                let mut file = fs::File::create(&config_path)?;
                file.write_all(DEFAULT_CONFIG.as_bytes())?;

                println!("Created config file: {}", config_path.display());
                println!("\nEdit this file to customize your settings.");
                Ok(())
            }
        }
    }
}

fn print_text(config: &Config) {
    println!("Configuration");
    println!("=============\n");

    if let Some(path) = &config.config_file {
        println!("Config file: {}", path.display());
    } else {
        println!(
            "Config file: {} (not found)",
            Config::default_config_path().display()
        );
    }
    println!();

    print_value("data_dir", &config.data_dir.value.display(), &config.data_dir);
    let user = config.user_id.value.as_deref().unwrap_or("(none)");
    print_value("user_id", &user, &config.user_id);
    print_value("sync.enabled", &config.sync.enabled.value, &config.sync.enabled);
    print_value(
        "sync.debounce_ms",
        &config.sync.debounce_ms.value,
        &config.sync.debounce_ms,
    );
    print_value(
        "sync.merge_threshold",
        &config.sync.merge_threshold.value,
        &config.sync.merge_threshold,
    );
    print_value(
        "sync.poll_interval_ms",
        &config.sync.poll_interval_ms.value,
        &config.sync.poll_interval_ms,
    );
}

fn print_value<T>(name: &str, shown: &dyn Display, value: &ConfigValue<T>) {
    println!("{}: {}", name, shown);
    println!("  source: {}", value.source);
    println!();
}
