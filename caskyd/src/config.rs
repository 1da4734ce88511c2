//! CLI arguments and the optional TOML config file that can override them:
//! an all-`Option` struct with a `Default` impl, merged with explicit flags.

use std::path::PathBuf;

use clap::Parser;
use serde_derive::{Deserialize, Serialize};

/// Default loopback port for the daemon.
pub const DEFAULT_PORT: u16 = 5050;

#[derive(Debug, Parser)]
#[command(name = "caskyd", version, about = "Line-oriented TCP daemon for the casky key-value store")]
pub struct Args {
    /// Path to the database log file.
    #[clap(short = 'p', long, default_value = "casky.db")]
    pub path: PathBuf,

    /// TCP port to listen on. Always binds 127.0.0.1, never 0.0.0.0.
    #[clap(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// fsync every mutation before acknowledging it.
    #[clap(long)]
    pub sync_on_write: bool,

    /// DEBUG, INFO, WARN, or ERROR.
    #[clap(long, env = "CASKYD_LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    /// Directory for the daily-rotating log file.
    #[clap(long, default_value = "log")]
    pub log_dir: String,

    /// Optional TOML config file. Any field it sets overrides the flags
    /// above.
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,
}

/// The subset of [`Args`] a TOML file may override. All fields are
/// optional so an absent or partial file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigLoad {
    pub path: Option<PathBuf>,
    pub port: Option<u16>,
    pub sync_on_write: Option<bool>,
    pub log_level: Option<String>,
    pub log_dir: Option<String>,
}

impl ConfigLoad {
    fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        Ok(confy::load_path(path)?)
    }
}

/// The fully resolved settings the daemon runs with.
#[derive(Debug, Clone)]
pub struct Settings {
    pub path: PathBuf,
    pub port: u16,
    pub sync_on_write: bool,
    pub log_level: String,
    pub log_dir: String,
}

impl Settings {
    pub fn resolve(args: Args) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => ConfigLoad::from_file(path)?,
            None => ConfigLoad::default(),
        };

        Ok(Self {
            path: file.path.unwrap_or(args.path),
            port: file.port.unwrap_or(args.port),
            sync_on_write: file.sync_on_write.unwrap_or(args.sync_on_write),
            log_level: file.log_level.unwrap_or(args.log_level),
            log_dir: file.log_dir.unwrap_or(args.log_dir),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_parse_with_only_defaults() {
        let args = Args::parse_from(["caskyd"]);
        assert_eq!(args.port, DEFAULT_PORT);
        assert!(!args.sync_on_write);
        assert_eq!(args.log_level, "INFO");
    }

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn settings_resolve_without_a_config_file() {
        let args = Args::parse_from(["caskyd", "--port", "6000", "--sync-on-write"]);
        let settings = Settings::resolve(args).unwrap();
        assert_eq!(settings.port, 6000);
        assert!(settings.sync_on_write);
    }
}
