//! CLI argument definitions for the nichoir binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;

use nichoir_core::config::NichoirConfig;

/// Nichoir - receives camera images and telemetry over MQTT and files them.
#[derive(Parser, Debug)]
#[command(name = "nichoir", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Viewer API port.
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<u16>,

    /// Data directory for the database and images.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Do not start the viewer API.
    #[arg(long = "no-api", global = true)]
    pub no_api: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Reconcile the store, then ingest until interrupted (default).
    Run,
    /// Remove records whose image file is missing, then exit.
    Reconcile,
    /// Publish test telemetry and/or an image to the configured topics.
    Publish(PublishArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
#[command(group(ArgGroup::new("payload").required(true).multiple(true).args(["telemetry", "image"])))]
pub struct PublishArgs {
    /// Telemetry reading to publish on the telemetry topic.
    #[arg(long, allow_hyphen_values = true)]
    pub telemetry: Option<f64>,

    /// Image file whose bytes are published on the image topic.
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Number of rounds to publish.
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,

    /// Seconds between rounds.
    #[arg(long, default_value_t = 5)]
    pub interval_secs: u64,
}

impl CliArgs {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > NICHOIR_CONFIG env var > ~/.nichoir/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("NICHOIR_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the viewer API port.
    ///
    /// Priority: --port flag > NICHOIR_PORT env var > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Ok(val) = std::env::var("NICHOIR_PORT") {
            if let Ok(p) = val.parse::<u16>() {
                return p;
            }
        }
        config_port
    }

    /// Fold the command-line overrides into `config`.
    pub fn apply(&self, config: &mut NichoirConfig) {
        if let Some(ref dir) = self.data_dir {
            config.general.data_dir = dir.to_string_lossy().to_string();
        }
        config.api.port = self.resolve_port(config.api.port);
        if self.no_api {
            config.api.enabled = false;
        }
    }

    /// Tracing filter directive: --log-level, else the configured level.
    pub fn resolve_log_level(&self, config: &NichoirConfig) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config.general.log_level.as_str().to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".nichoir").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".nichoir").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_default_command_is_run() {
        let args = parse(&["nichoir"]);
        assert_eq!(args.command(), Command::Run);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = parse(&["nichoir", "reconcile", "--data-dir", "/srv/nichoir", "-l", "debug"]);
        assert_eq!(args.command(), Command::Reconcile);
        assert_eq!(args.data_dir, Some(PathBuf::from("/srv/nichoir")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_publish_args() {
        let args = parse(&[
            "nichoir",
            "publish",
            "--telemetry",
            "3.7",
            "--image",
            "bird.jpg",
            "--repeat",
            "3",
            "--interval-secs",
            "2",
        ]);
        match args.command() {
            Command::Publish(p) => {
                assert_eq!(p.telemetry, Some(3.7));
                assert_eq!(p.image, Some(PathBuf::from("bird.jpg")));
                assert_eq!(p.repeat, 3);
                assert_eq!(p.interval_secs, 2);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_publish_negative_telemetry() {
        let args = parse(&["nichoir", "publish", "--telemetry", "-1.5"]);
        match args.command() {
            Command::Publish(p) => assert_eq!(p.telemetry, Some(-1.5)),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_publish_requires_a_payload() {
        assert!(CliArgs::try_parse_from(["nichoir", "publish"]).is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let args = parse(&["nichoir", "--data-dir", "/srv/nichoir", "--port", "8080", "--no-api"]);
        let mut config = NichoirConfig::default();
        args.apply(&mut config);
        assert_eq!(config.general.data_dir, "/srv/nichoir");
        assert_eq!(config.api.port, 8080);
        assert!(!config.api.enabled);
    }

    #[test]
    fn test_resolve_log_level_falls_back_to_config() {
        let args = parse(&["nichoir"]);
        assert_eq!(args.resolve_log_level(&NichoirConfig::default()), "info");

        let args = parse(&["nichoir", "--log-level", "nichoir_ingest=trace"]);
        assert_eq!(
            args.resolve_log_level(&NichoirConfig::default()),
            "nichoir_ingest=trace"
        );
    }
}
