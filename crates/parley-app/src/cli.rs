//! CLI argument definitions for the `parley` binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use parley_core::config::SearchMode;
use parley_core::types::RequestContext;

/// Parley: recovers voice commands the intent engine did not understand.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Connect to the engine and resolve one command per stdin line
    /// (`[hostname:] text`), printing each reply as JSON.
    Run,
    /// Import device names from the engine as on/off commands.
    AddEntities,
    /// Run a correction search and print the outcome.
    Search {
        text: String,
        /// Override the configured search mode.
        #[arg(long)]
        mode: Option<SearchMode>,
        /// Exact match only.
        #[arg(long)]
        exact: bool,
    },
    /// Delete one command from the index by document id.
    Delete { id: String },
    /// Drop and re-create the index collection.
    Reset,
    /// Write the effective configuration to the config path.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

impl CliArgs {
    /// Priority: --config flag > PARLEY_CONFIG env var > ~/.parley/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("PARLEY_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}

fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".parley").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".parley").join("config.toml");
    }
    PathBuf::from("config.toml")
}

/// Parse a stdin line of the form `[hostname:] text`.
///
/// The prefix is taken as a hostname only when it contains no whitespace,
/// so `set a timer for 5:30` stays a plain command.
pub fn parse_line(line: &str) -> Option<RequestContext> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some((host, text)) = line.split_once(':') {
        let host = host.trim();
        let text = text.trim();
        if !host.is_empty() && !host.contains(char::is_whitespace) && !text.is_empty() {
            return Some(RequestContext::new(text).with_hostname(host));
        }
    }
    Some(RequestContext::new(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_run() {
        let args = CliArgs::parse_from(["parley"]);
        assert_eq!(args.command(), Command::Run);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_config_flag_wins() {
        let args = CliArgs::parse_from(["parley", "--config", "/tmp/p.toml", "reset"]);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/tmp/p.toml"));
        assert_eq!(args.command(), Command::Reset);
    }

    #[test]
    fn test_search_args() {
        let args = CliArgs::parse_from(["parley", "search", "tern on light", "--mode", "token"]);
        assert_eq!(
            args.command(),
            Command::Search {
                text: "tern on light".to_string(),
                mode: Some(SearchMode::Token),
                exact: false,
            }
        );

        let args = CliArgs::parse_from(["parley", "search", "turn on light", "--exact"]);
        assert!(matches!(args.command(), Command::Search { exact: true, .. }));
    }

    #[test]
    fn test_init_config_args() {
        let args = CliArgs::parse_from(["parley", "init-config"]);
        assert_eq!(args.command(), Command::InitConfig { force: false });
        let args = CliArgs::parse_from(["parley", "init-config", "--force"]);
        assert_eq!(args.command(), Command::InitConfig { force: true });
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(CliArgs::try_parse_from(["parley", "search", "x", "--mode", "fuzzy"]).is_err());
    }

    #[test]
    fn test_log_level_resolution() {
        let args = CliArgs::parse_from(["parley", "-l", "debug"]);
        assert_eq!(args.resolve_log_level("info"), "debug");
        let args = CliArgs::parse_from(["parley"]);
        assert_eq!(args.resolve_log_level("warn"), "warn");
    }

    #[test]
    fn test_parse_line_with_host() {
        let ctx = parse_line("willow-kitchen: turn on the lights").unwrap();
        assert_eq!(ctx.text, "turn on the lights");
        assert_eq!(ctx.hostname.as_deref(), Some("willow-kitchen"));
    }

    #[test]
    fn test_parse_line_without_host() {
        let ctx = parse_line("  set a timer for 5:30 ").unwrap();
        assert_eq!(ctx.text, "set a timer for 5:30");
        assert!(ctx.hostname.is_none());

        assert!(parse_line("   ").is_none());
        assert_eq!(parse_line("willow:").unwrap().text, "willow:");
    }
}
