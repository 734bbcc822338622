//! CLI argument definitions for the Parley application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use parley_core::config::ParleyConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "PARLEY_CONFIG";

/// Parley — a conversational question-answering API over an indexed document collection.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve the HTTP API (default).
    Serve,
    /// Embed documents from a JSON lines file into the vector store.
    Index {
        /// File with one `{"content": ..., "metadata": {...}}` object per line.
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Collection to write to instead of the configured one.
        #[arg(long = "collection")]
        collection: Option<String>,
    },
}

impl CliArgs {
    /// The subcommand to run; `serve` when none is given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > PARLEY_CONFIG env var > `parley.toml`.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            if !p.trim().is_empty() {
                return PathBuf::from(p);
            }
        }
        PathBuf::from("parley.toml")
    }

    /// Apply the flags that override configuration values.
    pub fn apply_overrides(&self, config: &mut ParleyConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_serve() {
        let args = CliArgs::try_parse_from(["parley"]).unwrap();
        assert_eq!(args.command(), Command::Serve);
        assert!(args.port.is_none());
    }

    #[test]
    fn test_index_subcommand() {
        let args = CliArgs::try_parse_from([
            "parley",
            "index",
            "--input",
            "docs.jsonl",
            "--collection",
            "faq",
        ])
        .unwrap();
        assert_eq!(
            args.command(),
            Command::Index {
                input: PathBuf::from("docs.jsonl"),
                collection: Some("faq".to_string()),
            }
        );
    }

    #[test]
    fn test_index_requires_input() {
        assert!(CliArgs::try_parse_from(["parley", "index"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args =
            CliArgs::try_parse_from(["parley", "serve", "--port", "9000", "-l", "debug"]).unwrap();
        assert_eq!(args.port, Some(9000));

        let mut config = ParleyConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let args = CliArgs::try_parse_from(["parley", "-c", "/etc/parley.toml"]).unwrap();
        assert_eq!(args.resolve_config_path(), PathBuf::from("/etc/parley.toml"));
    }
}
