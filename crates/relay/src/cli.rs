//! Command-line surface (spec.md §6): `serve` (default), `config validate`,
//! `config show`.
//!
//! A trimmed `clap` derive matching the teacher's `Cli`/`Command` shape in
//! `cli/mod.rs` — the teacher's `doctor`/`login`/`set-secret`/`systemd`/
//! `import` subcommands are dropped, since there's no provider OAuth or
//! node bootstrapping here to manage.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use vrelay_domain::config::{Config, ConfigSeverity};

#[derive(Parser, Debug)]
#[command(name = "voice-relay", about = "Real-time voice conversation relay")]
pub struct Cli {
    /// Path to a TOML configuration file. Defaults to `config.toml` in the
    /// working directory if it exists, else built-in defaults.
    #[arg(long, env = "VRELAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server. Default when no subcommand is given.
    Serve,
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the resolved configuration and report issues.
    Validate,
    /// Print the fully-resolved configuration as TOML.
    Show,
}

/// Load configuration from `path` (or `config.toml` if unset), falling back
/// to built-in defaults when the file doesn't exist. Mirrors the teacher's
/// `load_config`: a missing file is not an error, a malformed one is.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<(Config, String)> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("config.toml"));
    let path_display = path.display().to_string();

    if path.exists() {
        let raw = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&raw)?;
        Ok((config, path_display))
    } else {
        Ok((Config::default(), path_display))
    }
}

/// `config validate`: print every issue, return whether the configuration
/// is usable (no `Error`-severity issues).
pub fn validate(config: &Config, path: &str) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{path}: no issues found");
        return true;
    }

    let mut ok = true;
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => println!("warning: {issue}"),
            ConfigSeverity::Error => {
                ok = false;
                println!("error: {issue}");
            }
        }
    }
    ok
}

/// `config show`: print the fully-resolved configuration as TOML.
pub fn show(config: &Config) {
    println!("{}", toml::to_string_pretty(config).expect("Config always serializes"));
}
