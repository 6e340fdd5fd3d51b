//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/agentdeck/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/agentdeck/` (~/.config/agentdeck/)
//! - State/Logs: `$XDG_STATE_HOME/agentdeck/` (~/.local/state/agentdeck/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
pub(crate) fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Claude Code data root and executable
    #[serde(default)]
    pub claude: ClaudeConfig,

    /// Transcript watching configuration
    #[serde(default)]
    pub watch: WatchConfig,

    /// Interactive control configuration
    #[serde(default)]
    pub control: ControlConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where Claude Code keeps its data and how to invoke it
#[derive(Debug, Deserialize, Clone)]
pub struct ClaudeConfig {
    /// Override for the Claude data root (default: ~/.claude)
    pub root: Option<PathBuf>,

    /// Executable to spawn for takeover/fork (resolved via PATH)
    #[serde(default = "default_executable")]
    pub executable: String,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            root: None,
            executable: default_executable(),
        }
    }
}

impl ClaudeConfig {
    /// Returns the Claude data root directory
    pub fn root_dir(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| home_dir().join(".claude"))
    }

    /// Returns the directory containing per-workspace transcript directories
    pub fn projects_dir(&self) -> PathBuf {
        self.root_dir().join("projects")
    }
}

fn default_executable() -> String {
    "claude".to_string()
}

/// Transcript watching configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    /// Debounce window for bursts of writes to one file, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    100
}

/// Interactive control configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    /// Delay between SIGINT and the follow-up write in interrupt mode, ms
    #[serde(default = "default_interrupt_delay_ms")]
    pub interrupt_delay_ms: u64,

    /// Grace period before SIGTERM after a graceful-exit directive, ms
    #[serde(default = "default_release_grace_ms")]
    pub release_grace_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            interrupt_delay_ms: default_interrupt_delay_ms(),
            release_grace_ms: default_release_grace_ms(),
        }
    }
}

fn default_interrupt_delay_ms() -> u64 {
    100
}

fn default_release_grace_ms() -> u64 {
    1000
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/agentdeck/config.toml` (~/.config/agentdeck/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("agentdeck").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/agentdeck/` (~/.local/state/agentdeck/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("agentdeck")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/agentdeck/agentdeck.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("agentdeck.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.claude.root.is_none());
        assert_eq!(config.claude.executable, "claude");
        assert_eq!(config.watch.debounce_ms, 100);
        assert_eq!(config.control.interrupt_delay_ms, 100);
        assert_eq!(config.control.release_grace_ms, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[claude]
root = "/tmp/claude-test"
executable = "claude-nightly"

[watch]
debounce_ms = 250

[control]
release_grace_ms = 2000

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.claude.root.as_deref(), Some("/tmp/claude-test".as_ref()));
        assert_eq!(config.claude.executable, "claude-nightly");
        assert_eq!(config.watch.debounce_ms, 250);
        assert_eq!(config.control.interrupt_delay_ms, 100);
        assert_eq!(config.control.release_grace_ms, 2000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_projects_dir_uses_root_override() {
        let config = ClaudeConfig {
            root: Some(PathBuf::from("/data/claude")),
            executable: default_executable(),
        };
        assert_eq!(config.projects_dir(), PathBuf::from("/data/claude/projects"));
    }
}
