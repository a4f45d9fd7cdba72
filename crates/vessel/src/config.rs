//! Configuration management for Vessel.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/vessel/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_sessions must be between 1 and 4096, got {0}")]
    InvalidMaxSessions(usize),

    #[error("default terminal size must be non-zero, got {cols}x{rows}")]
    InvalidTerminalSize { cols: u16, rows: u16 },

    #[error("max_split_depth must be between 1 and 128, got {0}")]
    InvalidSplitDepth(usize),

    #[error("default_shell path does not exist: {0}")]
    InvalidShellPath(String),

    #[error("default_cwd is not a directory: {0}")]
    InvalidWorkingDirectory(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for Vessel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Process-level settings.
    pub daemon: DaemonConfig,

    /// Terminal session settings.
    pub session: SessionConfig,

    /// Split-pane layout settings.
    pub layout: LayoutConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Bridge socket path. Defaults to the per-user runtime directory.
    pub socket_path: Option<PathBuf>,
}

/// Terminal session settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell to spawn. Unset means the platform default.
    pub default_shell: Option<String>,

    /// Working directory for sessions that do not request one.
    /// Unset means the home directory.
    pub default_cwd: Option<PathBuf>,

    /// Columns used before the UI reports a real size.
    pub default_cols: u16,

    /// Rows used before the UI reports a real size.
    pub default_rows: u16,

    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,

    /// Value of `TERM` in spawned shells.
    pub term: String,
}

/// Split-pane layout settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayoutConfig {
    /// Deepest nesting of splits allowed in one workspace.
    pub max_split_depth: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            socket_path: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_shell: None,
            default_cwd: None,
            default_cols: 80,
            default_rows: 24,
            max_sessions: 256,
            term: "xterm-256color".to_string(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self { max_split_depth: 32 }
    }
}

impl SessionConfig {
    /// The shell to spawn: the configured one, else the platform default.
    pub fn shell(&self) -> String {
        match &self.default_shell {
            Some(shell) if !shell.is_empty() => shell.clone(),
            _ => platform_shell(),
        }
    }

    /// Working directory for a session.
    ///
    /// Resolution order: the requested directory, the configured default,
    /// the home directory, then the filesystem root.
    pub fn working_dir(&self, requested: Option<&str>) -> PathBuf {
        if let Some(dir) = requested.filter(|d| !d.is_empty()) {
            return PathBuf::from(dir);
        }
        if let Some(dir) = &self.default_cwd {
            return dir.clone();
        }
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vessel")
        .join("config.toml")
}

/// Returns the default shell for the current platform.
///
/// Windows always gets PowerShell. Elsewhere the user's `$SHELL` is used,
/// falling back to `/bin/sh`.
pub fn platform_shell() -> String {
    if cfg!(windows) {
        "powershell.exe".to_string()
    } else {
        std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - VESSEL_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - VESSEL_SHELL: Override the shell spawned for new sessions
    ///
    /// Returns the variables that took effect, for the caller to log once
    /// tracing is set up.
    pub fn apply_env_overrides(&mut self) -> Vec<&'static str> {
        let mut applied = Vec::new();

        if let Ok(level) = std::env::var("VESSEL_LOG_LEVEL") {
            if !level.is_empty() {
                self.daemon.log_level = level;
                applied.push("VESSEL_LOG_LEVEL");
            }
        }

        if let Ok(shell) = std::env::var("VESSEL_SHELL") {
            if !shell.is_empty() {
                self.session.default_shell = Some(shell);
                applied.push("VESSEL_SHELL");
            }
        }

        applied
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_sessions < 1 || self.session.max_sessions > 4096 {
            return Err(ConfigError::InvalidMaxSessions(self.session.max_sessions));
        }

        if self.session.default_cols == 0 || self.session.default_rows == 0 {
            return Err(ConfigError::InvalidTerminalSize {
                cols: self.session.default_cols,
                rows: self.session.default_rows,
            });
        }

        if self.layout.max_split_depth < 1 || self.layout.max_split_depth > 128 {
            return Err(ConfigError::InvalidSplitDepth(self.layout.max_split_depth));
        }

        if let Some(shell) = &self.session.default_shell {
            let shell_path = Path::new(shell);
            let found = if shell_path.is_absolute() {
                shell_path.exists()
            } else {
                which::which(shell).is_ok()
            };
            if !found {
                return Err(ConfigError::InvalidShellPath(shell.clone()));
            }
        }

        if let Some(cwd) = &self.session.default_cwd {
            if !cwd.is_dir() {
                return Err(ConfigError::InvalidWorkingDirectory(
                    cwd.display().to_string(),
                ));
            }
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
