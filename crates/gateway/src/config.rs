//! Configuration management for the Shellgate gateway.
//!
//! TOML-based configuration file loading and saving. The default path is
//! `~/.config/shellgate/config.toml`. Secrets never live in the file; they
//! are read from the environment at startup (see [`Secrets`]).

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind_addr is not a valid socket address: {0}")]
    InvalidBindAddr(String),

    #[error("frontend_url must start with http:// or https://, got {0}")]
    InvalidFrontendUrl(String),

    #[error("shell path does not exist: {0}")]
    InvalidShellPath(String),

    #[error("allowed_commands entries must be single bare tokens, got {0:?}")]
    InvalidAllowedCommand(String),

    #[error("default_timeout_secs must be greater than 0 and at most 300, got {0}")]
    InvalidDefaultTimeout(f64),

    #[error("init_quiet_secs must be between 0 and 60 seconds, got {0}")]
    InvalidQuietPeriod(f64),

    #[error("token_ttl_secs must be between 60 and 604800 seconds, got {0}")]
    InvalidTokenTtl(u64),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("environment variable {0} is required but not set")]
    MissingSecret(&'static str),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP/WS listener and frontend settings.
    pub gateway: GatewayConfig,

    /// PTY session settings and command policy.
    pub session: SessionConfig,

    /// Session token settings.
    pub auth: AuthConfig,
}

/// Listener and frontend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the HTTP/WS listener binds to.
    pub bind_addr: String,

    /// Origin allowed by CORS and target of the post-login redirect.
    pub frontend_url: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// PTY session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell program spawned for each session.
    pub shell: String,

    /// Working directory for spawned shells; gateway's own when unset.
    pub cwd: Option<PathBuf>,

    /// Permitted leading command tokens.
    pub allowed_commands: Vec<String>,

    /// Per-command time budget when the client omits `timeout`.
    pub default_timeout_secs: f64,

    /// Quiet period before the first output drain of a new session.
    pub init_quiet_secs: f64,
}

/// Session token configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Lifetime of issued session tokens, in seconds.
    pub token_ttl_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            cwd: None,
            allowed_commands: vec![
                "ls".to_string(),
                "echo".to_string(),
                "dir".to_string(),
            ],
            default_timeout_secs: 5.0,
            init_quiet_secs: 1.0,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 4 * 60 * 60,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shellgate")
        .join("config.toml")
}

/// Returns the default shell for the current platform.
fn default_shell() -> String {
    if cfg!(windows) {
        "cmd.exe".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - SHELLGATE_BIND_ADDR: Override the listener address
    /// - SHELLGATE_FRONTEND_URL: Override the allowed frontend origin
    /// - SHELLGATE_LOG_LEVEL: Override log level (trace..error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("SHELLGATE_BIND_ADDR") {
            if !addr.is_empty() {
                tracing::info!("Overriding bind_addr from environment: {}", addr);
                self.gateway.bind_addr = addr;
            }
        }

        if let Ok(url) = std::env::var("SHELLGATE_FRONTEND_URL") {
            if !url.is_empty() {
                tracing::info!("Overriding frontend_url from environment: {}", url);
                self.gateway.frontend_url = url;
            }
        }

        if let Ok(level) = std::env::var("SHELLGATE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.gateway.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddr(self.gateway.bind_addr.clone()));
        }

        let url = &self.gateway.frontend_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::InvalidFrontendUrl(url.clone()));
        }

        let level = self.gateway.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.gateway.log_level.clone()));
        }

        let shell_path = Path::new(&self.session.shell);
        if shell_path.is_absolute() {
            if !shell_path.exists() {
                return Err(ConfigError::InvalidShellPath(self.session.shell.clone()));
            }
        } else if which::which(&self.session.shell).is_err() {
            return Err(ConfigError::InvalidShellPath(self.session.shell.clone()));
        }

        for entry in &self.session.allowed_commands {
            if entry.is_empty() || entry.chars().any(char::is_whitespace) {
                return Err(ConfigError::InvalidAllowedCommand(entry.clone()));
            }
        }

        let timeout = self.session.default_timeout_secs;
        if !timeout.is_finite() || timeout <= 0.0 || timeout > 300.0 {
            return Err(ConfigError::InvalidDefaultTimeout(timeout));
        }

        let quiet = self.session.init_quiet_secs;
        if !quiet.is_finite() || quiet < 0.0 || quiet > 60.0 {
            return Err(ConfigError::InvalidQuietPeriod(quiet));
        }

        let ttl = self.auth.token_ttl_secs;
        if !(60..=604_800).contains(&ttl) {
            return Err(ConfigError::InvalidTokenTtl(ttl));
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

    /// Save configuration to a file, creating parent directories as needed.
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

/// Secrets consumed from the environment, never from the config file.
#[derive(Clone)]
pub struct Secrets {
    /// HS256 signing secret for session tokens. Required.
    pub jwt_secret: String,

    /// GitHub OAuth app client ID; login routes reply with an error when
    /// unset.
    pub github_client_id: Option<String>,

    /// GitHub OAuth app client secret.
    pub github_client_secret: Option<String>,
}

impl Secrets {
    /// Reads secrets from the environment.
    ///
    /// `SHELLGATE_JWT_SECRET` is required; the OAuth pair is optional so a
    /// deployment fronted by its own token issuer can omit it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = std::env::var("SHELLGATE_JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSecret("SHELLGATE_JWT_SECRET"))?;

        Ok(Self {
            jwt_secret,
            github_client_id: std::env::var("SHELLGATE_GITHUB_CLIENT_ID")
                .ok()
                .filter(|s| !s.is_empty()),
            github_client_secret: std::env::var("SHELLGATE_GITHUB_CLIENT_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
        })
    }
}
