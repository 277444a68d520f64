//! Configuration file handling
//!
//! Both sides read the same `config.toml`: the `[server]` table configures the
//! supervisor, the `[client]` table configures window agents. Every field has a
//! default so an absent file or an empty table is valid.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::Result;

/// Port the supervisor listens on when none is configured
pub const DEFAULT_PORT: u16 = 30080;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Supervisor settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Client agent settings
    #[serde(default)]
    pub client: ClientConfig,
}

/// Logging verbosity, stored as the integer levels `0..=2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Default)]
#[serde(try_from = "u8")]
pub enum LogLevel {
    /// Warnings and errors only
    Warn = 0,
    /// Lifecycle events (default)
    #[default]
    Info = 1,
    /// Every message on the wire
    Verbose = 2,
}

impl LogLevel {
    /// Default `EnvFilter` directive for this level
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Warn => "electron_connect=warn,warn",
            Self::Info => "electron_connect=info,warn",
            Self::Verbose => "electron_connect=debug,info",
        }
    }

    /// Apply the legacy boolean `verbose` option on top of this level
    pub fn with_legacy_verbose(self, verbose: Option<bool>) -> Self {
        match verbose {
            Some(true) => Self::Verbose,
            Some(false) => Self::Info,
            None => self,
        }
    }
}

impl TryFrom<u8> for LogLevel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Warn),
            1 => Ok(Self::Info),
            2 => Ok(Self::Verbose),
            other => Err(format!("log level must be 0, 1 or 2, got {}", other)),
        }
    }
}

/// How the child process's standard streams are wired
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StdioMode {
    /// Share the supervisor's terminal
    #[default]
    Inherit,
    /// Discard all output, no stdin
    Ignore,
}

/// Options forwarded to the OS process launcher
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SpawnOptions {
    /// Standard stream wiring
    #[serde(default)]
    pub stdio: StdioMode,

    /// Working directory for the child (defaults to the supervisor's)
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Supervisor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on (loopback only)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Explicit path to the GUI host executable
    #[serde(default)]
    pub electron: Option<PathBuf>,

    /// Application path passed as the child's last argument
    #[serde(default = "default_app_path")]
    pub path: PathBuf,

    /// Raw spawn options
    #[serde(default)]
    pub spawn_opt: SpawnOptions,

    /// Stop the child and the endpoint once the last window closes
    #[serde(default)]
    pub stop_on_close: bool,

    /// Logging verbosity
    #[serde(default)]
    pub log_level: LogLevel,

    /// Legacy verbosity switch; overrides `log_level` when set
    #[serde(default)]
    pub verbose: Option<bool>,

    /// Resolve the executable from `PATH` instead of a bundled dependency
    #[serde(default)]
    pub use_global_electron: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            electron: None,
            path: default_app_path(),
            spawn_opt: SpawnOptions::default(),
            stop_on_close: false,
            log_level: LogLevel::default(),
            verbose: None,
            use_global_electron: false,
        }
    }
}

impl ServerConfig {
    /// Log level after applying the legacy `verbose` flag
    pub fn effective_log_level(&self) -> LogLevel {
        self.log_level.with_legacy_verbose(self.verbose)
    }
}

/// Client agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Port of the supervisor to dial
    #[serde(default = "default_port")]
    pub port: u16,

    /// Report and restore window bounds
    #[serde(default = "default_send_bounds")]
    pub send_bounds: bool,

    /// Logging verbosity
    #[serde(default)]
    pub log_level: LogLevel,

    /// Legacy verbosity switch; overrides `log_level` when set
    #[serde(default)]
    pub verbose: Option<bool>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            send_bounds: default_send_bounds(),
            log_level: LogLevel::default(),
            verbose: None,
        }
    }
}

impl ClientConfig {
    /// Log level after applying the legacy `verbose` flag
    pub fn effective_log_level(&self) -> LogLevel {
        self.log_level.with_legacy_verbose(self.verbose)
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_app_path() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_send_bounds() -> bool {
    true
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert!(!config.server.stop_on_close);
        assert!(config.server.electron.is_none());
        assert_eq!(config.server.spawn_opt.stdio, StdioMode::Inherit);
        assert_eq!(config.client.port, DEFAULT_PORT);
        assert!(config.client.send_bounds);
        assert_eq!(config.client.log_level, LogLevel::Info);
    }

    #[test]
    fn test_parse_server_table() {
        let config = Config::parse(
            r#"
[server]
port = 4000
electron = "/opt/electron/electron"
path = "app"
stop_on_close = true
log_level = 2

[server.spawn_opt]
stdio = "ignore"
env = { ELECTRON_ENABLE_LOGGING = "1" }
"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 4000);
        assert_eq!(
            config.server.electron.as_deref(),
            Some(Path::new("/opt/electron/electron"))
        );
        assert_eq!(config.server.path, PathBuf::from("app"));
        assert!(config.server.stop_on_close);
        assert_eq!(config.server.log_level, LogLevel::Verbose);
        assert_eq!(config.server.spawn_opt.stdio, StdioMode::Ignore);
        assert_eq!(
            config.server.spawn_opt.env.get("ELECTRON_ENABLE_LOGGING").map(String::as_str),
            Some("1")
        );
    }

    #[test]
    fn test_legacy_verbose_overrides_level() {
        let config = Config::parse("[client]\nlog_level = 0\nverbose = true\n").unwrap();
        assert_eq!(config.client.effective_log_level(), LogLevel::Verbose);

        let config = Config::parse("[server]\nlog_level = 2\nverbose = false\n").unwrap();
        assert_eq!(config.server.effective_log_level(), LogLevel::Info);

        let config = Config::parse("[server]\nlog_level = 0\n").unwrap();
        assert_eq!(config.server.effective_log_level(), LogLevel::Warn);
    }

    #[test]
    fn test_out_of_range_log_level_is_rejected() {
        let err = Config::parse("[server]\nlog_level = 7\n").unwrap_err();
        assert!(matches!(err, super::super::Error::ConfigParse(_)));
    }
}
