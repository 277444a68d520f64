//! Error types for electron-connect
//!
//! Only operations the controller invokes directly (start, restart, stop)
//! surface errors to the caller. Failures inside message handling are logged
//! and dropped where they happen.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for electron-connect
#[derive(Error, Debug)]
pub enum Error {
    // === Call Errors ===
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Cannot {action} while supervisor is {state}")]
    InvalidState { action: String, state: String },

    #[error("Supervisor is no longer running")]
    SupervisorGone,

    // === Message Errors ===
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Transport for window '{0}' is closed")]
    TransportClosed(String),

    // === Endpoint Errors ===
    #[error("Failed to listen on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Failed to connect to supervisor at {url}: {reason}")]
    ConnectFailed { url: String, reason: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    // === Child Process Errors ===
    #[error("Failed to start '{program}': {reason}")]
    ChildProcess { program: String, reason: String },

    #[error("Failed to kill process tree {pid}: {reason}")]
    KillFailure { pid: u32, reason: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Create a child process error for a program that failed to spawn
    pub fn child_process(program: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Self::ChildProcess {
            program: program.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a malformed message error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage(reason.into())
    }
}
