//! Errors raised by the Wattpilot protocol engine

use thiserror::Error;

/// Errors in Wattpilot connection and message handling
#[derive(Debug, Error)]
pub enum WattpilotError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout while connecting to charger")]
    ConnectTimeout,

    #[error("Connection closed")]
    ConnectionClosed,

    /// A command was signed before the handshake produced a session secret.
    #[error("No active session secret, cannot sign command")]
    NoActiveSecret,

    #[error("Invalid control intent: {0}")]
    InvalidIntent(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Secret derivation failed: {0}")]
    Derivation(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for WattpilotError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        match e {
            tokio_tungstenite::tungstenite::Error::ConnectionClosed
            | tokio_tungstenite::tungstenite::Error::AlreadyClosed => WattpilotError::ConnectionClosed,
            other => WattpilotError::Transport(other.to_string()),
        }
    }
}
