//! Error types for the order book feed

use thiserror::Error;

use crate::orderbook::InvariantViolation;

/// Order book feed errors
#[derive(Error, Debug)]
pub enum LobError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("Snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(#[from] InvariantViolation),

    #[error("Connection timeout")]
    ConnectionTimeout,
}

impl From<tokio_tungstenite::tungstenite::Error> for LobError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        LobError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for LobError {
    fn from(err: serde_json::Error) -> Self {
        LobError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for LobError {
    fn from(err: reqwest::Error) -> Self {
        LobError::SnapshotUnavailable(err.to_string())
    }
}

impl From<config::ConfigError> for LobError {
    fn from(err: config::ConfigError) -> Self {
        LobError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LobError>;
