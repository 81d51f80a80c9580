use thiserror::Error;

use crate::utils::transport::TransportError;

#[derive(Debug, Error)]
pub enum InsightsError {
    #[error("Token undefined for connection: {0}")]
    TokenUndefined(String),

    #[error("Invalid username in JWT token for connection: {0}")]
    InvalidUsername(String),

    #[error("No connection or endpoints defined for {0}")]
    NotConnected(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{0}")]
    UdaUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Scratchpad error: {0}")]
    Scratchpad(String),

    #[error("User cancelled the {0}.")]
    Cancelled(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl InsightsError {
    /// Short category used in log lines.
    pub fn category(&self) -> &'static str {
        match self {
            InsightsError::TokenUndefined(_) | InsightsError::InvalidUsername(_) => "auth",
            InsightsError::NotConnected(_) => "connection",
            InsightsError::Transport(_) => "transport",
            InsightsError::UdaUnavailable(_) => "uda",
            InsightsError::InvalidRequest(_) => "request",
            InsightsError::Scratchpad(_) => "scratchpad",
            InsightsError::Cancelled(_) => "cancelled",
            InsightsError::Ipc(_) => "ipc",
            InsightsError::Json(_) | InsightsError::Url(_) => "parse",
        }
    }
}

pub type Result<T> = std::result::Result<T, InsightsError>;
