use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid sender label: {0:?}")]
    InvalidSender(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
