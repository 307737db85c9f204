use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestakeError {
    #[error("Malformed countdown text: {0}")]
    MalformedInput(String),

    #[error("Operation '{operation}' did not settle within {timeout:?}")]
    DeadlineExceeded {
        operation: String,
        timeout: Duration,
    },

    #[error("Operation '{operation}' failed after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Wallet rejected the request: {0}")]
    WalletRejected(String),

    #[error("Wallet did not respond in time: {0}")]
    WalletTimeout(String),

    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("DevTools protocol error: {0}")]
    Protocol(String),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RestakeError {
    /// Whether this error is a deadline expiry, regardless of which step raised it.
    pub fn is_deadline(&self) -> bool {
        matches!(
            self,
            RestakeError::DeadlineExceeded { .. } | RestakeError::WalletTimeout(_)
        )
    }
}

impl From<serde_json::Error> for RestakeError {
    fn from(e: serde_json::Error) -> Self {
        RestakeError::Protocol(format!("JSON error: {e}"))
    }
}
