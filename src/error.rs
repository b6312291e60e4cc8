//! Error types for Taskweave

use thiserror::Error;

/// Result type alias using Taskweave's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Taskweave
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Planner produced an invalid or unparseable plan
    #[error("Plan validation error: {0}")]
    PlanValidation(String),

    /// Judge produced an invalid or unparseable verdict
    #[error("Verdict validation error: {0}")]
    VerdictValidation(String),

    /// Session-level error
    #[error("Session error: {0}")]
    Session(String),

    /// Another slice is already running for this session
    #[error("Session busy: {0}")]
    SessionBusy(String),

    /// The answered ask_id does not match the pending question
    #[error("Ask mismatch: {0}")]
    AskMismatch(String),

    /// A budget dimension was exhausted
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment variable error
    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Timeout(_) | Error::Provider(_))
    }

    /// Check if error is a client error (user's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_)
                | Error::NotFound(_)
                | Error::AskMismatch(_)
                | Error::SessionBusy(_)
        )
    }
}
