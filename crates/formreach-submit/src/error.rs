use crate::transport::TransportError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SubmitError>;

/// Errors raised while executing a submission attempt.
///
/// CAPTCHA presence and "no form found" are deliberately *not* errors at the
/// orchestrator surface; they become result variants there. These variants
/// cover the failure paths inside an attempt.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("fetch error: {0}")]
    Fetch(#[from] formreach_net::FetchError),

    #[error("no form found at {0}")]
    NoFormFound(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("browser error: {0}")]
    Browser(#[from] formreach_browser::BrowserError),

    #[error("browser automation unavailable: {0}")]
    BrowserUnavailable(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SubmitError {
    /// Whether the retry coordinator should attempt again after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_retryable(),
            Self::Transport(e) => e.is_retryable(),
            Self::Browser(formreach_browser::BrowserError::Timeout(_)) => true,
            _ => false,
        }
    }
}
