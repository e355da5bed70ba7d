use thiserror::Error;

pub type Result<T> = std::result::Result<T, FetchError>;

/// Errors surfaced by the page fetcher.
///
/// All variants except `Http` describe transport failures and are retryable
/// by the submission retry coordinator; `Http` carries the terminal status
/// the server actually returned after fetch-level retries were exhausted.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timeout: {0}")]
    Timeout(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("HTTP {status} fetching {url}")]
    Http { status: u16, url: String },

    #[error("failed to decode response body: {0}")]
    Decode(String),

    #[error("request error: {0}")]
    Other(String),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) => true,
            Self::Http { status, .. } => matches!(status, 408 | 429 | 500 | 502 | 503 | 504),
            Self::Decode(_) | Self::Other(_) => false,
        }
    }
}
