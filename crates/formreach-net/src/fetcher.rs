//! HTTP page fetching with redirect following and bounded retry.

use crate::error::{FetchError, Result};
use async_trait::async_trait;
use formreach_core::config::FetchConfig;
use std::time::Duration;

/// Base delay in milliseconds for fetch-level retry backoff.
const FETCH_RETRY_DELAY_MS: u64 = 1000;

/// A fetched page with its final post-redirect URL.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Decoded response body
    pub body: String,
    /// HTTP status of the final response
    pub http_status: u16,
    /// URL after redirects were followed
    pub final_url: String,
}

/// Seam for page fetching so locator/analyzer/strategy tests can inject
/// scripted pages instead of hitting the network.
#[async_trait]
pub trait PageFetch: Send + Sync {
    /// Fetch a page, following redirects. Non-2xx terminal statuses are
    /// reported as `FetchError::Http`.
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

/// Production fetcher backed by a shared reqwest client.
pub struct PageFetcher {
    client: reqwest::Client,
    max_retries: u32,
}

impl PageFetcher {
    /// Build a fetcher from configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
        })
    }

    fn classify(error: &reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(error.to_string())
        } else if error.is_connect() {
            FetchError::Connection(error.to_string())
        } else {
            FetchError::Other(error.to_string())
        }
    }
}

#[async_trait]
impl PageFetch for PageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(FETCH_RETRY_DELAY_MS * u64::from(attempt));
                tracing::warn!(
                    "Fetch failed for {} (attempt {}/{}), retrying in {:?}...",
                    url,
                    attempt,
                    self.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let final_url = response.url().to_string();

                    if response.status().is_success() {
                        let body = response
                            .text()
                            .await
                            .map_err(|e| FetchError::Decode(e.to_string()))?;
                        tracing::debug!("Fetched {} -> {} ({} bytes)", url, final_url, body.len());
                        return Ok(FetchedPage {
                            body,
                            http_status: status,
                            final_url,
                        });
                    }

                    let error = FetchError::Http {
                        status,
                        url: url.to_string(),
                    };
                    if !error.is_retryable() {
                        return Err(error);
                    }
                    last_error = Some(error);
                }
                Err(e) => {
                    let error = Self::classify(&e);
                    if !error.is_retryable() {
                        return Err(error);
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| FetchError::Other("fetch failed with no recorded error".into())))
    }
}
