//! Plain-HTTP transport for form submissions.
//!
//! Kept behind a trait so the strategy engine and its tests are independent
//! of the wire: production uses a cookie-carrying reqwest client, tests
//! inject scripted responses.

use async_trait::async_trait;
use formreach_core::config::FetchConfig;
use formreach_core::types::FormResponse;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// HTTP methods used for form submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Post,
    Get,
}

impl HttpMethod {
    /// Parse a form `method` attribute; anything unrecognized submits POST.
    #[must_use]
    pub fn from_form_attr(method: &str) -> Self {
        if method.eq_ignore_ascii_case("get") {
            Self::Get
        } else {
            Self::Post
        }
    }
}

/// One form submission request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub method: HttpMethod,
    /// Form-encoded payload (POST body or GET query)
    pub form: BTreeMap<String, String>,
    /// Extra headers, e.g. the XHR marker for AJAX submissions
    pub headers: Vec<(String, String)>,
}

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timeout: {0}")]
    Timeout(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request error: {0}")]
    Other(String),
}

impl TransportError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connection(_))
    }
}

/// Seam for sending form submissions over plain HTTP.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send the request, following redirects, and return the final response.
    async fn send(&self, request: TransportRequest) -> Result<FormResponse, TransportError>;
}

/// Production transport: shared reqwest client with a cookie store, so
/// session cookies set on the form page survive into the submission.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport from fetch configuration.
    pub fn new(config: &FetchConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .cookie_store(true)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    fn classify(error: &reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(error.to_string())
        } else if error.is_connect() {
            TransportError::Connection(error.to_string())
        } else {
            TransportError::Other(error.to_string())
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<FormResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Post => self.client.post(&request.url).form(&request.form),
            HttpMethod::Get => self.client.get(&request.url).query(&request.form),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| Self::classify(&e))?;

        let http_status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Other(format!("failed to read body: {e}")))?;

        tracing::debug!(
            "Submission response: HTTP {} from {}",
            http_status,
            final_url
        );

        Ok(FormResponse {
            http_status,
            final_url,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!(HttpMethod::from_form_attr("GET"), HttpMethod::Get);
        assert_eq!(HttpMethod::from_form_attr("get"), HttpMethod::Get);
        assert_eq!(HttpMethod::from_form_attr("POST"), HttpMethod::Post);
        assert_eq!(HttpMethod::from_form_attr(""), HttpMethod::Post);
    }

    #[test]
    fn test_transport_error_retryability() {
        assert!(TransportError::Timeout("t".into()).is_retryable());
        assert!(TransportError::Connection("c".into()).is_retryable());
        assert!(!TransportError::Other("o".into()).is_retryable());
    }

    #[test]
    fn test_transport_builds_from_default_config() {
        assert!(ReqwestTransport::new(&FetchConfig::default()).is_ok());
    }
}
