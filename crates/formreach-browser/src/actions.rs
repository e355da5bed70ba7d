use crate::error::Result;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Result of a browser-driven form submission.
///
/// The browser reports the page state after submission; `http_status` is
/// 200 whenever the resulting page rendered, mirroring what an HTTP client
/// would have observed after following the final redirect.
#[derive(Debug, Clone)]
pub struct BrowserSubmission {
    /// Status-like code for the landing page
    pub http_status: u16,
    /// URL the browser ended up on
    pub response_url: String,
    /// Rendered content of the landing page
    pub content: String,
    /// Number of fields that were actually filled
    pub filled_fields: usize,
}

/// Browser operations needed by form discovery and submission.
#[async_trait::async_trait]
pub trait BrowserAutomation: Send + Sync {
    /// Render a page (executing its scripts) and return the resulting HTML.
    async fn render_page(&self, url: &str) -> Result<String>;

    /// Navigate to a form page, fill the given fields by name/id-matching
    /// selectors, submit, and report the landing page.
    async fn submit_form(
        &self,
        url: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<BrowserSubmission>;

    /// Load a page and passively record non-static POST/PUT/PATCH requests
    /// it issues within the window, mapping endpoint URL to method.
    async fn capture_network_posts(
        &self,
        url: &str,
        window: Duration,
    ) -> Result<HashMap<String, String>>;
}
