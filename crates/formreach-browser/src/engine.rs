//! Chromium-backed implementation of `BrowserAutomation`.

use crate::actions::{BrowserAutomation, BrowserSubmission};
use crate::error::{BrowserError, Result};
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::browser_protocol::network::EventRequestWillBeSent;
use chromiumoxide::Page;
use futures_util::stream::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Selector templates tried, in order, when filling a field by name.
const FILL_SELECTORS: &[&str] = &[
    "input[name='{}']",
    "textarea[name='{}']",
    "select[name='{}']",
    "input[id='{}']",
    "textarea[id='{}']",
    "#{}",
];

/// Selectors tried, in order, to find a submit control.
const SUBMIT_SELECTORS: &[&str] = &[
    "input[type='submit']",
    "button[type='submit']",
    "form button",
];

/// Static resource extensions excluded from network capture.
const STATIC_EXTENSIONS: &[&str] = &[".js", ".css", ".png", ".jpg", ".gif", ".ico", ".svg", ".woff"];

/// Browser automation engine backed by a headless Chromium instance.
pub struct ChromiumEngine {
    browser: Browser,
    navigation_timeout: Duration,
}

impl ChromiumEngine {
    /// Launch a Chromium instance with the given settings.
    pub async fn new(config: &formreach_core::config::BrowserConfig) -> Result<Self> {
        let mut builder = ChromeConfig::builder().no_sandbox();
        if !config.headless {
            builder = builder.with_head();
        }
        let chrome_config = builder
            .build()
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(chrome_config)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        // Drive the CDP connection for the browser's lifetime
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self {
            browser,
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
        })
    }

    async fn open(&self, url: &str) -> Result<Page> {
        let page = tokio::time::timeout(self.navigation_timeout, self.browser.new_page(url))
            .await
            .map_err(|_| BrowserError::Timeout(url.to_string()))?
            .map_err(|e| BrowserError::NavigationError(e.to_string()))?;

        let _ = tokio::time::timeout(self.navigation_timeout, page.wait_for_navigation())
            .await
            .map_err(|_| BrowserError::Timeout(url.to_string()))?;

        Ok(page)
    }

    async fn fill_fields(page: &Page, fields: &BTreeMap<String, String>) -> usize {
        let mut filled = 0;

        for (name, value) in fields {
            let mut done = false;
            for template in FILL_SELECTORS {
                let selector = template.replace("{}", name);
                if let Ok(element) = page.find_element(&selector).await {
                    if element.click().await.is_ok() && element.type_str(value).await.is_ok() {
                        tracing::debug!("Filled field {}", name);
                        filled += 1;
                        done = true;
                        break;
                    }
                }
            }
            if !done {
                tracing::debug!("Could not fill field {}", name);
            }
        }

        filled
    }

    async fn click_submit(page: &Page) -> Result<()> {
        for selector in SUBMIT_SELECTORS {
            if let Ok(element) = page.find_element(*selector).await {
                if element.click().await.is_ok() {
                    tracing::debug!("Submitted via {}", selector);
                    return Ok(());
                }
            }
        }

        // Last resort: drive the submission from script
        page.evaluate("document.querySelector('form').submit()")
            .await
            .map_err(|e| BrowserError::SubmitFailed(e.to_string()))?;
        tracing::debug!("Submitted via form.submit()");
        Ok(())
    }

    fn is_static_resource(url: &str) -> bool {
        let lower = url.to_lowercase();
        STATIC_EXTENSIONS.iter().any(|ext| lower.contains(ext))
    }
}

#[async_trait::async_trait]
impl BrowserAutomation for ChromiumEngine {
    async fn render_page(&self, url: &str) -> Result<String> {
        let page = self.open(url).await?;
        let content = page
            .content()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        let _ = page.close().await;
        Ok(content)
    }

    async fn submit_form(
        &self,
        url: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<BrowserSubmission> {
        let page = self.open(url).await?;

        let filled_fields = Self::fill_fields(&page, fields).await;
        tracing::info!("Filled {}/{} fields on {}", filled_fields, fields.len(), url);

        Self::click_submit(&page).await?;

        // Give the site time to process the submission and navigate
        let _ = tokio::time::timeout(self.navigation_timeout, page.wait_for_navigation()).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let response_url = page
            .url()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?
            .unwrap_or_else(|| url.to_string());
        let content = page
            .content()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        let _ = page.close().await;

        Ok(BrowserSubmission {
            http_status: 200,
            response_url,
            content,
            filled_fields,
        })
    }

    async fn capture_network_posts(
        &self,
        url: &str,
        window: Duration,
    ) -> Result<HashMap<String, String>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        let mut requests = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        page.goto(url)
            .await
            .map_err(|e| BrowserError::NavigationError(e.to_string()))?;

        let mut endpoints = HashMap::new();
        let deadline = tokio::time::Instant::now() + window;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, requests.next()).await {
                Ok(Some(event)) => {
                    let method = event.request.method.to_uppercase();
                    let request_url = event.request.url.clone();
                    if matches!(method.as_str(), "POST" | "PUT" | "PATCH")
                        && !Self::is_static_resource(&request_url)
                    {
                        tracing::debug!("Captured endpoint: {} {}", method, request_url);
                        endpoints.insert(request_url, method);
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }

        let _ = page.close().await;
        tracing::info!("Captured {} candidate endpoints on {}", endpoints.len(), url);
        Ok(endpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_resource_filter() {
        assert!(ChromiumEngine::is_static_resource(
            "https://example.com/app.js"
        ));
        assert!(ChromiumEngine::is_static_resource(
            "https://example.com/logo.PNG"
        ));
        assert!(!ChromiumEngine::is_static_resource(
            "https://example.com/api/inquiry"
        ));
    }

    #[test]
    fn test_fill_selector_templates() {
        let selector = FILL_SELECTORS[0].replace("{}", "email");
        assert_eq!(selector, "input[name='email']");
    }
}
