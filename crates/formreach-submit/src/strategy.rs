//! Submission strategy engine.
//!
//! Executes one attempt over the best-inferred transport. Decision order:
//! multi-page wizards go to the browser (plain HTTP cannot drive a paginated
//! client flow); AJAX forms submit directly to their endpoint, resolved from
//! inline script or by passive network capture; otherwise a standard
//! POST/GET, augmented with any CSRF-shaped tokens found on the page; and
//! any runtime failure falls back to full browser automation.
//!
//! Every attempt re-fetches the form page and re-derives hidden fields and
//! CSRF tokens from it - a token from a previous attempt is never reused.

use crate::error::{Result, SubmitError};
use crate::transport::{HttpMethod, HttpTransport, TransportRequest};
use formreach_browser::{BrowserAutomation, BrowserSubmission};
use formreach_core::types::{FormAnalysis, FormResponse, SubmissionMethod};
use formreach_net::PageFetch;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Hidden-input names that carry anti-forgery tokens.
const CSRF_FIELD_NAMES: &[&str] = &[
    "csrf_token",
    "csrftoken",
    "_csrf",
    "_token",
    "token",
    "authenticity_token",
    "x-csrf-token",
    "__requestverificationtoken",
];

/// Button labels that advance a wizard rather than submit it.
const NEXT_BUTTON_KEYWORDS: &[&str] = &["next", "次へ", "continue", "続ける", "次へ進む"];

fn ajax_indicator_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\.ajax\s*\(",
            r"fetch\s*\(",
            r"XMLHttpRequest",
            r"axios\.",
            r"\$\.post",
            r"preventDefault\(\)",
        ]
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("valid regex"))
        .collect()
    })
}

fn ajax_endpoint_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r#"url\s*:\s*['"]([^'"]+)['"]"#,
            r#"fetch\s*\(\s*['"]([^'"]+)['"]"#,
            r#"\.post\s*\(\s*['"]([^'"]+)['"]"#,
        ]
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("valid regex"))
        .collect()
    })
}

fn step_indicator_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"step\s+(\d+)\s+of\s+(\d+)",
            r"ステップ\s*(\d+)\s*/\s*(\d+)",
        ]
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("valid regex"))
        .collect()
    })
}

fn csrf_script_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r#"csrf[_-]?token["']?\s*[:=]\s*["']([^"']+)"#,
            r#"_token["']?\s*[:=]\s*["']([^"']+)"#,
        ]
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("valid regex"))
        .collect()
    })
}

/// Response of one attempt, annotated with how it was carried.
#[derive(Debug, Clone)]
pub struct StrategyResponse {
    /// The response to verify
    pub response: FormResponse,
    /// Transport that carried the attempt
    pub method: SubmissionMethod,
    /// Whether CSRF tokens were merged into the payload
    pub csrf_used: bool,
    /// Whether the page was detected as a multi-page wizard
    pub multi_step: bool,
}

/// Executes single submission attempts.
pub struct StrategyEngine {
    fetcher: Arc<dyn PageFetch>,
    transport: Arc<dyn HttpTransport>,
    browser: Option<Arc<dyn BrowserAutomation>>,
    browser_permits: Arc<Semaphore>,
    capture_window: Duration,
}

impl StrategyEngine {
    /// Create an engine. `browser_permits` bounds concurrent browser work,
    /// which is far more expensive than the plain-HTTP path.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn PageFetch>,
        transport: Arc<dyn HttpTransport>,
        browser: Option<Arc<dyn BrowserAutomation>>,
        browser_permits: Arc<Semaphore>,
        capture_window: Duration,
    ) -> Self {
        Self {
            fetcher,
            transport,
            browser,
            browser_permits,
            capture_window,
        }
    }

    /// Execute one attempt against a freshly fetched copy of the form page.
    pub async fn attempt(
        &self,
        form_url: &str,
        data: &BTreeMap<String, String>,
        analysis: &FormAnalysis,
    ) -> Result<StrategyResponse> {
        let page = self.fetcher.fetch(form_url).await?;
        let html = page.body;

        let mut payload = data.clone();

        // Re-derive hidden fields from the page just fetched; any hidden
        // values carried in from an older analysis are overwritten
        for (name, value) in parse_hidden_fields(&html) {
            payload.insert(name, value);
        }

        let csrf_tokens = extract_csrf_tokens(&html);
        let csrf_used = !csrf_tokens.is_empty();
        if csrf_used {
            tracing::info!("Merging {} CSRF token(s) into payload", csrf_tokens.len());
            payload.extend(csrf_tokens);
        }

        let multi_step = detect_multi_step(&html);
        if let Some(indicator) = &multi_step {
            tracing::info!("Multi-step form detected ({indicator}), using browser");
            match self.browser_submit(form_url, &payload).await {
                Ok(submission) => {
                    return Ok(StrategyResponse {
                        response: browser_to_response(submission),
                        method: SubmissionMethod::MultiStep,
                        csrf_used,
                        multi_step: true,
                    });
                }
                Err(e) => {
                    tracing::warn!("Multi-step browser submission failed: {e}, falling through");
                }
            }
        }

        let (action, method) = parse_form_target(&html, form_url, analysis);

        if has_ajax_indicators(&html) {
            match self
                .ajax_submit(form_url, &html, &action, method, &payload)
                .await
            {
                Ok(response) => {
                    return Ok(StrategyResponse {
                        response,
                        method: SubmissionMethod::Ajax,
                        csrf_used,
                        multi_step: multi_step.is_some(),
                    });
                }
                Err(e) => {
                    tracing::warn!("AJAX submission failed: {e}, falling back to standard");
                }
            }
        }

        // Standard POST/GET to the resolved action
        let request = TransportRequest {
            url: action.clone(),
            method,
            form: payload.clone(),
            headers: vec![("Referer".to_string(), form_url.to_string())],
        };

        match self.transport.send(request).await {
            Ok(response) => Ok(StrategyResponse {
                response,
                method: if csrf_used {
                    SubmissionMethod::Csrf
                } else {
                    SubmissionMethod::Standard
                },
                csrf_used,
                multi_step: multi_step.is_some(),
            }),
            Err(transport_error) => {
                // Last resort: full browser automation, keeping the original
                // error alongside whatever the browser reports
                tracing::warn!("Standard submission failed: {transport_error}");
                match self.browser_submit(form_url, &payload).await {
                    Ok(submission) => Ok(StrategyResponse {
                        response: browser_to_response(submission),
                        method: SubmissionMethod::Browser,
                        csrf_used,
                        multi_step: multi_step.is_some(),
                    }),
                    Err(browser_error) => {
                        tracing::error!(
                            "Browser fallback failed: {browser_error} (original error: {transport_error})"
                        );
                        Err(SubmitError::Transport(transport_error))
                    }
                }
            }
        }
    }

    /// Submit directly to an AJAX endpoint with the XHR marker header.
    async fn ajax_submit(
        &self,
        form_url: &str,
        html: &str,
        action: &str,
        method: HttpMethod,
        payload: &BTreeMap<String, String>,
    ) -> Result<FormResponse> {
        let mut endpoint = extract_ajax_endpoint(html, form_url);

        if endpoint.is_none() {
            if let Some(captured) = self.capture_endpoint(form_url).await {
                tracing::info!("Resolved AJAX endpoint via network capture: {captured}");
                endpoint = Some(captured);
            }
        }

        let url = endpoint.unwrap_or_else(|| action.to_string());
        tracing::info!("AJAX submission to {url}");

        let request = TransportRequest {
            url,
            method,
            form: payload.clone(),
            headers: vec![
                (
                    "X-Requested-With".to_string(),
                    "XMLHttpRequest".to_string(),
                ),
                (
                    "Content-Type".to_string(),
                    "application/x-www-form-urlencoded; charset=UTF-8".to_string(),
                ),
                ("Referer".to_string(), form_url.to_string()),
            ],
        };

        Ok(self.transport.send(request).await?)
    }

    /// Passively record the first non-static POST-like request the rendered
    /// page issues. Deterministic pick: POST before PUT/PATCH, then by URL.
    async fn capture_endpoint(&self, form_url: &str) -> Option<String> {
        let browser = self.browser.as_ref()?;
        let _permit = self.browser_permits.acquire().await.ok()?;

        match browser
            .capture_network_posts(form_url, self.capture_window)
            .await
        {
            Ok(endpoints) => {
                let mut candidates: Vec<(String, String)> = endpoints.into_iter().collect();
                candidates.sort_by(|a, b| {
                    let rank = |m: &str| if m == "POST" { 0 } else { 1 };
                    rank(&a.1).cmp(&rank(&b.1)).then_with(|| a.0.cmp(&b.0))
                });
                candidates.into_iter().map(|(url, _)| url).next()
            }
            Err(e) => {
                tracing::warn!("Network capture failed for {form_url}: {e}");
                None
            }
        }
    }

    async fn browser_submit(
        &self,
        form_url: &str,
        payload: &BTreeMap<String, String>,
    ) -> Result<BrowserSubmission> {
        let browser = self.browser.as_ref().ok_or_else(|| {
            SubmitError::BrowserUnavailable("no browser engine configured".to_string())
        })?;
        let _permit = self
            .browser_permits
            .acquire()
            .await
            .map_err(|e| SubmitError::Internal(format!("browser semaphore closed: {e}")))?;

        Ok(browser.submit_form(form_url, payload).await?)
    }
}

fn browser_to_response(submission: BrowserSubmission) -> FormResponse {
    FormResponse {
        http_status: submission.http_status,
        final_url: submission.response_url,
        body: submission.content,
    }
}

/// Hidden inputs of the first form on the page, captured verbatim.
fn parse_hidden_fields(html: &str) -> BTreeMap<String, String> {
    let document = Html::parse_document(html);
    let form_selector = Selector::parse("form").expect("valid selector");
    let hidden_selector = Selector::parse("input[type='hidden']").expect("valid selector");

    let mut fields = BTreeMap::new();
    if let Some(form) = document.select(&form_selector).next() {
        for input in form.select(&hidden_selector) {
            if let Some(name) = input.value().attr("name").filter(|n| !n.is_empty()) {
                fields.insert(
                    name.to_string(),
                    input.value().attr("value").unwrap_or("").to_string(),
                );
            }
        }
    }
    fields
}

/// CSRF-shaped tokens from hidden inputs, meta tags, and inline script.
fn extract_csrf_tokens(html: &str) -> BTreeMap<String, String> {
    let document = Html::parse_document(html);
    let mut tokens = BTreeMap::new();

    let hidden_selector = Selector::parse("input[type='hidden']").expect("valid selector");
    for input in document.select(&hidden_selector) {
        let Some(name) = input.value().attr("name") else {
            continue;
        };
        let name_lower = name.to_lowercase();
        if CSRF_FIELD_NAMES.iter().any(|c| name_lower.contains(c)) {
            tokens.insert(
                name.to_string(),
                input.value().attr("value").unwrap_or("").to_string(),
            );
            tracing::debug!("CSRF token found in hidden input: {name}");
        }
    }

    let meta_selector = Selector::parse("meta[name]").expect("valid selector");
    for meta in document.select(&meta_selector) {
        let Some(name) = meta.value().attr("name") else {
            continue;
        };
        if name.to_lowercase().contains("csrf") {
            tokens.insert(
                name.to_string(),
                meta.value().attr("content").unwrap_or("").to_string(),
            );
            tracing::debug!("CSRF token found in meta tag: {name}");
        }
    }

    let script_selector = Selector::parse("script").expect("valid selector");
    for script in document.select(&script_selector) {
        let text: String = script.text().collect();
        for pattern in csrf_script_patterns() {
            if let Some(capture) = pattern.captures(&text).and_then(|c| c.get(1)) {
                tokens.insert("_csrf_from_script".to_string(), capture.as_str().to_string());
                tracing::debug!("CSRF token found in inline script");
                break;
            }
        }
    }

    tokens
}

/// Multi-step signals: step-N-of-M text, hidden step counters, next/continue
/// controls, wizard-like markup. Returns the indicator found.
fn detect_multi_step(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let text: String = document.root_element().text().collect();

    for pattern in step_indicator_patterns() {
        if let Some(captures) = pattern.captures(&text) {
            return Some(format!(
                "step indicator {}/{}",
                captures.get(1).map_or("?", |m| m.as_str()),
                captures.get(2).map_or("?", |m| m.as_str())
            ));
        }
    }

    let hidden_selector = Selector::parse("input[type='hidden']").expect("valid selector");
    for input in document.select(&hidden_selector) {
        let name = input.value().attr("name").unwrap_or("").to_lowercase();
        if name.contains("step") || name.contains("page") {
            return Some(format!("hidden step field: {name}"));
        }
    }

    let button_selector =
        Selector::parse("button, input[type='submit'], input[type='button']")
            .expect("valid selector");
    for button in document.select(&button_selector) {
        let label = if button.value().name() == "button" {
            button.text().collect::<String>()
        } else {
            button.value().attr("value").unwrap_or("").to_string()
        };
        let label_lower = label.to_lowercase();
        if NEXT_BUTTON_KEYWORDS.iter().any(|k| label_lower.contains(k)) {
            return Some(format!("next/continue control: {}", label.trim()));
        }
    }

    let wizard_selector =
        Selector::parse("[class*='wizard'], [class*='multi-step']").expect("valid selector");
    if document.select(&wizard_selector).next().is_some() {
        return Some("wizard-like markup".to_string());
    }

    None
}

/// Whether the page's form/scripts suggest an XHR-driven submission.
fn has_ajax_indicators(html: &str) -> bool {
    let document = Html::parse_document(html);
    let form_selector = Selector::parse("form").expect("valid selector");
    let script_selector = Selector::parse("script").expect("valid selector");

    let form_html = document
        .select(&form_selector)
        .next()
        .map(|f| f.html())
        .unwrap_or_default();
    let scripts: String = document
        .select(&script_selector)
        .map(|s| s.text().collect::<String>())
        .collect::<Vec<_>>()
        .join("\n");

    let combined = format!("{form_html}\n{scripts}");
    ajax_indicator_patterns()
        .iter()
        .any(|p| p.is_match(&combined))
}

/// Pull the AJAX endpoint out of inline script literals, resolved absolute.
fn extract_ajax_endpoint(html: &str, base_url: &str) -> Option<String> {
    for pattern in ajax_endpoint_patterns() {
        if let Some(capture) = pattern.captures(html).and_then(|c| c.get(1)) {
            let endpoint = capture.as_str();
            if endpoint.starts_with("http") {
                return Some(endpoint.to_string());
            }
            if let Ok(base) = url::Url::parse(base_url) {
                if let Ok(resolved) = base.join(endpoint) {
                    return Some(resolved.to_string());
                }
            }
        }
    }
    None
}

/// Resolve the submission target and method from the freshly fetched page,
/// falling back to the analysis when the page lost its form mid-flight.
fn parse_form_target(html: &str, page_url: &str, analysis: &FormAnalysis) -> (String, HttpMethod) {
    let document = Html::parse_document(html);
    let form_selector = Selector::parse("form").expect("valid selector");

    if let Some(form) = document.select(&form_selector).next() {
        let method = HttpMethod::from_form_attr(form.value().attr("method").unwrap_or("POST"));
        let action = form
            .value()
            .attr("action")
            .filter(|a| !a.trim().is_empty())
            .and_then(|a| url::Url::parse(page_url).ok()?.join(a).ok())
            .map_or_else(|| page_url.to_string(), |u| u.to_string());
        return (action, method);
    }

    (
        analysis.submit_url().to_string(),
        HttpMethod::from_form_attr(&analysis.method),
    )
}
