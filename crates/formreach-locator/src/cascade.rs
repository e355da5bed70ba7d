//! The discovery cascade.
//!
//! Tier order: TOP probes, HIGH probes, homepage parameter-link scan,
//! MEDIUM probes, LOW probes, bounded crawl. Each tier short-circuits on
//! its first success; exhausting them all is terminal (`Ok(None)`), the
//! locator itself never retries.

use crate::candidate::{
    is_contact_link_text, is_contact_shaped_url, score_candidates, FormCandidate,
};
use crate::crawler::crawl_for_forms;
use formreach_core::config::LocatorConfig;
use formreach_core::{site_key, Result};
use formreach_net::{PageFetch, RobotsChecker, RobotsPolicy};
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Most common contact paths, probed first.
pub const TOP_PRIORITY_PATHS: &[&str] = &[
    "/contact",
    "/contact/",
    "/contact/mailform",
    "/contact/mailform/",
    "/contact/contact.html",
    "/contact/inquiry.html",
    "/inquiry",
    "/inquiry/",
];

/// Secondary common paths.
pub const HIGH_PRIORITY_PATHS: &[&str] = &[
    "/contact.html",
    "/contact.php",
    "/inquiry.html",
    "/inquiry.php",
    "/form",
    "/form.html",
];

/// Less common variants.
pub const MEDIUM_PRIORITY_PATHS: &[&str] = &[
    "/contact.htm",
    "/inquiry.htm",
    "/contact/index.html",
    "/contact/index.htm",
    "/inquiry/index.html",
    "/form.php",
    "/contact-us",
    "/contact_us",
    "/inquiry-form",
];

/// Long-shot paths tried before resorting to a crawl.
pub const LOW_PRIORITY_PATHS: &[&str] = &[
    "/お問い合わせ",
    "/otoiawase",
    "/toiawase",
    "/contact.aspx",
    "/inquiry.aspx",
];

/// How a form page was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    TopPriority,
    HighPriority,
    ParameterLink,
    MediumPriority,
    LowPriority,
    SiteCrawl,
}

impl DetectionMethod {
    /// Label used for candidate scoring and audit records.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TopPriority => "top_priority",
            Self::HighPriority => "high_priority",
            Self::ParameterLink => "parameter_link",
            Self::MediumPriority => "medium_priority",
            Self::LowPriority => "low_priority",
            Self::SiteCrawl => "site_crawl",
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A discovered form page, handed to the analyzer.
#[derive(Debug, Clone)]
pub struct LocatedForm {
    /// URL of the page containing the form
    pub form_url: String,
    /// The page HTML as fetched
    pub html: String,
    /// How it was found
    pub method: DetectionMethod,
}

/// Discovers a site's business-inquiry form.
pub struct FormLocator {
    fetcher: Arc<dyn PageFetch>,
    robots: Arc<RobotsChecker>,
    policy: RobotsPolicy,
    config: LocatorConfig,
}

impl FormLocator {
    /// Create a locator over the given fetch/robots collaborators.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn PageFetch>,
        robots: Arc<RobotsChecker>,
        policy: RobotsPolicy,
        config: LocatorConfig,
    ) -> Self {
        Self {
            fetcher,
            robots,
            policy,
            config,
        }
    }

    /// Run the cascade. `Ok(None)` means no form exists anywhere we are
    /// allowed to look - a terminal outcome, not worth retrying.
    pub async fn locate(&self, root_url: &str) -> Result<Option<LocatedForm>> {
        let base = site_key(root_url)?;
        tracing::info!("Starting contact form discovery for {}", root_url);

        for (paths, method) in [
            (TOP_PRIORITY_PATHS, DetectionMethod::TopPriority),
            (HIGH_PRIORITY_PATHS, DetectionMethod::HighPriority),
        ] {
            if let Some(found) = self.try_probe_list(&base, paths, method).await {
                return Ok(Some(found));
            }
        }

        if let Some(found) = self.scan_homepage_parameter_links(root_url).await {
            return Ok(Some(found));
        }

        for (paths, method) in [
            (MEDIUM_PRIORITY_PATHS, DetectionMethod::MediumPriority),
            (LOW_PRIORITY_PATHS, DetectionMethod::LowPriority),
        ] {
            if let Some(found) = self.try_probe_list(&base, paths, method).await {
                return Ok(Some(found));
            }
        }

        if let Some(found) = self.crawl_site(root_url).await {
            return Ok(Some(found));
        }

        tracing::warn!("No contact form found for {} after full cascade", root_url);
        Ok(None)
    }

    /// Probe fixed paths, accepting the first page containing a `<form>`.
    async fn try_probe_list(
        &self,
        base: &str,
        paths: &[&str],
        method: DetectionMethod,
    ) -> Option<LocatedForm> {
        for path in paths {
            let probe_url = format!("{base}{path}");

            if !self.robots.is_allowed(&probe_url, self.policy).await {
                tracing::debug!("robots.txt disallows {}", probe_url);
                continue;
            }

            match self.fetcher.fetch(&probe_url).await {
                Ok(page) if page.body.to_lowercase().contains("<form") => {
                    tracing::info!("Found form via {} probe: {}", method, page.final_url);
                    return Some(LocatedForm {
                        form_url: page.final_url,
                        html: page.body,
                        method,
                    });
                }
                Ok(_) => tracing::debug!("No <form> at {}", probe_url),
                Err(e) => tracing::debug!("Probe failed for {}: {}", probe_url, e),
            }
        }
        None
    }

    /// Scan the homepage for contact-shaped links carrying query parameters
    /// (`?CNo=`, `?uid=`, ...) or bilingual contact anchor text.
    async fn scan_homepage_parameter_links(&self, root_url: &str) -> Option<LocatedForm> {
        let homepage = self.fetcher.fetch(root_url).await.ok()?;
        let links = parameter_link_targets(&homepage.body, &homepage.final_url);

        let mut scored_pages: Vec<(FormCandidate, String)> = Vec::new();
        for link in links {
            if !self.robots.is_allowed(&link, self.policy).await {
                continue;
            }
            let Ok(page) = self.fetcher.fetch(&link).await else {
                continue;
            };
            if !page.body.to_lowercase().contains("<form") {
                continue;
            }
            for candidate in page_candidates(&page.final_url, &page.body, "parameter_link") {
                scored_pages.push((candidate, page.body.clone()));
            }
        }

        if scored_pages.is_empty() {
            return None;
        }

        let html_by_url: HashMap<String, String> = scored_pages
            .iter()
            .map(|(c, html)| (c.url.clone(), html.clone()))
            .collect();
        let best = score_candidates(scored_pages.into_iter().map(|(c, _)| c).collect())
            .into_iter()
            .next()?;

        tracing::info!(
            "Found form via parameter link: {} (score {:.2})",
            best.url,
            best.score
        );
        Some(LocatedForm {
            html: html_by_url.get(&best.url)?.clone(),
            form_url: best.url,
            method: DetectionMethod::ParameterLink,
        })
    }

    /// Bounded crawl, scoring every form page collected.
    async fn crawl_site(&self, root_url: &str) -> Option<LocatedForm> {
        let pages = crawl_for_forms(
            &self.fetcher,
            &self.robots,
            self.policy,
            &self.config,
            root_url,
        )
        .await;

        let mut candidates = Vec::new();
        let mut html_by_url: HashMap<String, String> = HashMap::new();
        for (url, html) in &pages {
            // A crawl hit on a contact-shaped URL is pattern evidence, not luck
            let method = if is_contact_shaped_url(url) {
                "pattern_match"
            } else {
                "site_crawl"
            };
            candidates.extend(page_candidates(url, html, method));
            html_by_url.insert(url.clone(), html.clone());
        }

        let best = score_candidates(candidates).into_iter().next()?;
        if best.score <= 0.0 {
            return None;
        }

        tracing::info!(
            "Found form via site crawl: {} (score {:.2})",
            best.url,
            best.score
        );
        Some(LocatedForm {
            html: html_by_url.get(&best.url)?.clone(),
            form_url: best.url,
            method: DetectionMethod::SiteCrawl,
        })
    }
}

/// Build candidates for every acceptable form on a page.
fn page_candidates(url: &str, html: &str, detection_method: &str) -> Vec<FormCandidate> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("form").expect("valid selector");
    document
        .select(&selector)
        .filter_map(|form| FormCandidate::from_form(url, &form, detection_method))
        .collect()
}

/// Contact-shaped, query-carrying links on a homepage.
fn parameter_link_targets(html: &str, base_url: &str) -> Vec<String> {
    let Ok(base) = url::Url::parse(base_url) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("valid selector");

    let mut targets = Vec::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if !href.contains('?') {
            continue;
        }
        let Ok(absolute) = base.join(href) else {
            continue;
        };

        let path_and_query = match absolute.query() {
            Some(q) => format!("{}?{q}", absolute.path()),
            None => absolute.path().to_string(),
        };
        let text = anchor.text().collect::<String>();

        if is_contact_link_text(&text) || is_contact_shaped_url(&path_and_query) {
            targets.push(absolute.to_string());
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use formreach_net::{FetchError, FetchedPage};
    use std::sync::Mutex;

    /// Scripted fetcher: URL -> HTML body, recording every request.
    struct ScriptedFetcher {
        pages: HashMap<String, String>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn new(pages: &[(&str, &str)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(u, b)| ((*u).to_string(), (*b).to_string()))
                    .collect(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetch for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> formreach_net::Result<FetchedPage> {
            self.requests.lock().unwrap().push(url.to_string());
            match self.pages.get(url) {
                Some(body) => Ok(FetchedPage {
                    body: body.clone(),
                    http_status: 200,
                    final_url: url.to_string(),
                }),
                None => Err(FetchError::Http {
                    status: 404,
                    url: url.to_string(),
                }),
            }
        }
    }

    const INQUIRY_FORM: &str = r#"
        <form action="/inquiry/send" method="post">
            <input type="email" name="email" required>
            <textarea name="message"></textarea>
            <input type="submit" value="送信">
        </form>
    "#;

    fn locator(fetcher: Arc<ScriptedFetcher>) -> FormLocator {
        FormLocator::new(
            fetcher,
            Arc::new(RobotsChecker::new("ContactBot/1.0", 5)),
            RobotsPolicy::Ignore,
            LocatorConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_top_tier_short_circuits_before_crawl() {
        // Form exists at /inquiry (TOP tier) and at a deep page only the
        // crawl could find; the cascade must stop at the probe.
        let fetcher = Arc::new(ScriptedFetcher::new(&[
            ("https://example.jp/inquiry", INQUIRY_FORM),
            (
                "https://example.jp/",
                r#"<a href="/deep/page">deep</a>"#,
            ),
            ("https://example.jp/deep/page", INQUIRY_FORM),
        ]));

        let found = locator(fetcher.clone())
            .locate("https://example.jp/")
            .await
            .expect("locate")
            .expect("form found");

        assert_eq!(found.form_url, "https://example.jp/inquiry");
        assert_eq!(found.method, DetectionMethod::TopPriority);

        let requests = fetcher.requested();
        // Never fetched the homepage or the deep page: crawl tier untouched
        assert!(!requests.contains(&"https://example.jp/".to_string()));
        assert!(!requests.contains(&"https://example.jp/deep/page".to_string()));
        assert!(requests
            .iter()
            .all(|u| TOP_PRIORITY_PATHS.iter().any(|p| u.ends_with(p))));
    }

    #[tokio::test]
    async fn test_probe_order_within_tier() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[
            ("https://example.jp/contact", INQUIRY_FORM),
            ("https://example.jp/inquiry", INQUIRY_FORM),
        ]));

        let found = locator(fetcher)
            .locate("https://example.jp/")
            .await
            .expect("locate")
            .expect("form found");

        // /contact comes before /inquiry in the TOP list
        assert_eq!(found.form_url, "https://example.jp/contact");
    }

    #[tokio::test]
    async fn test_parameter_link_tier() {
        let homepage = r#"<a href="/cgi-bin/mailform?CNo=42">お問い合わせ</a>"#;
        let fetcher = Arc::new(ScriptedFetcher::new(&[
            ("https://example.jp/", homepage),
            ("https://example.jp/cgi-bin/mailform?CNo=42", INQUIRY_FORM),
        ]));

        let found = locator(fetcher)
            .locate("https://example.jp/")
            .await
            .expect("locate")
            .expect("form found");

        assert_eq!(found.form_url, "https://example.jp/cgi-bin/mailform?CNo=42");
        assert_eq!(found.method, DetectionMethod::ParameterLink);
    }

    #[tokio::test]
    async fn test_crawl_tier_as_last_resort() {
        let homepage = r#"<a href="/support/help">ヘルプ</a>"#;
        let fetcher = Arc::new(ScriptedFetcher::new(&[
            ("https://example.jp/", homepage),
            ("https://example.jp/support/help", INQUIRY_FORM),
        ]));

        let found = locator(fetcher)
            .locate("https://example.jp/")
            .await
            .expect("locate")
            .expect("form found");

        assert_eq!(found.form_url, "https://example.jp/support/help");
        assert_eq!(found.method, DetectionMethod::SiteCrawl);
    }

    #[tokio::test]
    async fn test_not_found_is_terminal() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[(
            "https://example.jp/",
            "<html><body>nothing here</body></html>",
        )]));

        let found = locator(fetcher)
            .locate("https://example.jp/")
            .await
            .expect("locate");
        assert!(found.is_none());
    }
}
