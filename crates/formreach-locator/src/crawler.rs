//! Bounded same-domain crawl, the locator's last resort.
//!
//! Breadth-first over same-domain links, contact-shaped links ahead of
//! generic ones, until enough pages with a `<form>` are collected or the
//! visited-set cap (2x the page budget) is reached.

use crate::candidate::{is_contact_link_text, is_contact_shaped_url};
use formreach_core::config::LocatorConfig;
use formreach_net::{PageFetch, RobotsChecker, RobotsPolicy};
use scraper::{Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Crawl the site starting at `root_url`, returning `(url, html)` pairs for
/// pages that contain a `<form>`.
pub async fn crawl_for_forms(
    fetcher: &Arc<dyn PageFetch>,
    robots: &RobotsChecker,
    policy: RobotsPolicy,
    config: &LocatorConfig,
    root_url: &str,
) -> Vec<(String, String)> {
    let Ok(root) = url::Url::parse(root_url) else {
        return Vec::new();
    };
    let Some(root_domain) = root.host_str().map(ToString::to_string) else {
        return Vec::new();
    };

    let mut pages_with_forms = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::from([root_url.to_string()]);

    while let Some(url) = queue.pop_front() {
        if pages_with_forms.len() >= config.max_crawl_pages
            || visited.len() >= config.max_crawl_pages * 2
        {
            break;
        }
        if !visited.insert(url.clone()) {
            continue;
        }
        if !robots.is_allowed(&url, policy).await {
            continue;
        }

        let page = match fetcher.fetch(&url).await {
            Ok(page) => page,
            Err(e) => {
                tracing::debug!("Crawl fetch failed for {}: {}", url, e);
                continue;
            }
        };

        if page.body.to_lowercase().contains("<form") {
            tracing::info!("Found form page while crawling: {}", page.final_url);
            pages_with_forms.push((page.final_url.clone(), page.body.clone()));
        }

        if pages_with_forms.len() < config.max_crawl_pages {
            for link in extract_priority_links(&page.body, &page.final_url, &root_domain, config) {
                if !visited.contains(&link) {
                    queue.push_back(link);
                }
            }
        }
    }

    pages_with_forms
}

/// Extract same-domain links, contact-shaped ones first and at most
/// `generic_links_per_page` of the rest.
fn extract_priority_links(
    html: &str,
    base_url: &str,
    root_domain: &str,
    config: &LocatorConfig,
) -> Vec<String> {
    let Ok(base) = url::Url::parse(base_url) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("valid selector");

    let mut priority = Vec::new();
    let mut generic = Vec::new();

    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(mut absolute) = base.join(href) else {
            continue;
        };
        absolute.set_fragment(None);

        if absolute.host_str() != Some(root_domain) {
            continue;
        }
        if !matches!(absolute.scheme(), "http" | "https") {
            continue;
        }

        let path_and_query = match absolute.query() {
            Some(q) => format!("{}?{q}", absolute.path()),
            None => absolute.path().to_string(),
        };
        let text = anchor.text().collect::<String>();

        if is_contact_shaped_url(&path_and_query) || is_contact_link_text(&text) {
            priority.push(absolute.to_string());
        } else {
            generic.push(absolute.to_string());
        }
    }

    generic.truncate(config.generic_links_per_page);
    priority.extend(generic);
    priority
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_links_come_first() {
        let html = r#"
            <a href="/about">About</a>
            <a href="/products">Products</a>
            <a href="/contact">お問い合わせ</a>
            <a href="https://other-domain.com/contact">External</a>
        "#;
        let config = LocatorConfig::default();
        let links =
            extract_priority_links(html, "https://example.jp/", "example.jp", &config);

        assert_eq!(links[0], "https://example.jp/contact");
        assert!(!links.iter().any(|l| l.contains("other-domain.com")));
    }

    #[test]
    fn test_generic_links_capped() {
        let html: String = (0..20)
            .map(|i| format!(r#"<a href="/page{i}">Page {i}</a>"#))
            .collect();
        let config = LocatorConfig::default();
        let links =
            extract_priority_links(&html, "https://example.jp/", "example.jp", &config);
        assert_eq!(links.len(), config.generic_links_per_page);
    }

    #[test]
    fn test_fragments_stripped() {
        let html = r#"<a href="/contact#form">Contact</a>"#;
        let config = LocatorConfig::default();
        let links =
            extract_priority_links(html, "https://example.jp/", "example.jp", &config);
        assert_eq!(links, vec!["https://example.jp/contact"]);
    }
}
