//! Form structure analysis.
//!
//! Parses a fetched page into a `FormAnalysis`: resolved action, classified
//! fields, hidden inputs (CSRF/tracking tokens are echoed back verbatim on
//! submission), CAPTCHA presence, submission mechanism, and a confidence
//! score over the whole analysis.

use crate::captcha::detect_captcha;
use formreach_core::types::{
    clamp_confidence, FieldPurpose, FormAnalysis, FormField, SubmissionType,
};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Input types excluded from the submittable field set.
const CONTROL_TYPES: &[&str] = &["submit", "button", "reset", "image"];

/// Input types kept as-is; anything else is normalized to `text`.
const KNOWN_TYPES: &[&str] = &["text", "email", "tel", "url", "number", "textarea", "select"];

fn purpose_patterns() -> &'static Vec<(FieldPurpose, Vec<Regex>)> {
    static PATTERNS: OnceLock<Vec<(FieldPurpose, Vec<Regex>)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| Regex::new(&format!("(?i){p}")).expect("valid regex"))
                .collect::<Vec<_>>()
        };
        vec![
            (
                FieldPurpose::Email,
                compile(&["email", "e-mail", "mail", "メール", "ｅメール"]),
            ),
            (
                FieldPurpose::Phone,
                compile(&["phone", "tel", "telephone", "mobile", "電話", "携帯"]),
            ),
            (
                FieldPurpose::Company,
                compile(&["company", "organization", "会社", "企業", "法人", "御社名"]),
            ),
            (
                FieldPurpose::Subject,
                compile(&["subject", "title", "件名", "表題", "タイトル"]),
            ),
            (
                FieldPurpose::Message,
                compile(&[
                    "message",
                    "content",
                    "inquiry",
                    "question",
                    "comment",
                    "メッセージ",
                    "内容",
                    "お問い合わせ",
                    "詳細",
                    "本文",
                ]),
            ),
            (
                FieldPurpose::Name,
                compile(&["name", "fullname", "名前", "なまえ", "氏名", "お名前"]),
            ),
        ]
    })
}

fn ajax_patterns() -> &'static Vec<Regex> {
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

/// Analyzes form pages into structured descriptions.
#[derive(Debug, Default)]
pub struct FormAnalyzer;

impl FormAnalyzer {
    /// Create a new analyzer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Analyze the first form on a page.
    ///
    /// Returns `None` when the page has no `<form>` element; callers with a
    /// browser available may re-render the page and try again for forms
    /// built by scripts.
    #[must_use]
    pub fn analyze(&self, form_url: &str, html: &str) -> Option<FormAnalysis> {
        let document = Html::parse_document(html);
        let form_selector = Selector::parse("form").expect("valid selector");
        let form = document.select(&form_selector).next()?;

        let action = Self::resolve_action(form_url, &form);
        let method = form
            .value()
            .attr("method")
            .filter(|m| !m.is_empty())
            .unwrap_or("POST")
            .to_uppercase();

        let (fields, hidden_fields) = Self::extract_fields(&form);
        let mut issues = Vec::new();

        let captcha = detect_captcha(html).map(|(kind, issue)| {
            issues.push(issue);
            kind
        });

        let submission_type = Self::detect_submission_type(&form, &document);

        let mut analysis = FormAnalysis {
            url: form_url.to_string(),
            action,
            method,
            fields,
            hidden_fields,
            captcha,
            submission_type,
            confidence: 0.0,
            issues,
        };
        analysis.confidence = Self::score(&analysis);

        tracing::info!(
            "Form analysis complete for {}: {:.2} confidence, {} fields, captcha={}, submission={:?}",
            form_url,
            analysis.confidence,
            analysis.fields.len(),
            analysis
                .captcha
                .map_or_else(|| "none".to_string(), |c| c.to_string()),
            analysis.submission_type,
        );

        Some(analysis)
    }

    /// Resolve the form action to an absolute URL; an empty or missing
    /// action means the form submits to its own page.
    fn resolve_action(form_url: &str, form: &ElementRef<'_>) -> Option<String> {
        let action = form.value().attr("action")?.trim();
        if action.is_empty() {
            return None;
        }
        url::Url::parse(form_url)
            .ok()
            .and_then(|base| base.join(action).ok())
            .map(|u| u.to_string())
    }

    fn extract_fields(form: &ElementRef<'_>) -> (Vec<FormField>, BTreeMap<String, String>) {
        let field_selector = Selector::parse("input, textarea, select").expect("valid selector");
        let mut fields = Vec::new();
        let mut hidden_fields = BTreeMap::new();

        for element in form.select(&field_selector) {
            let tag = element.value().name();
            let Some(name) = element.value().attr("name").filter(|n| !n.is_empty()) else {
                continue;
            };

            let input_type = if tag == "input" {
                element
                    .value()
                    .attr("type")
                    .unwrap_or("text")
                    .to_lowercase()
            } else {
                tag.to_string()
            };

            if input_type == "hidden" {
                hidden_fields.insert(
                    name.to_string(),
                    element.value().attr("value").unwrap_or("").to_string(),
                );
                continue;
            }
            if CONTROL_TYPES.contains(&input_type.as_str()) {
                continue;
            }

            let purpose = Self::classify_purpose(&element);
            let required = element.value().attr("required").is_some()
                || element.value().attr("aria-required").is_some();
            let placeholder = element
                .value()
                .attr("placeholder")
                .filter(|p| !p.is_empty())
                .map(ToString::to_string);

            fields.push(FormField {
                name: name.to_string(),
                purpose,
                input_type: if KNOWN_TYPES.contains(&input_type.as_str()) {
                    input_type
                } else {
                    "text".to_string()
                },
                required,
                placeholder,
                selector: Self::css_selector(&element, tag, name),
            });
        }

        (fields, hidden_fields)
    }

    /// Classify a field by matching its name/id/placeholder and any label
    /// text in the parent element against the bilingual keyword sets.
    /// Unmatched fields stay `unknown` but remain submittable.
    fn classify_purpose(element: &ElementRef<'_>) -> FieldPurpose {
        let name = element.value().attr("name").unwrap_or("");
        let id = element.value().attr("id").unwrap_or("");
        let placeholder = element.value().attr("placeholder").unwrap_or("");
        let label = Self::sibling_label_text(element).unwrap_or_default();

        // type="email"/"tel" is authoritative regardless of naming
        match element.value().attr("type").map(str::to_lowercase).as_deref() {
            Some("email") => return FieldPurpose::Email,
            Some("tel") => return FieldPurpose::Phone,
            _ => {}
        }
        if element.value().name() == "textarea" {
            return FieldPurpose::Message;
        }

        let combined = format!("{name} {id} {placeholder} {label}").to_lowercase();
        for (purpose, patterns) in purpose_patterns() {
            if patterns.iter().any(|p| p.is_match(&combined)) {
                return *purpose;
            }
        }
        FieldPurpose::Unknown
    }

    fn sibling_label_text(element: &ElementRef<'_>) -> Option<String> {
        let parent = element.parent().and_then(ElementRef::wrap)?;
        let label_selector = Selector::parse("label").expect("valid selector");
        parent
            .select(&label_selector)
            .next()
            .map(|l| l.text().collect::<String>().trim().to_string())
    }

    fn css_selector(element: &ElementRef<'_>, tag: &str, name: &str) -> String {
        element.value().attr("id").map_or_else(
            || format!("{tag}[name='{name}']"),
            |id| format!("#{id}"),
        )
    }

    fn detect_submission_type(form: &ElementRef<'_>, document: &Html) -> SubmissionType {
        let form_html = form.html().to_lowercase();

        if form_html.contains("javascript:") {
            return SubmissionType::Javascript;
        }

        let script_selector = Selector::parse("script").expect("valid selector");
        let scripts: String = document
            .select(&script_selector)
            .map(|s| s.text().collect::<String>())
            .collect::<Vec<_>>()
            .join("\n");
        let combined = format!("{form_html}\n{scripts}");

        if form.value().attr("onsubmit").is_some()
            || ajax_patterns().iter().any(|p| p.is_match(&combined))
        {
            return SubmissionType::Ajax;
        }

        SubmissionType::Standard
    }

    /// Additive confidence over the analysis, normalized to [0,1].
    fn score(analysis: &FormAnalysis) -> f32 {
        let mut score = 0.0f32;

        if analysis.action.is_some() {
            score += 30.0;
        } else {
            // Self-submission still works, it is just weaker evidence
            score += 10.0;
        }

        let required = analysis.fields.iter().filter(|f| f.required).count();
        if required > 0 {
            score += (required as f32 * 5.0).min(20.0);
        }

        let names: String = analysis
            .fields
            .iter()
            .map(|f| f.name.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        let has_key_field = ["email", "mail", "message", "content"]
            .iter()
            .any(|k| names.contains(k))
            || analysis.fields.iter().any(|f| {
                matches!(f.purpose, FieldPurpose::Email | FieldPurpose::Message)
            });
        if has_key_field {
            score += 20.0;
        }

        if analysis.captcha.is_none() {
            score += 20.0;
        } else {
            score -= 10.0;
        }

        match analysis.submission_type {
            SubmissionType::Standard => score += 10.0,
            SubmissionType::Ajax => score += 5.0,
            SubmissionType::Javascript => score -= 5.0,
        }

        if !analysis.hidden_fields.is_empty() {
            score += 10.0;
        }

        clamp_confidence(score)
    }
}
