//! Form candidates and their scoring.
//!
//! A `FormCandidate` is ephemeral: produced while examining a page, consumed
//! when the locator picks a winner, never persisted.

use regex::Regex;
use scraper::{ElementRef, Selector};
use std::sync::OnceLock;

/// Anchor-text keywords that suggest a contact page, bilingual.
pub const CONTACT_KEYWORDS: &[&str] = &[
    "お問い合わせ",
    "お問合せ",
    "問い合わせ",
    "ご相談",
    "相談",
    "お申し込み",
    "資料請求",
    "お見積り",
    "コンタクト",
    "contact",
    "inquiry",
    "inquire",
    "get in touch",
    "contact us",
    "send message",
    "consultation",
    "quote",
    "estimate",
];

fn contact_url_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"/contact/?$",
            r"/contact\.(?:html?|php|aspx)/?$",
            r"/contact[-_]?us/?$",
            r"/contact[-_]?form/?$",
            r"/inquiry\d*/?$",
            r"/inquiry\d*\.(?:html?|php|aspx)/?$",
            r"/inquiry[-_]?form/?$",
            r"/form/?$",
            r"/form\.(?:html?|php)/?$",
            r"お問い合わせ",
            r"問い合わせ",
            r"otoiawase",
            r"toiawase",
            r"soudan",
            r"\?.*(?:inquiry|contact|form|CNo|uid)",
        ]
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("valid regex"))
        .collect()
    })
}

fn exclude_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"login",
            r"signin",
            r"sign-in",
            r"ログイン",
            r"password",
            r"パスワード",
            r"search",
            r"検索",
            r"newsletter",
            r"subscribe",
            r"メルマガ",
            r"購読",
            r"cart",
            r"checkout",
            r"カート",
        ]
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("valid regex"))
        .collect()
    })
}

fn field_pattern(purpose: &str) -> &'static Vec<Regex> {
    static EMAIL: OnceLock<Vec<Regex>> = OnceLock::new();
    static PHONE: OnceLock<Vec<Regex>> = OnceLock::new();
    static NAME: OnceLock<Vec<Regex>> = OnceLock::new();
    static COMPANY: OnceLock<Vec<Regex>> = OnceLock::new();
    static MESSAGE: OnceLock<Vec<Regex>> = OnceLock::new();
    static SUBJECT: OnceLock<Vec<Regex>> = OnceLock::new();

    let compile = |patterns: &[&str]| {
        patterns
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).expect("valid regex"))
            .collect::<Vec<_>>()
    };

    match purpose {
        "email" => EMAIL.get_or_init(|| compile(&["email", "e-mail", "mail", "メール"])),
        "phone" => PHONE.get_or_init(|| compile(&["phone", "tel", "mobile", "電話", "携帯"])),
        "name" => NAME.get_or_init(|| compile(&["name", "名前", "氏名", "お名前"])),
        "company" => COMPANY.get_or_init(|| compile(&["company", "organization", "会社", "企業"])),
        "message" => MESSAGE.get_or_init(|| {
            compile(&[
                "message",
                "comment",
                "content",
                "inquiry",
                "メッセージ",
                "内容",
                "本文",
            ])
        }),
        _ => SUBJECT.get_or_init(|| compile(&["subject", "title", "件名", "タイトル"])),
    }
}

/// Whether a URL path+query looks like a contact page.
#[must_use]
pub fn is_contact_shaped_url(path_and_query: &str) -> bool {
    contact_url_patterns()
        .iter()
        .any(|p| p.is_match(path_and_query))
}

/// Whether link text reads like a contact link.
#[must_use]
pub fn is_contact_link_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    CONTACT_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// A contact form candidate found on one page.
#[derive(Debug, Clone)]
pub struct FormCandidate {
    /// Page URL the form lives on
    pub url: String,
    /// How the page was reached
    pub detection_method: String,
    /// Normalized score in [0,1]
    pub score: f32,

    pub has_email_field: bool,
    pub has_phone_field: bool,
    pub has_name_field: bool,
    pub has_message_field: bool,
    pub has_company_field: bool,
    pub has_subject_field: bool,

    pub form_method: String,
    pub submit_button_text: Option<String>,
    pub text_fields: usize,
    pub textareas: usize,
    pub required_fields: usize,
    pub keywords_found: usize,
}

impl FormCandidate {
    /// Build a candidate from a `<form>` element, or `None` for forms that
    /// are clearly not inquiry forms (login, search, newsletter, cart).
    #[must_use]
    pub fn from_form(url: &str, form: &ElementRef<'_>, detection_method: &str) -> Option<Self> {
        let form_html = form.html().to_lowercase();
        if exclude_patterns().iter().any(|p| p.is_match(&form_html)) {
            return None;
        }

        let mut candidate = Self {
            url: url.to_string(),
            detection_method: detection_method.to_string(),
            score: 0.0,
            has_email_field: false,
            has_phone_field: false,
            has_name_field: false,
            has_message_field: false,
            has_company_field: false,
            has_subject_field: false,
            form_method: form
                .value()
                .attr("method")
                .unwrap_or("GET")
                .to_uppercase(),
            submit_button_text: None,
            text_fields: 0,
            textareas: 0,
            required_fields: 0,
            keywords_found: 0,
        };

        candidate.analyze_fields(form);
        candidate.analyze_submit_button(form);
        candidate.count_keywords(form);

        Some(candidate)
    }

    fn analyze_fields(&mut self, form: &ElementRef<'_>) {
        let selector = Selector::parse("input, textarea, select").expect("valid selector");

        for field in form.select(&selector) {
            let tag = field.value().name();
            let field_type = field.value().attr("type").unwrap_or("text").to_lowercase();
            let descriptor = format!(
                "{} {} {}",
                field.value().attr("name").unwrap_or(""),
                field.value().attr("id").unwrap_or(""),
                field.value().attr("placeholder").unwrap_or("")
            )
            .to_lowercase();

            let matches = |purpose: &str| {
                field_pattern(purpose)
                    .iter()
                    .any(|p| p.is_match(&descriptor))
            };

            if field_type == "email" || matches("email") {
                self.has_email_field = true;
            } else if field_type == "tel" || matches("phone") {
                self.has_phone_field = true;
            } else if matches("company") {
                self.has_company_field = true;
            } else if matches("subject") {
                self.has_subject_field = true;
            } else if matches("name") {
                self.has_name_field = true;
            }

            if tag == "textarea" || matches("message") {
                self.has_message_field = true;
            }

            if tag == "textarea" {
                self.textareas += 1;
            } else if matches!(field_type.as_str(), "text" | "email" | "tel" | "url") {
                self.text_fields += 1;
            }

            if field.value().attr("required").is_some()
                || field.value().attr("aria-required").is_some()
            {
                self.required_fields += 1;
            }
        }
    }

    fn analyze_submit_button(&mut self, form: &ElementRef<'_>) {
        let selector =
            Selector::parse("button, input[type='submit'], input[type='button']")
                .expect("valid selector");

        for button in form.select(&selector) {
            let text = if button.value().name() == "button" {
                button.text().collect::<String>().trim().to_string()
            } else {
                button.value().attr("value").unwrap_or("").trim().to_string()
            };
            if !text.is_empty() {
                self.submit_button_text = Some(text);
                break;
            }
        }
    }

    fn count_keywords(&mut self, form: &ElementRef<'_>) {
        let text = form.text().collect::<String>().to_lowercase();
        self.keywords_found = CONTACT_KEYWORDS
            .iter()
            .filter(|k| text.contains(*k))
            .count();
    }
}

/// Score candidates additively and sort best-first.
///
/// Lenient by intent: any surviving form keeps a nonzero floor so a site's
/// only form is never rejected outright.
pub fn score_candidates(mut candidates: Vec<FormCandidate>) -> Vec<FormCandidate> {
    for candidate in &mut candidates {
        let mut score = 10.0f32;

        if candidate.has_email_field {
            score += 30.0;
        }
        if candidate.has_message_field {
            score += 25.0;
        }
        if candidate.has_name_field {
            score += 15.0;
        }
        if candidate.has_phone_field {
            score += 10.0;
        }
        if candidate.has_company_field {
            score += 8.0;
        }
        if candidate.has_subject_field {
            score += 5.0;
        }

        if candidate.text_fields >= 1 {
            score += 8.0;
        }
        if candidate.textareas >= 1 {
            score += 5.0;
        }

        score += (candidate.keywords_found as f32 * 5.0).min(20.0);

        let url_lower = candidate.url.to_lowercase();
        if ["contact", "inquiry", "form", "otoiawase", "toiawase"]
            .iter()
            .any(|w| url_lower.contains(w))
        {
            score += 25.0;
        }

        if let Some(button) = &candidate.submit_button_text {
            let button_lower = button.to_lowercase();
            if ["send", "送信", "submit", "確認", "confirm"]
                .iter()
                .any(|w| button_lower.contains(w))
            {
                score += 15.0;
            }
        }

        if candidate.form_method == "POST" {
            score += 10.0;
        }
        if candidate.required_fields >= 2 {
            score += 8.0;
        }

        // Fixed-path and pattern-matched discovery is far stronger evidence
        // than stumbling over a form mid-crawl
        score += match candidate.detection_method.as_str() {
            "site_crawl" => 20.0,
            _ => 40.0,
        };

        candidate.score = (score / 100.0).clamp(0.1, 1.0);
    }

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}
