//! CAPTCHA detection, checked in priority order: reCAPTCHA v2 checkbox
//! markers, reCAPTCHA v3 invisible-execute markers, hCaptcha markers, then
//! a generic "captcha" + embedded image heuristic.

use formreach_core::types::CaptchaKind;
use regex::Regex;
use std::sync::OnceLock;

fn recaptcha_v2_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)recaptcha.*v2",
            // The widget class, not the unrelated *-responsive CSS class
            r#"(?i)g-recaptcha["'\s>]"#,
            r"(?i)grecaptcha\.render",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    })
}

fn recaptcha_v3_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)grecaptcha\.execute\(",
            r"(?i)recaptcha/api\.js\?render=",
            r"(?i)recaptcha.*v3",
            r"(?i)google\.recaptcha\.execute",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    })
}

fn hcaptcha_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"(?i)hcaptcha", r"(?i)h-captcha"]
            .iter()
            .map(|p| Regex::new(p).expect("valid regex"))
            .collect()
    })
}

/// Detect a CAPTCHA anywhere in the page.
///
/// Returns the detected kind and a human-readable issue line for the
/// analysis report.
#[must_use]
pub fn detect_captcha(html: &str) -> Option<(CaptchaKind, String)> {
    if recaptcha_v2_patterns().iter().any(|p| p.is_match(html)) {
        return Some((
            CaptchaKind::RecaptchaV2,
            "Has reCAPTCHA v2 - manual completion required".to_string(),
        ));
    }

    if recaptcha_v3_patterns().iter().any(|p| p.is_match(html)) {
        return Some((
            CaptchaKind::RecaptchaV3,
            "Has reCAPTCHA v3 - manual completion required".to_string(),
        ));
    }

    if hcaptcha_patterns().iter().any(|p| p.is_match(html)) {
        return Some((
            CaptchaKind::Hcaptcha,
            "Has hCaptcha - manual completion required".to_string(),
        ));
    }

    let lower = html.to_lowercase();
    if lower.contains("captcha")
        && (lower.contains("<img") || lower.contains(".jpg") || lower.contains(".png"))
    {
        return Some((
            CaptchaKind::Image,
            "Has image CAPTCHA - manual completion required".to_string(),
        ));
    }

    None
}
