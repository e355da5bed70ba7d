//! Field value normalization.
//!
//! Formats caller-supplied values to the conventions contact forms expect:
//! lowercased emails, hyphenated Japanese phone numbers, collapsed
//! whitespace in names, preserved corporate abbreviations, and normalized
//! line breaks in message bodies. Japanese text is passed through untouched.

use formreach_core::types::FieldPurpose;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn cjk_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\u{3040}-\u{309F}\u{30A0}-\u{30FF}\u{4E00}-\u{9FAF}]").expect("valid regex")
    })
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid regex")
    })
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

fn blank_lines_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("valid regex"))
}

/// Corporate abbreviations kept uppercase when capitalizing company names.
const COMPANY_ABBREVIATIONS: &[&str] = &["LLC", "INC", "LTD", "CORP", "CO", "KK"];

/// Formats submitted values to expected conventions. Stateless.
#[derive(Debug, Default)]
pub struct FieldNormalizer;

impl FieldNormalizer {
    /// Create a new normalizer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Normalize one value according to the field's purpose.
    #[must_use]
    pub fn normalize(&self, purpose: FieldPurpose, value: &str) -> String {
        match purpose {
            FieldPurpose::Email => Self::format_email(value),
            FieldPurpose::Phone => Self::format_phone(value),
            FieldPurpose::Name => Self::format_name(value),
            FieldPurpose::Company => Self::format_company(value),
            FieldPurpose::Message => Self::format_message(value),
            FieldPurpose::Subject | FieldPurpose::Unknown => value.trim().to_string(),
        }
    }

    /// Normalize a whole payload in place given each field's purpose.
    pub fn normalize_payload(
        &self,
        data: &mut BTreeMap<String, String>,
        purposes: &BTreeMap<String, FieldPurpose>,
    ) {
        for (name, value) in data.iter_mut() {
            if let Some(purpose) = purposes.get(name) {
                *value = self.normalize(*purpose, value);
            }
        }
    }

    fn format_email(email: &str) -> String {
        let mut email = email.trim().to_lowercase();
        if !email_regex().is_match(&email) {
            tracing::warn!("Unexpected email format: {}", email);
            email = email.replace(' ', "");
        }
        email
    }

    /// Hyphenate phone numbers the way Japanese forms expect; values that
    /// defy recognition are returned unchanged.
    fn format_phone(phone: &str) -> String {
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();

        // +81 country-code form: strip the code and re-prefix the leading zero
        if digits.starts_with("81") && (11..=12).contains(&digits.len()) {
            let local = &digits[2..];
            match local.len() {
                9 => return format!("0{}-{}-{}", &local[..1], &local[1..5], &local[5..]),
                10 => return format!("0{}-{}-{}", &local[..2], &local[2..6], &local[6..]),
                _ => {}
            }
        }

        match digits.len() {
            // Landline: 03-1234-5678
            10 => format!("{}-{}-{}", &digits[..2], &digits[2..6], &digits[6..]),
            // Mobile: 090-1234-5678
            11 => format!("{}-{}-{}", &digits[..3], &digits[3..7], &digits[7..]),
            _ => phone.to_string(),
        }
    }

    fn format_name(name: &str) -> String {
        let name = whitespace_regex().replace_all(name.trim(), " ").to_string();

        if cjk_regex().is_match(&name) {
            return name;
        }

        name.split(' ')
            .map(Self::capitalize)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn format_company(company: &str) -> String {
        let company = whitespace_regex()
            .replace_all(company.trim(), " ")
            .to_string();

        if cjk_regex().is_match(&company) {
            return company;
        }

        company
            .split(' ')
            .map(|part| {
                let stripped = part.trim_matches(|c: char| !c.is_alphanumeric());
                if COMPANY_ABBREVIATIONS.contains(&stripped.to_uppercase().as_str()) {
                    part.to_uppercase()
                } else {
                    Self::capitalize(part)
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn format_message(message: &str) -> String {
        let message = message.replace("\r\n", "\n").replace('\r', "\n");
        blank_lines_regex()
            .replace_all(&message, "\n\n")
            .trim()
            .to_string()
    }

    fn capitalize(word: &str) -> String {
        let mut chars = word.chars();
        match chars.next() {
            Some(first) => {
                first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
            }
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_lowercased_and_trimmed() {
        let n = FieldNormalizer::new();
        assert_eq!(
            n.normalize(FieldPurpose::Email, "  Taro@Example.JP "),
            "taro@example.jp"
        );
    }

    #[test]
    fn test_email_spaces_stripped_when_invalid() {
        let n = FieldNormalizer::new();
        assert_eq!(
            n.normalize(FieldPurpose::Email, "taro @example.jp"),
            "taro@example.jp"
        );
    }

    #[test]
    fn test_phone_landline() {
        let n = FieldNormalizer::new();
        assert_eq!(n.normalize(FieldPurpose::Phone, "0312345678"), "03-1234-5678");
    }

    #[test]
    fn test_phone_mobile() {
        let n = FieldNormalizer::new();
        assert_eq!(
            n.normalize(FieldPurpose::Phone, "090 1234 5678"),
            "090-1234-5678"
        );
    }

    #[test]
    fn test_phone_international() {
        let n = FieldNormalizer::new();
        assert_eq!(
            n.normalize(FieldPurpose::Phone, "+81312345678"),
            "03-1234-5678"
        );
    }

    #[test]
    fn test_phone_unrecognized_passes_through() {
        let n = FieldNormalizer::new();
        assert_eq!(n.normalize(FieldPurpose::Phone, "ext. 12"), "ext. 12");
    }

    #[test]
    fn test_name_capitalized() {
        let n = FieldNormalizer::new();
        assert_eq!(
            n.normalize(FieldPurpose::Name, "  taro   yamada "),
            "Taro Yamada"
        );
    }

    #[test]
    fn test_japanese_name_untouched() {
        let n = FieldNormalizer::new();
        assert_eq!(n.normalize(FieldPurpose::Name, "山田 太郎"), "山田 太郎");
    }

    #[test]
    fn test_company_abbreviations_preserved() {
        let n = FieldNormalizer::new();
        assert_eq!(
            n.normalize(FieldPurpose::Company, "acme trading llc"),
            "Acme Trading LLC"
        );
    }

    #[test]
    fn test_japanese_company_untouched() {
        let n = FieldNormalizer::new();
        assert_eq!(
            n.normalize(FieldPurpose::Company, "株式会社テスト"),
            "株式会社テスト"
        );
    }

    #[test]
    fn test_message_line_breaks_normalized() {
        let n = FieldNormalizer::new();
        assert_eq!(
            n.normalize(FieldPurpose::Message, "hello\r\n\r\n\r\n\r\nworld\r\n"),
            "hello\n\nworld"
        );
    }

    #[test]
    fn test_payload_normalization() {
        let n = FieldNormalizer::new();
        let mut data = BTreeMap::from([
            ("email".to_string(), "User@Example.JP".to_string()),
            ("token".to_string(), "KeepMe".to_string()),
        ]);
        let purposes = BTreeMap::from([("email".to_string(), FieldPurpose::Email)]);

        n.normalize_payload(&mut data, &purposes);

        assert_eq!(data["email"], "user@example.jp");
        // Fields without a known purpose are left as-is
        assert_eq!(data["token"], "KeepMe");
    }
}
