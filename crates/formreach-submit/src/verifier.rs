//! Submission success verification.
//!
//! There is no transactional acknowledgment for a contact-form submission,
//! so success is estimated from the response: HTTP status, URL movement,
//! bilingual success/error keywords, and whether a form is still present.
//! Scoring is purely a function of its inputs - identical inputs always
//! yield identical output - and the acceptance threshold is deliberately
//! lenient because many legitimate confirmation pages carry weak signal.

use formreach_core::types::{clamp_confidence, FormResponse};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Bilingual keywords that indicate an accepted submission.
const SUCCESS_KEYWORDS: &[&str] = &[
    // English
    "thank you",
    "thanks",
    "success",
    "successful",
    "submitted",
    "received",
    "sent",
    "confirmed",
    "completed",
    "appreciate",
    // Japanese
    "ありがとう",
    "ありがとうございました",
    "ありがとうございます",
    "完了",
    "送信完了",
    "送信しました",
    "受け付けました",
    "受け付け",
    "受信",
    "確認",
    "登録完了",
    "申し込み完了",
    "処理完了",
    "手続き完了",
];

/// Bilingual keywords that indicate rejection or a validation failure.
const ERROR_KEYWORDS: &[&str] = &[
    "error",
    "fail",
    "failed",
    "invalid",
    "incorrect",
    "problem",
    "エラー",
    "失敗",
    "不正",
    "無効",
    "問題",
    "入力してください",
];

/// Words that mark a page as a confirmation page even when a form remains.
const CONFIRMATION_WORDS: &[&str] = &["thank", "complete", "success", "confirm", "確認", "完了"];

fn validation_error_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"required", r"必須.*入力", r"please\s+enter", r"invalid\s+email"]
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).expect("valid regex"))
            .collect()
    })
}

fn success_url_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"/thanks?",
            r"/thank[-_]you",
            r"/success",
            r"/complete",
            r"/confirmation",
            r"/完了",
            r"/送信完了",
        ]
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("valid regex"))
        .collect()
    })
}

/// Verdict over a single submission response.
#[derive(Debug, Clone)]
pub struct Verification {
    /// `confidence >= threshold`
    pub success: bool,
    /// Clamped to [0,1]
    pub confidence: f32,
    /// Positive signals observed
    pub indicators: Vec<String>,
    /// Negative/ambiguous signals observed
    pub warnings: Vec<String>,
}

/// Scores confidence that a response represents a successful submission.
#[derive(Debug, Clone)]
pub struct SubmissionVerifier {
    success_threshold: f32,
}

impl Default for SubmissionVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionVerifier {
    /// Verifier with the standard 0.30 acceptance threshold.
    #[must_use]
    pub fn new() -> Self {
        Self {
            success_threshold: 0.30,
        }
    }

    /// Override the acceptance threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Score a response. Deterministic: no time or state dependency.
    #[must_use]
    pub fn verify(
        &self,
        response: &FormResponse,
        _submitted_data: &BTreeMap<String, String>,
        original_url: &str,
    ) -> Verification {
        let mut confidence = 0.0f32;
        let mut indicators = Vec::new();
        let mut warnings = Vec::new();

        let content_lower = response.body.to_lowercase();

        // HTTP status
        match response.http_status {
            200..=299 => {
                indicators.push(format!("HTTP {}", response.http_status));
                confidence += 30.0;
            }
            300..=399 => {
                indicators.push(format!("HTTP {} (redirect)", response.http_status));
                confidence += 20.0;
            }
            status => {
                warnings.push(format!("HTTP {status} (error)"));
                confidence -= 40.0;
            }
        }

        // URL movement
        if response.final_url != original_url {
            indicators.push("URL changed".to_string());
            confidence += 10.0;

            if let Some(pattern) = success_url_patterns()
                .iter()
                .find(|p| p.is_match(&response.final_url))
            {
                indicators.push(format!("Success URL pattern: {}", pattern.as_str()));
                confidence += 25.0;
            }
        }

        // Success keywords
        let found_success: Vec<&str> = SUCCESS_KEYWORDS
            .iter()
            .filter(|kw| content_lower.contains(&kw.to_lowercase()))
            .copied()
            .collect();
        if !found_success.is_empty() {
            confidence += (found_success.len() as f32 * 10.0).min(40.0);
            indicators.push(format!(
                "Success keywords: {}",
                found_success[..found_success.len().min(3)].join(", ")
            ));
        }

        // Error keywords
        let found_errors: Vec<&str> = ERROR_KEYWORDS
            .iter()
            .filter(|kw| content_lower.contains(&kw.to_lowercase()))
            .copied()
            .collect();
        if !found_errors.is_empty() {
            confidence -= (found_errors.len() as f32 * 10.0).min(40.0);
            warnings.push(format!(
                "Error keywords: {}",
                found_errors[..found_errors.len().min(3)].join(", ")
            ));
        }

        // Validation errors
        if validation_error_patterns()
            .iter()
            .any(|p| p.is_match(&response.body))
        {
            confidence -= 30.0;
            warnings.push("Validation error detected".to_string());
        }

        // A form still present is context-sensitive
        if content_lower.contains("<form") {
            if CONFIRMATION_WORDS.iter().any(|w| content_lower.contains(w)) {
                indicators.push("Form on confirmation page (expected)".to_string());
                confidence += 10.0;
            } else if response.final_url == original_url {
                confidence -= 25.0;
                warnings.push("Form still present on same page".to_string());
            } else if response.final_url.to_lowercase().contains("error") {
                confidence -= 30.0;
                warnings.push("Form on error page".to_string());
            } else {
                confidence -= 5.0;
                warnings.push("Form still present".to_string());
            }
        }

        let confidence = clamp_confidence(confidence);
        let success = confidence >= self.success_threshold;

        tracing::debug!(
            "Verification: {} (confidence {:.2}) for {}",
            if success { "success" } else { "not verified" },
            confidence,
            response.final_url
        );

        Verification {
            success,
            confidence,
            indicators,
            warnings,
        }
    }
}
