//! Shared types for form discovery and submission.
//!
//! The structures here travel between the locator, analyzer, strategy engine
//! and orchestrator. A `FormAnalysis` is always built fresh from a re-fetched
//! page, so hidden-field values (CSRF tokens in particular) are never reused
//! across submission attempts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What a form field is for, inferred from its name/id/placeholder/label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPurpose {
    /// Sender email address
    Email,
    /// Sender name
    Name,
    /// Company/organization name
    Company,
    /// Phone number
    Phone,
    /// Inquiry body text
    Message,
    /// Subject/title line
    Subject,
    /// Could not be classified; still submittable
    Unknown,
}

impl fmt::Display for FieldPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Email => "email",
            Self::Name => "name",
            Self::Company => "company",
            Self::Phone => "phone",
            Self::Message => "message",
            Self::Subject => "subject",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A single submittable field of a discovered form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    /// The `name` attribute used on submission
    pub name: String,
    /// Inferred purpose
    pub purpose: FieldPurpose,
    /// Normalized input type (`text`, `email`, `tel`, `textarea`, `select`, ...)
    pub input_type: String,
    /// Whether the field carries `required`/`aria-required`
    pub required: bool,
    /// Placeholder text, if any
    pub placeholder: Option<String>,
    /// CSS selector usable by browser automation
    pub selector: String,
}

/// CAPTCHA flavor detected on a form page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaKind {
    /// reCAPTCHA v2 checkbox widget
    RecaptchaV2,
    /// reCAPTCHA v3 invisible/execute variant
    RecaptchaV3,
    /// hCaptcha widget
    Hcaptcha,
    /// Generic image CAPTCHA
    Image,
}

impl fmt::Display for CaptchaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RecaptchaV2 => "recaptcha_v2",
            Self::RecaptchaV3 => "recaptcha_v3",
            Self::Hcaptcha => "hcaptcha",
            Self::Image => "image",
        };
        write!(f, "{s}")
    }
}

/// How the page submits its form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionType {
    /// Plain POST/GET to the form action
    Standard,
    /// Script-driven XHR/fetch submission
    Ajax,
    /// `javascript:` handler submission
    Javascript,
}

/// Structured description of a discovered form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormAnalysis {
    /// Page URL the form was found on
    pub url: String,
    /// Resolved absolute action URL; `None` means self-submission
    pub action: Option<String>,
    /// HTTP method, uppercased (`POST` default)
    pub method: String,
    /// Submittable fields (submit/button/reset/image inputs excluded)
    pub fields: Vec<FormField>,
    /// Hidden inputs captured verbatim, echoed back on submission
    pub hidden_fields: BTreeMap<String, String>,
    /// CAPTCHA detected on the page, if any
    pub captcha: Option<CaptchaKind>,
    /// Detected submission mechanism
    pub submission_type: SubmissionType,
    /// Analysis confidence in [0,1]
    pub confidence: f32,
    /// Human-readable problems noticed during analysis
    pub issues: Vec<String>,
}

impl FormAnalysis {
    /// Whether the form is protected by a CAPTCHA.
    #[must_use]
    pub fn has_captcha(&self) -> bool {
        self.captcha.is_some()
    }

    /// The URL a standard submission should target.
    #[must_use]
    pub fn submit_url(&self) -> &str {
        self.action.as_deref().unwrap_or(&self.url)
    }

    /// Names of all required fields.
    #[must_use]
    pub fn required_field_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.clone())
            .collect()
    }

    /// First field matching the given purpose.
    #[must_use]
    pub fn field_for(&self, purpose: FieldPurpose) -> Option<&FormField> {
        self.fields.iter().find(|f| f.purpose == purpose)
    }
}

/// Unified response shape scored by the verifier, regardless of whether the
/// submission went over plain HTTP or through the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormResponse {
    /// HTTP status code (browser submissions report 200 when the page loads)
    pub http_status: u16,
    /// Final URL after redirects
    pub final_url: String,
    /// Response body
    pub body: String,
}

/// Transport that ultimately carried a submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMethod {
    /// Plain POST/GET to the form action
    Standard,
    /// Direct request to a discovered AJAX endpoint
    Ajax,
    /// Standard submission augmented with extracted CSRF tokens
    Csrf,
    /// Multi-page wizard driven through the browser
    MultiStep,
    /// Full browser automation fallback
    Browser,
}

impl fmt::Display for SubmissionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Standard => "standard",
            Self::Ajax => "ajax",
            Self::Csrf => "csrf",
            Self::MultiStep => "multi_step",
            Self::Browser => "browser",
        };
        write!(f, "{s}")
    }
}

/// Final result of one orchestrated submission. Exactly one of these is
/// produced per call, even when multiple internal attempts occurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    /// Heuristic success verdict (`confidence >= 0.30`)
    pub success: bool,
    /// Verification confidence in [0,1]
    pub confidence: f32,
    /// Positive verification signals
    pub indicators: Vec<String>,
    /// Negative/ambiguous verification signals
    pub warnings: Vec<String>,
    /// Status of the winning response, if any attempt produced one
    pub http_status: Option<u16>,
    /// Final URL of the winning response
    pub response_url: Option<String>,
    /// Transport that carried the winning attempt
    pub submission_method: SubmissionMethod,
    /// Whether CSRF tokens were merged into the payload
    pub csrf_used: bool,
    /// Whether the form was detected as a multi-page wizard
    pub multi_step: bool,
    /// Retries performed beyond the first attempt
    pub retry_count: u32,
    /// One entry per failed/retried attempt
    pub retry_errors: Vec<String>,
}

/// Outcome category reported to bulk callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Verified as successful
    Success,
    /// Completed but not verified as successful
    Failed,
    /// Diverted to the manual CAPTCHA queue
    CaptchaBlocked,
    /// Form page could not be fetched
    FetchError,
    /// Unexpected infrastructure failure
    Error,
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::CaptchaBlocked => "captcha_blocked",
            Self::FetchError => "fetch_error",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Clamp a raw additive score (accumulated in percentage points) to [0,1].
#[must_use]
pub fn clamp_confidence(raw_points: f32) -> f32 {
    (raw_points / 100.0).clamp(0.0, 1.0)
}
