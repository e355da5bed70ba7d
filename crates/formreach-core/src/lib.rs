//! Formreach core - shared types, errors, and configuration.
//!
//! This crate defines the data model shared by every other workspace member:
//! form analyses, submission results, the error taxonomy, and the TOML-based
//! application configuration.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{ConfigError, ConfigResult, FormreachError, Result};
pub use types::{
    CaptchaKind, FieldPurpose, FormAnalysis, FormField, FormResponse, SubmissionMethod,
    SubmissionResult, SubmissionStatus, SubmissionType,
};

/// Extract the `scheme://host` base of a URL, used as the throttling and
/// serialization key for a destination site.
pub fn site_key(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| FormreachError::Validation(format!("invalid URL '{raw}': {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| FormreachError::Validation(format!("no host in URL '{raw}'")))?;
    Ok(format!("{}://{host}", parsed.scheme()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_key() {
        assert_eq!(
            site_key("https://example.jp/contact/form?x=1").unwrap(),
            "https://example.jp"
        );
        assert_eq!(
            site_key("http://sub.example.com:8080/").unwrap(),
            "http://sub.example.com"
        );
    }

    #[test]
    fn test_site_key_invalid() {
        assert!(site_key("not-a-url").is_err());
    }
}
