//! Contact form analysis and field value normalization.
//!
//! The analyzer turns a fetched page into a structured `FormAnalysis`:
//! classified fields, captured hidden inputs, CAPTCHA presence, and the
//! inferred submission mechanism. The normalizer formats caller-supplied
//! values (email, phone, names) to the conventions Japanese and English
//! contact forms expect.

pub mod analyzer;
pub mod captcha;
pub mod normalize;

pub use analyzer::FormAnalyzer;
pub use captcha::detect_captcha;
pub use normalize::FieldNormalizer;
