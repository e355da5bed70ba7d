//! Browser automation for JavaScript-heavy contact forms.
//!
//! Exposes a narrow `BrowserAutomation` trait (render, fill-and-submit,
//! network capture) so the concrete renderer stays swappable and mockable;
//! decision logic about *when* to use the browser lives with the callers.

pub mod actions;
pub mod engine;
pub mod error;

pub use actions::{BrowserAutomation, BrowserSubmission};
pub use engine::ChromiumEngine;
pub use error::{BrowserError, Result};
