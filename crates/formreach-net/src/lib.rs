//! Page fetching and robots.txt policy checking.
//!
//! The fetcher follows redirects, applies a configurable user agent and
//! timeout, and performs its own bounded retry for 429/5xx and transport
//! failures. The robots checker caches one ruleset per domain and is
//! consulted before every locator probe.

pub mod error;
pub mod fetcher;
pub mod robots;

pub use error::{FetchError, Result};
pub use fetcher::{FetchedPage, PageFetch, PageFetcher};
pub use robots::{RobotsChecker, RobotsPolicy};
