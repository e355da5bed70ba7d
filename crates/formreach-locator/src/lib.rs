//! Contact form discovery.
//!
//! Finds the business-inquiry form of a site through a prioritized cascade:
//! fixed-path probes (two tiers), a homepage scan for parameter-carrying
//! contact links, two more probe tiers, and finally a bounded same-domain
//! crawl. Every probe passes the robots policy first, and each tier
//! short-circuits on its first hit.

pub mod candidate;
pub mod cascade;
pub mod crawler;

pub use candidate::{score_candidates, FormCandidate};
pub use cascade::{DetectionMethod, FormLocator, LocatedForm};
