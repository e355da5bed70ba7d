//! Submission pipeline: strategy execution, retries, verification,
//! CAPTCHA queueing, and orchestration.
//!
//! The orchestrator composes the locator, analyzer and the components here:
//! locate -> analyze (re-fetched per call) -> CAPTCHA short-circuit to the
//! manual queue -> normalize caller data -> retry-wrapped strategy execution
//! -> verification -> audit persistence -> per-domain throttling. Expected
//! business outcomes (no form, CAPTCHA, low confidence) are result variants,
//! never errors.

pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod retry;
pub mod strategy;
pub mod transport;
pub mod verifier;

pub use error::{Result, SubmitError};
pub use orchestrator::{
    BulkOutcome, BulkTarget, InquiryRequest, SubmissionReport, SubmissionService,
};
pub use queue::{CaptchaQueue, CaptchaQueueEntry, NewCaptchaEntry, QueueStatus};
pub use retry::{RetryCoordinator, RetryOutcome, RetryPolicy, RetryTrigger};
pub use strategy::{StrategyEngine, StrategyResponse};
pub use transport::{HttpMethod, HttpTransport, ReqwestTransport, TransportError, TransportRequest};
pub use verifier::{SubmissionVerifier, Verification};
