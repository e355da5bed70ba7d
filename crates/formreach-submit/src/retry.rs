//! Retry coordination around the strategy engine.
//!
//! Wraps an attempt function with bounded retries and exponential backoff,
//! tracking the highest-confidence verified response across attempts so the
//! caller always receives the best evidence gathered, even after exhaustion.
//! The retry decision itself is a single predicate (`RetryPolicy::decide`)
//! unifying the status-based and confidence-based triggers, testable without
//! any transport.

use crate::error::SubmitError;
use crate::strategy::StrategyResponse;
use crate::verifier::{SubmissionVerifier, Verification};
use formreach_core::config::RetryConfig;
use formreach_core::types::FormResponse;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// HTTP statuses worth another attempt.
const RETRYABLE_STATUS_CODES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Why an attempt should be retried.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryTrigger {
    /// Transient HTTP status (408/429/5xx)
    Status(u16),
    /// Verified 2xx whose confidence is too low to accept - ambiguous,
    /// worth another attempt rather than an immediate failure
    LowConfidence(f32),
}

impl RetryTrigger {
    /// Human-readable reason recorded in `retry_errors`.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Status(status) => format!("HTTP {status} (retryable)"),
            Self::LowConfidence(confidence) => {
                format!("Low verification confidence ({confidence:.2})")
            }
        }
    }
}

/// Retry tunables, injected at construction.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries beyond the first attempt
    pub max_retries: u32,
    /// Base backoff delay
    pub base_delay: Duration,
    /// Backoff multiplier per retry
    pub backoff_multiplier: f64,
    /// Confidence floor below which a 2xx is treated as ambiguous
    pub ambiguous_confidence_floor: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Build a policy from configuration.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs_f64(config.base_delay_secs),
            backoff_multiplier: config.backoff_multiplier,
            ambiguous_confidence_floor: config.ambiguous_confidence_floor,
        }
    }

    /// Backoff before retry number `retry` (1-based):
    /// `base * multiplier^(retry - 1)`.
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry.saturating_sub(1) as i32);
        self.base_delay.mul_f64(factor)
    }

    /// The unified "is this response worth retrying" predicate.
    #[must_use]
    pub fn decide(
        &self,
        response: &FormResponse,
        verification: &Verification,
    ) -> Option<RetryTrigger> {
        if RETRYABLE_STATUS_CODES.contains(&response.http_status) {
            return Some(RetryTrigger::Status(response.http_status));
        }

        if (200..300).contains(&response.http_status)
            && verification.confidence < self.ambiguous_confidence_floor
        {
            return Some(RetryTrigger::LowConfidence(verification.confidence));
        }

        None
    }
}

/// What the coordinator hands back to the orchestrator.
#[derive(Debug)]
pub struct RetryOutcome {
    /// Best response gathered, with its verification; `None` when every
    /// attempt failed without producing a scorable response
    pub best: Option<(StrategyResponse, Verification)>,
    /// Retries performed beyond the first attempt
    pub retry_count: u32,
    /// One entry per failed or retried attempt
    pub retry_errors: Vec<String>,
    /// The error that ended the loop, when no response won
    pub last_error: Option<SubmitError>,
}

/// Drives the strategy engine through bounded retries.
pub struct RetryCoordinator {
    policy: RetryPolicy,
    verifier: SubmissionVerifier,
}

impl RetryCoordinator {
    /// Create a coordinator with the given policy and verifier.
    #[must_use]
    pub fn new(policy: RetryPolicy, verifier: SubmissionVerifier) -> Self {
        Self { policy, verifier }
    }

    /// Run `attempt_fn` until a response is accepted, a non-retryable error
    /// aborts the loop, or retries are exhausted. The attempt function
    /// receives the 0-based attempt number.
    pub async fn run<F, Fut>(
        &self,
        original_url: &str,
        submitted_data: &BTreeMap<String, String>,
        mut attempt_fn: F,
    ) -> RetryOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<StrategyResponse, SubmitError>>,
    {
        let mut best: Option<(StrategyResponse, Verification)> = None;
        let mut retry_errors = Vec::new();
        let mut retry_count = 0;
        let mut last_error = None;

        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                let delay = self.policy.backoff_delay(attempt);
                tracing::info!(
                    "Retry {}/{} after {:?}",
                    attempt,
                    self.policy.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
                retry_count = attempt;
            }

            match attempt_fn(attempt).await {
                Ok(outcome) => {
                    let verification =
                        self.verifier
                            .verify(&outcome.response, submitted_data, original_url);

                    match self.policy.decide(&outcome.response, &verification) {
                        None => {
                            // Accepted: this response wins outright
                            if attempt > 0 {
                                tracing::info!(
                                    "Succeeded on retry #{} (confidence {:.2})",
                                    attempt,
                                    verification.confidence
                                );
                            }
                            return RetryOutcome {
                                best: Some((outcome, verification)),
                                retry_count,
                                retry_errors,
                                last_error: None,
                            };
                        }
                        Some(trigger @ RetryTrigger::Status(_)) => {
                            tracing::warn!("{}", trigger.reason());
                            retry_errors.push(trigger.reason());
                        }
                        Some(trigger @ RetryTrigger::LowConfidence(_)) => {
                            // Ambiguous 2xx: keep it as evidence either way
                            if best
                                .as_ref()
                                .map_or(true, |(_, v)| verification.confidence > v.confidence)
                            {
                                best = Some((outcome, verification));
                            }
                            if attempt < self.policy.max_retries {
                                tracing::warn!("{} - will retry", trigger.reason());
                                retry_errors.push(trigger.reason());
                            }
                        }
                    }
                }
                Err(error) => {
                    retry_errors.push(error.to_string());
                    if error.is_retryable() && attempt < self.policy.max_retries {
                        tracing::warn!("Retryable attempt failure: {}", error);
                        last_error = Some(error);
                    } else {
                        // Non-retryable (or exhausted): abort, surfacing the
                        // best response recorded so far
                        tracing::error!("Attempt failed without retry: {}", error);
                        last_error = Some(error);
                        break;
                    }
                }
            }
        }

        RetryOutcome {
            best,
            retry_count,
            retry_errors,
            last_error,
        }
    }
}
