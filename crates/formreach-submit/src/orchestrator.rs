//! Submission orchestration.
//!
//! `SubmissionService` composes discovery, analysis, normalization, the
//! retry-wrapped strategy engine, verification, the CAPTCHA queue, and the
//! audit sink. Concurrency invariants: at most one in-flight submission per
//! destination site (a per-domain lock, which also serializes concurrent
//! callers targeting the same form URL), and a minimum delay between
//! submissions to the same site enforced before returning - bulk callers
//! need no sleep logic of their own.

use crate::error::SubmitError;
use crate::queue::{CaptchaQueue, NewCaptchaEntry, QueueStatus};
use crate::retry::RetryCoordinator;
use crate::strategy::StrategyEngine;
use formreach_browser::BrowserAutomation;
use formreach_core::config::ThrottleConfig;
use formreach_core::error::Result;
use formreach_core::site_key;
use formreach_core::types::{
    FieldPurpose, FormAnalysis, SubmissionMethod, SubmissionResult, SubmissionStatus,
};
use formreach_db::{submission_log, Database, SubmissionRecordInput};
use formreach_form::{FieldNormalizer, FormAnalyzer};
use formreach_locator::FormLocator;
use formreach_net::PageFetch;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio::time::Instant;

/// Inquiry body used when the caller provides none.
const DEFAULT_MESSAGE_TEMPLATE: &str = "こんにちは、

{company_name}の新製品・サービスについてお問い合わせさせていただきたくご連絡いたしました。

詳細につきましてはお手数ですが、お気軽にお問い合わせください。

よろしくお願いいたします。
";

/// One inquiry to submit.
#[derive(Debug, Clone)]
pub struct InquiryRequest {
    /// Contact form URL
    pub form_url: String,
    /// Target company name
    pub company_name: String,
    /// Sender email address
    pub sender_email: String,
    /// Sender name
    pub sender_name: String,
    /// Inquiry body; a default Japanese template is used when absent
    pub message_body: Option<String>,
    /// Sender phone number
    pub phone: Option<String>,
}

/// What one orchestrated submission produced. Exactly one report per call.
#[derive(Debug, Clone)]
pub struct SubmissionReport {
    /// The form URL targeted
    pub form_url: String,
    /// Outcome category
    pub status: SubmissionStatus,
    /// The submission result, when an attempt was actually made
    pub result: Option<SubmissionResult>,
    /// Whether the form was diverted to the CAPTCHA queue
    pub captcha_queued: bool,
    /// Error description for non-success outcomes
    pub error: Option<String>,
}

impl SubmissionReport {
    fn error_report(form_url: &str, status: SubmissionStatus, error: String) -> Self {
        Self {
            form_url: form_url.to_string(),
            status,
            result: None,
            captcha_queued: false,
            error: Some(error),
        }
    }
}

/// One target of a bulk run.
#[derive(Debug, Clone)]
pub struct BulkTarget {
    /// Site root URL
    pub url: String,
    /// Known form URL; discovered via the locator when absent
    pub form_url: Option<String>,
    /// Target company name
    pub company_name: String,
    /// Known contact email; with `skip_with_email` set, such targets are
    /// skipped since direct mail beats a form submission
    pub email: Option<String>,
}

/// Aggregated outcome of a bulk run.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    /// Per-target reports, in input order (skipped targets excluded)
    pub reports: Vec<SubmissionReport>,
    pub success: usize,
    pub failed: usize,
    pub captcha_blocked: usize,
    pub fetch_error: usize,
    pub error: usize,
}

impl BulkOutcome {
    fn tally(&mut self, report: &SubmissionReport) {
        match report.status {
            SubmissionStatus::Success => self.success += 1,
            SubmissionStatus::Failed => self.failed += 1,
            SubmissionStatus::CaptchaBlocked => self.captcha_blocked += 1,
            SubmissionStatus::FetchError => self.fetch_error += 1,
            SubmissionStatus::Error => self.error += 1,
        }
    }

    /// Number of targets actually processed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.reports.len()
    }
}

/// Minimum-delay pacing per destination site.
struct DomainThrottle {
    min_delay: Duration,
    last_submission: Mutex<HashMap<String, Instant>>,
}

impl DomainThrottle {
    fn new(config: &ThrottleConfig) -> Self {
        Self {
            min_delay: Duration::from_secs_f64(config.per_site_secs),
            last_submission: Mutex::new(HashMap::new()),
        }
    }

    /// Sleep out the remainder of the minimum delay since the previous
    /// submission to this site, then record now.
    async fn pace(&self, site: &str) {
        let wait = {
            let last = self.last_submission.lock().await;
            last.get(site)
                .and_then(|prev| self.min_delay.checked_sub(prev.elapsed()))
        };

        if let Some(wait) = wait {
            if !wait.is_zero() {
                tracing::info!("Throttling: waiting {:?} for {}", wait, site);
                tokio::time::sleep(wait).await;
            }
        }

        self.last_submission
            .lock()
            .await
            .insert(site.to_string(), Instant::now());
    }
}

/// Per-destination-site mutual exclusion. Holding a site's token serializes
/// concurrent submissions to that site (and therefore to any one form URL),
/// keeping throttling meaningful and CSRF re-fetches race-free.
struct DomainLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DomainLocks {
    fn new() -> Self {
        Self {
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, site: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("domain lock map poisoned");
            locks
                .entry(site.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// The submission orchestrator.
pub struct SubmissionService {
    fetcher: Arc<dyn PageFetch>,
    locator: FormLocator,
    analyzer: FormAnalyzer,
    normalizer: FieldNormalizer,
    strategy: StrategyEngine,
    retry: RetryCoordinator,
    browser: Option<Arc<dyn BrowserAutomation>>,
    browser_permits: Arc<Semaphore>,
    queue: Mutex<CaptchaQueue>,
    audit: Option<Arc<Database>>,
    throttle: DomainThrottle,
    domain_locks: DomainLocks,
}

impl SubmissionService {
    /// Assemble a service from its components.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn PageFetch>,
        locator: FormLocator,
        strategy: StrategyEngine,
        retry: RetryCoordinator,
        queue: CaptchaQueue,
        throttle_config: &ThrottleConfig,
    ) -> Self {
        Self {
            fetcher,
            locator,
            analyzer: FormAnalyzer::new(),
            normalizer: FieldNormalizer::new(),
            strategy,
            retry,
            browser: None,
            browser_permits: Arc::new(Semaphore::new(1)),
            queue: Mutex::new(queue),
            audit: None,
            throttle: DomainThrottle::new(throttle_config),
            domain_locks: DomainLocks::new(),
        }
    }

    /// Attach browser automation for render fallback, sharing the permit
    /// pool that bounds all browser work.
    #[must_use]
    pub fn with_browser(
        mut self,
        browser: Arc<dyn BrowserAutomation>,
        permits: Arc<Semaphore>,
    ) -> Self {
        self.browser = Some(browser);
        self.browser_permits = permits;
        self
    }

    /// Attach the audit sink.
    #[must_use]
    pub fn with_audit(mut self, db: Arc<Database>) -> Self {
        self.audit = Some(db);
        self
    }

    /// Submit one inquiry to a known form URL.
    ///
    /// Never returns an error for expected business outcomes: no form,
    /// CAPTCHA, and low confidence are all reported as status variants.
    pub async fn submit_inquiry(&self, request: InquiryRequest) -> SubmissionReport {
        let site = match site_key(&request.form_url) {
            Ok(site) => site,
            Err(e) => {
                return SubmissionReport::error_report(
                    &request.form_url,
                    SubmissionStatus::Error,
                    e.to_string(),
                );
            }
        };

        tracing::info!(
            "Submitting inquiry to {} for {}",
            request.form_url,
            request.company_name
        );

        let _token = self.domain_locks.acquire(&site).await;
        let report = self.submit_locked(&request, &site).await;

        // Pace the site before returning so bulk callers need no sleeps
        self.throttle.pace(&site).await;
        self.persist_audit(&request, &report).await;

        report
    }

    /// Locate a site's contact form, then submit to it.
    pub async fn discover_and_submit(
        &self,
        root_url: &str,
        company_name: &str,
        sender_email: &str,
        sender_name: &str,
        message_body: Option<String>,
        phone: Option<String>,
    ) -> SubmissionReport {
        match self.locator.locate(root_url).await {
            Ok(Some(located)) => {
                self.submit_inquiry(InquiryRequest {
                    form_url: located.form_url,
                    company_name: company_name.to_string(),
                    sender_email: sender_email.to_string(),
                    sender_name: sender_name.to_string(),
                    message_body,
                    phone,
                })
                .await
            }
            Ok(None) => SubmissionReport::error_report(
                root_url,
                SubmissionStatus::Failed,
                "no contact form found".to_string(),
            ),
            Err(e) => {
                SubmissionReport::error_report(root_url, SubmissionStatus::Error, e.to_string())
            }
        }
    }

    /// Submit inquiries to many targets, locating forms where necessary.
    /// Per-site throttling is applied automatically.
    pub async fn bulk_submit(
        &self,
        targets: Vec<BulkTarget>,
        sender_email: &str,
        sender_name: &str,
        skip_with_email: bool,
    ) -> BulkOutcome {
        let total = targets.len();
        tracing::info!("Bulk submission starting: {} targets", total);

        let mut outcome = BulkOutcome::default();

        for (i, target) in targets.into_iter().enumerate() {
            if skip_with_email && target.email.is_some() {
                tracing::info!(
                    "[{}/{}] Skipping {} - has email",
                    i + 1,
                    total,
                    target.company_name
                );
                continue;
            }

            tracing::info!("[{}/{}] Submitting to {}", i + 1, total, target.company_name);

            let report = match &target.form_url {
                Some(form_url) => {
                    self.submit_inquiry(InquiryRequest {
                        form_url: form_url.clone(),
                        company_name: target.company_name.clone(),
                        sender_email: sender_email.to_string(),
                        sender_name: sender_name.to_string(),
                        message_body: None,
                        phone: None,
                    })
                    .await
                }
                None => {
                    self.discover_and_submit(
                        &target.url,
                        &target.company_name,
                        sender_email,
                        sender_name,
                        None,
                        None,
                    )
                    .await
                }
            };

            outcome.tally(&report);
            outcome.reports.push(report);
        }

        tracing::info!(
            "Bulk submission done: {} success, {} failed, {} captcha_blocked, {} fetch_error, {} error",
            outcome.success,
            outcome.failed,
            outcome.captcha_blocked,
            outcome.fetch_error,
            outcome.error
        );
        outcome
    }

    /// Export pending CAPTCHA queue entries to CSV.
    pub async fn export_captcha_queue(&self, output: Option<&Path>) -> Result<Option<PathBuf>> {
        self.queue.lock().await.export_pending_to_csv(output)
    }

    /// Update a queued form's status (operator action).
    pub async fn set_captcha_status(
        &self,
        form_url: &str,
        status: QueueStatus,
        notes: Option<&str>,
    ) -> Result<bool> {
        self.queue.lock().await.set_status(form_url, status, notes)
    }

    /// Number of forms awaiting manual CAPTCHA handling.
    pub async fn pending_captcha_count(&self) -> usize {
        self.queue.lock().await.count_pending()
    }

    /// Drop completed entries from the CAPTCHA queue.
    pub async fn purge_completed_captchas(&self) -> Result<usize> {
        self.queue.lock().await.purge_completed()
    }

    /// The pipeline proper, run while holding the site token.
    async fn submit_locked(&self, request: &InquiryRequest, site: &str) -> SubmissionReport {
        // Fresh fetch per call: analyses (and their CSRF tokens) never
        // carry over from a previous submission
        let page = match self.fetcher.fetch(&request.form_url).await {
            Ok(page) => page,
            Err(e) => {
                tracing::error!("Could not fetch form page {}: {}", request.form_url, e);
                return SubmissionReport::error_report(
                    &request.form_url,
                    SubmissionStatus::FetchError,
                    format!("could not fetch form page: {e}"),
                );
            }
        };

        let Some(analysis) = self.analyze_with_fallback(&page.final_url, &page.body).await else {
            return SubmissionReport::error_report(
                &request.form_url,
                SubmissionStatus::Failed,
                format!("no form found at {}", page.final_url),
            );
        };

        if analysis.has_captcha() {
            return self.divert_to_queue(request, &analysis, site).await;
        }

        let payload = self.build_payload(request, &analysis);
        tracing::debug!("Prepared {} payload fields", payload.len());

        let outcome = self
            .retry
            .run(&analysis.url, &payload, |_| {
                self.strategy.attempt(&analysis.url, &payload, &analysis)
            })
            .await;

        match outcome.best {
            Some((winner, verification)) => {
                let status = if verification.success {
                    SubmissionStatus::Success
                } else {
                    SubmissionStatus::Failed
                };
                let error = (!verification.success).then(|| {
                    format!("unverified (confidence {:.2})", verification.confidence)
                });

                SubmissionReport {
                    form_url: request.form_url.clone(),
                    status,
                    result: Some(SubmissionResult {
                        success: verification.success,
                        confidence: verification.confidence,
                        indicators: verification.indicators,
                        warnings: verification.warnings,
                        http_status: Some(winner.response.http_status),
                        response_url: Some(winner.response.final_url),
                        submission_method: winner.method,
                        csrf_used: winner.csrf_used,
                        multi_step: winner.multi_step,
                        retry_count: outcome.retry_count,
                        retry_errors: outcome.retry_errors,
                    }),
                    captcha_queued: false,
                    error,
                }
            }
            None => {
                let status = match &outcome.last_error {
                    Some(SubmitError::Fetch(_)) => SubmissionStatus::FetchError,
                    _ => SubmissionStatus::Failed,
                };
                let error = outcome
                    .last_error
                    .as_ref()
                    .map_or_else(|| "all attempts failed".to_string(), ToString::to_string);

                SubmissionReport {
                    form_url: request.form_url.clone(),
                    status,
                    result: Some(SubmissionResult {
                        success: false,
                        confidence: 0.0,
                        indicators: Vec::new(),
                        warnings: Vec::new(),
                        http_status: None,
                        response_url: None,
                        submission_method: SubmissionMethod::Standard,
                        csrf_used: false,
                        multi_step: false,
                        retry_count: outcome.retry_count,
                        retry_errors: outcome.retry_errors,
                    }),
                    captcha_queued: false,
                    error: Some(error),
                }
            }
        }
    }

    /// CAPTCHA is an outcome, not an error: record the form for manual
    /// handling and report `captcha_blocked`.
    async fn divert_to_queue(
        &self,
        request: &InquiryRequest,
        analysis: &FormAnalysis,
        site: &str,
    ) -> SubmissionReport {
        let captcha = analysis.captcha.expect("caller checked captcha presence");
        tracing::warn!(
            "CAPTCHA ({}) on {} - queuing for manual handling",
            captcha,
            analysis.url
        );

        let enqueue_result = self.queue.lock().await.enqueue(NewCaptchaEntry {
            url: site.to_string(),
            form_url: analysis.url.clone(),
            captcha_type: Some(captcha),
            company_name: Some(request.company_name.clone()),
            email: Some(request.sender_email.clone()),
            form_action: analysis.action.clone(),
            form_method: Some(analysis.method.clone()),
            required_fields: analysis.required_field_names(),
            notes: Some("CAPTCHA detected during submission. Manual intervention required.".to_string()),
        }).map(|_| ());

        if let Err(e) = enqueue_result {
            tracing::error!("Failed to persist CAPTCHA queue entry: {e}");
        }

        SubmissionReport {
            form_url: request.form_url.clone(),
            status: SubmissionStatus::CaptchaBlocked,
            result: None,
            captcha_queued: true,
            error: Some(format!("CAPTCHA detected ({captcha}) - queued for manual handling")),
        }
    }

    /// Analyze the page, rendering it in the browser when static HTML has
    /// no form (script-built forms).
    async fn analyze_with_fallback(&self, url: &str, html: &str) -> Option<FormAnalysis> {
        if let Some(analysis) = self.analyzer.analyze(url, html) {
            return Some(analysis);
        }

        let browser = self.browser.as_ref()?;
        tracing::info!("No form in static HTML, rendering {} in browser", url);
        let _permit = self.browser_permits.acquire().await.ok()?;

        match browser.render_page(url).await {
            Ok(rendered) => self.analyzer.analyze(url, &rendered),
            Err(e) => {
                tracing::warn!("Browser render fallback failed for {}: {}", url, e);
                None
            }
        }
    }

    /// Map caller data onto discovered field purposes, hidden fields first,
    /// values normalized to expected conventions.
    fn build_payload(
        &self,
        request: &InquiryRequest,
        analysis: &FormAnalysis,
    ) -> BTreeMap<String, String> {
        let mut payload = analysis.hidden_fields.clone();

        let message = request
            .message_body
            .clone()
            .unwrap_or_else(|| default_message(&request.company_name));

        for field in &analysis.fields {
            let value = match field.purpose {
                FieldPurpose::Email => Some(request.sender_email.clone()),
                FieldPurpose::Name => Some(request.sender_name.clone()),
                FieldPurpose::Company => Some(request.company_name.clone()),
                FieldPurpose::Message => Some(message.clone()),
                FieldPurpose::Phone => request.phone.clone(),
                FieldPurpose::Subject | FieldPurpose::Unknown => None,
            };

            if let Some(value) = value {
                payload.insert(
                    field.name.clone(),
                    self.normalizer.normalize(field.purpose, &value),
                );
            }
        }

        payload
    }

    /// Best-effort audit write: a broken sink is logged, never fatal, and
    /// never blocks returning the report.
    async fn persist_audit(&self, request: &InquiryRequest, report: &SubmissionReport) {
        let Some(db) = &self.audit else {
            return;
        };

        let mode = match report.result.as_ref().map(|r| r.submission_method) {
            Some(SubmissionMethod::Browser | SubmissionMethod::MultiStep) => "browser",
            _ => "direct",
        };

        let input = SubmissionRecordInput {
            form_url: report.form_url.clone(),
            company_name: Some(request.company_name.clone()),
            sender_email: Some(request.sender_email.clone()),
            send_status: report.status.to_string(),
            http_status: report
                .result
                .as_ref()
                .and_then(|r| r.http_status)
                .map(i64::from),
            mode: mode.to_string(),
            submission_method: report
                .result
                .as_ref()
                .map(|r| r.submission_method.to_string()),
            verification_confidence: report.result.as_ref().map(|r| f64::from(r.confidence)),
            retry_count: report
                .result
                .as_ref()
                .map_or(0, |r| i64::from(r.retry_count)),
            response_url: report.result.as_ref().and_then(|r| r.response_url.clone()),
            error_reason: report.error.clone(),
        };

        if let Err(e) = submission_log::log_submission(db.pool(), input).await {
            tracing::error!("Failed to write audit record: {e}");
        }
    }
}

fn default_message(company_name: &str) -> String {
    DEFAULT_MESSAGE_TEMPLATE.replace("{company_name}", company_name)
}
