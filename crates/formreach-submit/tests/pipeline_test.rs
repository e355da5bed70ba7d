//! End-to-end pipeline tests over scripted fetch/transport fakes.

use async_trait::async_trait;
use formreach_core::config::{LocatorConfig, ThrottleConfig};
use formreach_core::types::{FormResponse, SubmissionMethod, SubmissionStatus};
use formreach_locator::FormLocator;
use formreach_net::{FetchError, FetchedPage, PageFetch, RobotsChecker, RobotsPolicy};
use formreach_submit::{
    CaptchaQueue, HttpTransport, InquiryRequest, QueueStatus, RetryCoordinator, RetryPolicy,
    StrategyEngine, SubmissionService, SubmissionVerifier, TransportError, TransportRequest,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

const CONTACT_FORM_PAGE: &str = r#"
    <html><body>
    <form action="/contact/submit" method="post">
        <div><input type="text" name="name"></div>
        <div><input type="email" name="email" required></div>
        <div><textarea name="message" required></textarea></div>
        <input type="submit" value="送信">
    </form>
    </body></html>
"#;

const CAPTCHA_FORM_PAGE: &str = r#"
    <html><body>
    <form action="/contact/submit" method="post">
        <input type="email" name="email" required>
        <textarea name="message" required></textarea>
        <div class="g-recaptcha" data-sitekey="key"></div>
        <input type="submit" value="送信">
    </form>
    </body></html>
"#;

/// Fetcher serving a fixed URL -> page map; everything else is a 404.
struct ScriptedFetcher {
    pages: HashMap<String, String>,
}

impl ScriptedFetcher {
    fn new(pages: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            pages: pages
                .iter()
                .map(|(u, b)| ((*u).to_string(), (*b).to_string()))
                .collect(),
        })
    }
}

#[async_trait]
impl PageFetch for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> formreach_net::Result<FetchedPage> {
        match self.pages.get(url) {
            Some(body) => Ok(FetchedPage {
                body: body.clone(),
                http_status: 200,
                final_url: url.to_string(),
            }),
            None => Err(FetchError::Http {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}

/// Transport answering from a URL -> response map, recording every request.
struct ScriptedTransport {
    responses: HashMap<String, FormResponse>,
    requests: Mutex<Vec<TransportRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    fn new(responses: &[(&str, FormResponse)]) -> Arc<Self> {
        Arc::new(Self {
            responses: responses
                .iter()
                .map(|(u, r)| ((*u).to_string(), r.clone()))
                .collect(),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<FormResponse, TransportError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        // Yield so overlapping submissions would be observable
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);

        self.responses
            .get(&url)
            .cloned()
            .ok_or_else(|| TransportError::Connection(format!("no scripted response for {url}")))
    }
}

fn thanks_response() -> FormResponse {
    FormResponse {
        http_status: 200,
        final_url: "https://example.jp/contact/thanks".to_string(),
        body: "<p>送信完了</p>".to_string(),
    }
}

fn build_service(
    fetcher: Arc<ScriptedFetcher>,
    transport: Arc<ScriptedTransport>,
    queue_dir: &tempfile::TempDir,
) -> SubmissionService {
    let robots = Arc::new(RobotsChecker::new("ContactBot/1.0", 5));
    let locator = FormLocator::new(
        fetcher.clone(),
        robots,
        RobotsPolicy::Ignore,
        LocatorConfig::default(),
    );
    let strategy = StrategyEngine::new(
        fetcher.clone(),
        transport,
        None,
        Arc::new(Semaphore::new(1)),
        Duration::from_secs(1),
    );
    let retry = RetryCoordinator::new(RetryPolicy::default(), SubmissionVerifier::new());
    let queue = CaptchaQueue::open(queue_dir.path().join("queue.jsonl")).expect("open queue");

    SubmissionService::new(
        fetcher,
        locator,
        strategy,
        retry,
        queue,
        &ThrottleConfig::default(),
    )
}

fn inquiry(form_url: &str) -> InquiryRequest {
    InquiryRequest {
        form_url: form_url.to_string(),
        company_name: "株式会社テスト".to_string(),
        sender_email: "test@example.jp".to_string(),
        sender_name: "お問い合わせ".to_string(),
        message_body: None,
        phone: None,
    }
}

#[tokio::test(start_paused = true)]
async fn submits_standard_form_end_to_end() {
    let fetcher = ScriptedFetcher::new(&[("https://example.jp/contact", CONTACT_FORM_PAGE)]);
    let transport =
        ScriptedTransport::new(&[("https://example.jp/contact/submit", thanks_response())]);
    let queue_dir = tempfile::TempDir::new().expect("tempdir");
    let service = build_service(fetcher, transport.clone(), &queue_dir);

    let report = service
        .submit_inquiry(inquiry("https://example.jp/contact"))
        .await;

    assert_eq!(report.status, SubmissionStatus::Success);
    let result = report.result.expect("submission result");
    assert!(result.success);
    assert!(result.confidence >= 0.8);
    assert_eq!(result.submission_method, SubmissionMethod::Standard);
    assert!(!result.csrf_used);
    assert_eq!(result.retry_count, 0);
    assert_eq!(
        result.response_url.as_deref(),
        Some("https://example.jp/contact/thanks")
    );

    // Exactly one submission, carrying the mapped and normalized payload
    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "https://example.jp/contact/submit");
    assert_eq!(requests[0].form["email"], "test@example.jp");
    assert_eq!(requests[0].form["name"], "お問い合わせ");
    assert!(requests[0].form["message"].contains("株式会社テスト"));
}

#[tokio::test(start_paused = true)]
async fn captcha_form_never_reaches_the_strategy_engine() {
    let fetcher = ScriptedFetcher::new(&[("https://example.jp/contact", CAPTCHA_FORM_PAGE)]);
    let transport =
        ScriptedTransport::new(&[("https://example.jp/contact/submit", thanks_response())]);
    let queue_dir = tempfile::TempDir::new().expect("tempdir");
    let service = build_service(fetcher, transport.clone(), &queue_dir);

    let report = service
        .submit_inquiry(inquiry("https://example.jp/contact"))
        .await;

    assert_eq!(report.status, SubmissionStatus::CaptchaBlocked);
    assert!(report.captcha_queued);
    assert!(report.result.is_none());

    // The strategy engine was never invoked
    assert!(transport.requests().is_empty());

    // The form is waiting in the manual queue with its submission details
    assert_eq!(service.pending_captcha_count().await, 1);
    let csv_path = service
        .export_captcha_queue(Some(&queue_dir.path().join("pending.csv")))
        .await
        .expect("export")
        .expect("csv written");
    let csv = std::fs::read_to_string(csv_path).expect("read csv");
    assert!(csv.contains("https://example.jp/contact"));
    assert!(csv.contains("recaptcha_v2"));

    // Operator completes it manually; it leaves the pending set
    let updated = service
        .set_captcha_status(
            "https://example.jp/contact",
            QueueStatus::Completed,
            Some("submitted by hand"),
        )
        .await
        .expect("set status");
    assert!(updated);
    assert_eq!(service.pending_captcha_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn unreachable_form_page_reports_fetch_error() {
    let fetcher = ScriptedFetcher::new(&[]);
    let transport = ScriptedTransport::new(&[]);
    let queue_dir = tempfile::TempDir::new().expect("tempdir");
    let service = build_service(fetcher, transport, &queue_dir);

    let report = service
        .submit_inquiry(inquiry("https://example.jp/contact"))
        .await;

    assert_eq!(report.status, SubmissionStatus::FetchError);
    assert!(report.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn page_without_form_reports_failed() {
    let fetcher = ScriptedFetcher::new(&[(
        "https://example.jp/contact",
        "<html><body>Coming soon</body></html>",
    )]);
    let transport = ScriptedTransport::new(&[]);
    let queue_dir = tempfile::TempDir::new().expect("tempdir");
    let service = build_service(fetcher, transport, &queue_dir);

    let report = service
        .submit_inquiry(inquiry("https://example.jp/contact"))
        .await;

    assert_eq!(report.status, SubmissionStatus::Failed);
    assert!(report.error.expect("error").contains("no form found"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_same_site_submissions_serialize() {
    let fetcher = ScriptedFetcher::new(&[("https://example.jp/contact", CONTACT_FORM_PAGE)]);
    let transport =
        ScriptedTransport::new(&[("https://example.jp/contact/submit", thanks_response())]);
    let queue_dir = tempfile::TempDir::new().expect("tempdir");
    let service = build_service(fetcher, transport.clone(), &queue_dir);

    let (first, second) = tokio::join!(
        service.submit_inquiry(inquiry("https://example.jp/contact")),
        service.submit_inquiry(inquiry("https://example.jp/contact")),
    );

    assert_eq!(first.status, SubmissionStatus::Success);
    assert_eq!(second.status, SubmissionStatus::Success);

    // Per-domain serialization: never more than one request in flight
    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn bulk_submit_aggregates_outcomes() {
    let fetcher = ScriptedFetcher::new(&[
        ("https://a.example.jp/contact", CONTACT_FORM_PAGE),
        ("https://b.example.jp/contact", CAPTCHA_FORM_PAGE),
    ]);
    let transport =
        ScriptedTransport::new(&[("https://a.example.jp/contact/submit", thanks_response())]);
    let queue_dir = tempfile::TempDir::new().expect("tempdir");
    let service = build_service(fetcher, transport, &queue_dir);

    let targets = vec![
        formreach_submit::BulkTarget {
            url: "https://a.example.jp/".to_string(),
            form_url: Some("https://a.example.jp/contact".to_string()),
            company_name: "A社".to_string(),
            email: None,
        },
        formreach_submit::BulkTarget {
            url: "https://b.example.jp/".to_string(),
            form_url: Some("https://b.example.jp/contact".to_string()),
            company_name: "B社".to_string(),
            email: None,
        },
        formreach_submit::BulkTarget {
            url: "https://c.example.jp/".to_string(),
            form_url: Some("https://c.example.jp/contact".to_string()),
            company_name: "C社".to_string(),
            email: None,
        },
        // Skipped: already has a direct email address
        formreach_submit::BulkTarget {
            url: "https://d.example.jp/".to_string(),
            form_url: Some("https://d.example.jp/contact".to_string()),
            company_name: "D社".to_string(),
            email: Some("info@d.example.jp".to_string()),
        },
    ];

    let outcome = service
        .bulk_submit(targets, "test@example.jp", "お問い合わせ", true)
        .await;

    assert_eq!(outcome.total(), 3);
    assert_eq!(outcome.success, 1);
    assert_eq!(outcome.captcha_blocked, 1);
    assert_eq!(outcome.fetch_error, 1);
    assert_eq!(outcome.failed, 0);
}

// NOTE: real clock here (not `start_paused`): the SQLite audit pool runs on a
// blocking worker thread, which races with tokio's virtual clock and trips a
// spurious PoolTimedOut. This test's success path has no retry sleeps, so the
// paused clock is unnecessary.
#[tokio::test]
async fn audit_sink_records_the_submission() {
    let fetcher = ScriptedFetcher::new(&[("https://example.jp/contact", CONTACT_FORM_PAGE)]);
    let transport =
        ScriptedTransport::new(&[("https://example.jp/contact/submit", thanks_response())]);
    let queue_dir = tempfile::TempDir::new().expect("tempdir");

    let db = Arc::new(
        formreach_db::Database::new(":memory:")
            .await
            .expect("create audit db"),
    );
    let service = build_service(fetcher, transport, &queue_dir).with_audit(db.clone());

    let report = service
        .submit_inquiry(inquiry("https://example.jp/contact"))
        .await;
    assert_eq!(report.status, SubmissionStatus::Success);

    let records =
        formreach_db::submission_log::get_by_form_url(db.pool(), "https://example.jp/contact")
            .await
            .expect("fetch audit records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].send_status, "success");
    assert_eq!(records[0].mode, "direct");
    assert_eq!(records[0].submission_method.as_deref(), Some("standard"));
}
