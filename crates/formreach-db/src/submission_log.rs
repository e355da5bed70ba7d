//! Submission audit records, one row per orchestrated submission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// A stored submission record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    /// Unique record identifier
    pub id: String,
    /// The form URL submitted to
    pub form_url: String,
    /// Target company name, when known
    pub company_name: Option<String>,
    /// Sender email used
    pub sender_email: Option<String>,
    /// Outcome category (`success`, `failed`, `captcha_blocked`, ...)
    pub send_status: String,
    /// HTTP status of the winning response
    pub http_status: Option<i64>,
    /// `direct` (plain HTTP) or `browser`
    pub mode: String,
    /// Transport that carried the winning attempt
    pub submission_method: Option<String>,
    /// Verification confidence of the winning response
    pub verification_confidence: Option<f64>,
    /// Retries performed beyond the first attempt
    pub retry_count: i64,
    /// Final URL of the winning response
    pub response_url: Option<String>,
    /// Error description for non-success outcomes
    pub error_reason: Option<String>,
    /// When the submission was made
    pub sent_at: DateTime<Utc>,
}

/// Input for a new audit record; the id and timestamp are assigned on insert.
#[derive(Debug, Clone, Default)]
#[allow(missing_docs)]
pub struct SubmissionRecordInput {
    pub form_url: String,
    pub company_name: Option<String>,
    pub sender_email: Option<String>,
    pub send_status: String,
    pub http_status: Option<i64>,
    pub mode: String,
    pub submission_method: Option<String>,
    pub verification_confidence: Option<f64>,
    pub retry_count: i64,
    pub response_url: Option<String>,
    pub error_reason: Option<String>,
}

/// Append a submission record.
pub async fn log_submission(
    pool: &SqlitePool,
    input: SubmissionRecordInput,
) -> Result<SubmissionRecord, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let sent_at = Utc::now();

    sqlx::query(
        "INSERT INTO submission_log
            (id, form_url, company_name, sender_email, send_status, http_status,
             mode, submission_method, verification_confidence, retry_count,
             response_url, error_reason, sent_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&input.form_url)
    .bind(&input.company_name)
    .bind(&input.sender_email)
    .bind(&input.send_status)
    .bind(input.http_status)
    .bind(&input.mode)
    .bind(&input.submission_method)
    .bind(input.verification_confidence)
    .bind(input.retry_count)
    .bind(&input.response_url)
    .bind(&input.error_reason)
    .bind(sent_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(SubmissionRecord {
        id,
        form_url: input.form_url,
        company_name: input.company_name,
        sender_email: input.sender_email,
        send_status: input.send_status,
        http_status: input.http_status,
        mode: input.mode,
        submission_method: input.submission_method,
        verification_confidence: input.verification_confidence,
        retry_count: input.retry_count,
        response_url: input.response_url,
        error_reason: input.error_reason,
        sent_at,
    })
}

/// All records for a form URL, newest first.
pub async fn get_by_form_url(
    pool: &SqlitePool,
    form_url: &str,
) -> Result<Vec<SubmissionRecord>, sqlx::Error> {
    let rows: Vec<(
        String,
        String,
        Option<String>,
        Option<String>,
        String,
        Option<i64>,
        String,
        Option<String>,
        Option<f64>,
        i64,
        Option<String>,
        Option<String>,
        String,
    )> = sqlx::query_as(
        "SELECT id, form_url, company_name, sender_email, send_status, http_status,
                mode, submission_method, verification_confidence, retry_count,
                response_url, error_reason, sent_at
         FROM submission_log WHERE form_url = ? ORDER BY sent_at DESC",
    )
    .bind(form_url)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_record).collect())
}

#[allow(clippy::type_complexity)]
fn row_to_record(
    row: (
        String,
        String,
        Option<String>,
        Option<String>,
        String,
        Option<i64>,
        String,
        Option<String>,
        Option<f64>,
        i64,
        Option<String>,
        Option<String>,
        String,
    ),
) -> SubmissionRecord {
    let sent_at = DateTime::parse_from_rfc3339(&row.12)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    SubmissionRecord {
        id: row.0,
        form_url: row.1,
        company_name: row.2,
        sender_email: row.3,
        send_status: row.4,
        http_status: row.5,
        mode: row.6,
        submission_method: row.7,
        verification_confidence: row.8,
        retry_count: row.9,
        response_url: row.10,
        error_reason: row.11,
        sent_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn sample_input() -> SubmissionRecordInput {
        SubmissionRecordInput {
            form_url: "https://example.jp/contact".to_string(),
            company_name: Some("株式会社テスト".to_string()),
            sender_email: Some("inquiry@example.com".to_string()),
            send_status: "success".to_string(),
            http_status: Some(200),
            mode: "direct".to_string(),
            submission_method: Some("standard".to_string()),
            verification_confidence: Some(0.85),
            retry_count: 0,
            response_url: Some("https://example.jp/contact/thanks".to_string()),
            error_reason: None,
        }
    }

    #[tokio::test]
    async fn test_log_and_fetch_submission() {
        let db = Database::new(":memory:").await.expect("create database");

        let record = log_submission(db.pool(), sample_input())
            .await
            .expect("log submission");
        assert_eq!(record.send_status, "success");

        let records = get_by_form_url(db.pool(), "https://example.jp/contact")
            .await
            .expect("fetch records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].company_name.as_deref(), Some("株式会社テスト"));
        assert_eq!(records[0].http_status, Some(200));
    }

    #[tokio::test]
    async fn test_log_is_append_only() {
        let db = Database::new(":memory:").await.expect("create database");

        log_submission(db.pool(), sample_input())
            .await
            .expect("first record");
        let mut second = sample_input();
        second.send_status = "failed".to_string();
        log_submission(db.pool(), second).await.expect("second record");

        let records = get_by_form_url(db.pool(), "https://example.jp/contact")
            .await
            .expect("fetch records");
        assert_eq!(records.len(), 2);
    }
}
