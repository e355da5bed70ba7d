//! Durable queue of CAPTCHA-blocked forms awaiting manual action.
//!
//! Storage is a flat JSONL file, one record per entry, rewritten in full on
//! every mutation (load-all, mutate in memory, write-all). Adequate at the
//! expected scale of hundreds of entries; concurrent writers need external
//! mutual exclusion, which the orchestrator provides with a single lock.
//!
//! Entries are keyed by `form_url`: `enqueue` upserts rather than appends,
//! so repeated discovery of the same blocked form refreshes its metadata
//! instead of growing the queue without bound.

use chrono::{DateTime, Utc};
use formreach_core::error::{FormreachError, Result};
use formreach_core::types::CaptchaKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Lifecycle state of a queued form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Awaiting manual action
    Pending,
    /// An operator is working on it
    InProgress,
    /// Manually submitted
    Completed,
    /// Given up
    Failed,
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A CAPTCHA-blocked form awaiting manual submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaQueueEntry {
    /// Site root URL
    pub url: String,
    /// Contact form URL - the logical key
    pub form_url: String,
    /// CAPTCHA flavor that blocked automation
    pub captcha_type: CaptchaKind,
    /// Target company, when known
    pub company_name: Option<String>,
    /// Sender email intended for the submission
    pub email: Option<String>,
    /// Resolved form action, for manual submission
    pub form_action: Option<String>,
    /// Form method
    pub form_method: String,
    /// Names of the form's required fields
    pub required_fields: Vec<String>,
    /// When the CAPTCHA was discovered
    pub discovered_at: DateTime<Utc>,
    /// Current lifecycle state
    pub status: QueueStatus,
    /// Operator notes
    pub notes: Option<String>,
}

/// Input for `enqueue`.
#[derive(Debug, Clone, Default)]
#[allow(missing_docs)]
pub struct NewCaptchaEntry {
    pub url: String,
    pub form_url: String,
    pub captcha_type: Option<CaptchaKind>,
    pub company_name: Option<String>,
    pub email: Option<String>,
    pub form_action: Option<String>,
    pub form_method: Option<String>,
    pub required_fields: Vec<String>,
    pub notes: Option<String>,
}

/// The queue itself: in-memory entries indexed by form URL, persisted to a
/// JSONL file.
#[derive(Debug)]
pub struct CaptchaQueue {
    path: PathBuf,
    entries: Vec<CaptchaQueueEntry>,
    index: HashMap<String, usize>,
}

impl CaptchaQueue {
    /// Open the queue, loading any existing entries.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = Vec::new();

        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<CaptchaQueueEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        tracing::warn!("Skipping unreadable queue line: {e}");
                    }
                }
            }
            tracing::info!("Loaded {} entries from CAPTCHA queue", entries.len());
        }

        let index = Self::build_index(&entries);
        Ok(Self {
            path,
            entries,
            index,
        })
    }

    fn build_index(entries: &[CaptchaQueueEntry]) -> HashMap<String, usize> {
        entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.form_url.clone(), i))
            .collect()
    }

    /// Add a blocked form, upserting by `form_url`: re-discovery refreshes
    /// the entry's metadata and timestamp but keeps its current status.
    pub fn enqueue(&mut self, new: NewCaptchaEntry) -> Result<&CaptchaQueueEntry> {
        let captcha_type = new.captcha_type.unwrap_or(CaptchaKind::Image);
        let entry = CaptchaQueueEntry {
            url: new.url,
            form_url: new.form_url.clone(),
            captcha_type,
            company_name: new.company_name,
            email: new.email,
            form_action: new.form_action,
            form_method: new.form_method.unwrap_or_else(|| "POST".to_string()),
            required_fields: new.required_fields,
            discovered_at: Utc::now(),
            status: QueueStatus::Pending,
            notes: new.notes,
        };

        let position = match self.index.get(&new.form_url) {
            Some(&i) => {
                let existing_status = self.entries[i].status;
                self.entries[i] = CaptchaQueueEntry {
                    status: existing_status,
                    ..entry
                };
                tracing::info!("Refreshed queued CAPTCHA form: {}", new.form_url);
                i
            }
            None => {
                self.entries.push(entry);
                let i = self.entries.len() - 1;
                self.index.insert(new.form_url.clone(), i);
                tracing::info!(
                    "Queued CAPTCHA form: {} ({}), queue size {}",
                    new.form_url,
                    captcha_type,
                    self.entries.len()
                );
                i
            }
        };

        self.save()?;
        Ok(&self.entries[position])
    }

    /// Update an entry's status by form URL. Returns false if unknown.
    pub fn set_status(
        &mut self,
        form_url: &str,
        status: QueueStatus,
        notes: Option<&str>,
    ) -> Result<bool> {
        let Some(&i) = self.index.get(form_url) else {
            return Ok(false);
        };

        self.entries[i].status = status;
        if let Some(notes) = notes {
            self.entries[i].notes = Some(notes.to_string());
        }
        self.save()?;
        tracing::info!("Updated queue status: {} -> {}", form_url, status);
        Ok(true)
    }

    /// Entry lookup by form URL.
    #[must_use]
    pub fn get(&self, form_url: &str) -> Option<&CaptchaQueueEntry> {
        self.index.get(form_url).map(|&i| &self.entries[i])
    }

    /// All entries still awaiting manual action.
    #[must_use]
    pub fn pending(&self) -> Vec<&CaptchaQueueEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == QueueStatus::Pending)
            .collect()
    }

    /// Number of pending entries.
    #[must_use]
    pub fn count_pending(&self) -> usize {
        self.pending().len()
    }

    /// Number of completed entries.
    #[must_use]
    pub fn count_completed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == QueueStatus::Completed)
            .count()
    }

    /// Export pending entries to CSV for manual processing. With no path
    /// given, writes `captcha_queue_pending_<timestamp>.csv` next to the
    /// queue file. Returns the output path, or `None` when nothing is
    /// pending.
    pub fn export_pending_to_csv(&self, output: Option<&Path>) -> Result<Option<PathBuf>> {
        let pending = self.pending();
        if pending.is_empty() {
            tracing::warn!("No pending CAPTCHA forms to export");
            return Ok(None);
        }

        let output = output.map_or_else(
            || {
                let name = format!(
                    "captcha_queue_pending_{}.csv",
                    Utc::now().format("%Y%m%d_%H%M%S")
                );
                self.path.parent().unwrap_or_else(|| Path::new(".")).join(name)
            },
            Path::to_path_buf,
        );

        let mut csv = String::from(
            "URL,Form URL,CAPTCHA Type,Company Name,Email,Form Action,Form Method,Required Fields,Discovered At,Status,Notes\n",
        );
        for entry in &pending {
            let row = [
                entry.url.clone(),
                entry.form_url.clone(),
                entry.captcha_type.to_string(),
                entry.company_name.clone().unwrap_or_default(),
                entry.email.clone().unwrap_or_default(),
                entry.form_action.clone().unwrap_or_default(),
                entry.form_method.clone(),
                entry.required_fields.join(", "),
                entry.discovered_at.to_rfc3339(),
                entry.status.to_string(),
                entry.notes.clone().unwrap_or_default(),
            ];
            let escaped: Vec<String> = row.iter().map(|f| csv_escape(f)).collect();
            csv.push_str(&escaped.join(","));
            csv.push('\n');
        }

        fs::write(&output, csv)?;
        tracing::info!(
            "Exported {} pending forms to {}",
            pending.len(),
            output.display()
        );
        Ok(Some(output))
    }

    /// Remove completed entries. Returns how many were removed.
    pub fn purge_completed(&mut self) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|e| e.status != QueueStatus::Completed);
        let removed = before - self.entries.len();

        if removed > 0 {
            self.index = Self::build_index(&self.entries);
            self.save()?;
            tracing::info!("Removed {} completed forms from queue", removed);
        }
        Ok(removed)
    }

    /// Write every entry back to the JSONL file.
    fn save(&self) -> Result<()> {
        let mut contents = String::new();
        for entry in &self.entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| FormreachError::Queue(format!("failed to serialize entry: {e}")))?;
            contents.push_str(&line);
            contents.push('\n');
        }
        fs::write(&self.path, contents)?;
        Ok(())
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(form_url: &str) -> NewCaptchaEntry {
        NewCaptchaEntry {
            url: "https://example.jp".to_string(),
            form_url: form_url.to_string(),
            captcha_type: Some(CaptchaKind::RecaptchaV2),
            company_name: Some("株式会社テスト".to_string()),
            email: Some("info@example.jp".to_string()),
            form_action: Some("https://example.jp/contact/send".to_string()),
            form_method: Some("POST".to_string()),
            required_fields: vec!["email".to_string(), "message".to_string()],
            notes: None,
        }
    }

    fn open_queue(dir: &TempDir) -> CaptchaQueue {
        CaptchaQueue::open(dir.path().join("queue.jsonl")).expect("open queue")
    }

    #[test]
    fn test_enqueue_and_pending() {
        let dir = TempDir::new().expect("tempdir");
        let mut queue = open_queue(&dir);

        queue.enqueue(entry("https://example.jp/contact")).expect("enqueue");
        assert_eq!(queue.count_pending(), 1);

        let stored = queue.get("https://example.jp/contact").expect("entry");
        assert_eq!(stored.captcha_type, CaptchaKind::RecaptchaV2);
        assert_eq!(stored.status, QueueStatus::Pending);
    }

    #[test]
    fn test_completed_entry_leaves_pending_and_csv() {
        let dir = TempDir::new().expect("tempdir");
        let mut queue = open_queue(&dir);

        queue.enqueue(entry("https://a.example.jp/contact")).expect("enqueue");
        queue.enqueue(entry("https://b.example.jp/contact")).expect("enqueue");

        let updated = queue
            .set_status("https://a.example.jp/contact", QueueStatus::Completed, None)
            .expect("set status");
        assert!(updated);

        let pending = queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].form_url, "https://b.example.jp/contact");

        let csv_path = queue
            .export_pending_to_csv(Some(&dir.path().join("pending.csv")))
            .expect("export")
            .expect("csv written");
        let csv = fs::read_to_string(csv_path).expect("read csv");
        assert!(csv.contains("https://b.example.jp/contact"));
        assert!(!csv.lines().skip(1).any(|l| l.contains("https://a.example.jp/contact")));
    }

    #[test]
    fn test_set_status_unknown_form() {
        let dir = TempDir::new().expect("tempdir");
        let mut queue = open_queue(&dir);
        let updated = queue
            .set_status("https://nowhere.example.jp", QueueStatus::Completed, None)
            .expect("set status");
        assert!(!updated);
    }

    #[test]
    fn test_enqueue_upserts_by_form_url() {
        let dir = TempDir::new().expect("tempdir");
        let mut queue = open_queue(&dir);

        queue.enqueue(entry("https://example.jp/contact")).expect("enqueue");
        queue
            .set_status(
                "https://example.jp/contact",
                QueueStatus::InProgress,
                Some("working"),
            )
            .expect("set status");

        // Re-discovery refreshes metadata but keeps the operator's status
        let mut refreshed = entry("https://example.jp/contact");
        refreshed.company_name = Some("新社名".to_string());
        queue.enqueue(refreshed).expect("enqueue again");

        assert_eq!(queue.count_pending(), 0);
        let stored = queue.get("https://example.jp/contact").expect("entry");
        assert_eq!(stored.status, QueueStatus::InProgress);
        assert_eq!(stored.company_name.as_deref(), Some("新社名"));
    }

    #[test]
    fn test_purge_completed() {
        let dir = TempDir::new().expect("tempdir");
        let mut queue = open_queue(&dir);

        queue.enqueue(entry("https://a.example.jp/contact")).expect("enqueue");
        queue.enqueue(entry("https://b.example.jp/contact")).expect("enqueue");
        queue
            .set_status("https://a.example.jp/contact", QueueStatus::Completed, None)
            .expect("set status");

        let removed = queue.purge_completed().expect("purge");
        assert_eq!(removed, 1);
        assert!(queue.get("https://a.example.jp/contact").is_none());
        assert!(queue.get("https://b.example.jp/contact").is_some());
    }

    #[test]
    fn test_queue_survives_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("queue.jsonl");

        {
            let mut queue = CaptchaQueue::open(&path).expect("open");
            queue.enqueue(entry("https://example.jp/contact")).expect("enqueue");
        }

        let queue = CaptchaQueue::open(&path).expect("reopen");
        assert_eq!(queue.count_pending(), 1);
        let stored = queue.get("https://example.jp/contact").expect("entry");
        assert_eq!(stored.company_name.as_deref(), Some("株式会社テスト"));
    }

    #[test]
    fn test_csv_escaping() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
