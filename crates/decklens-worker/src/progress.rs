//! Progressive per-chapter delivery to a caller-supplied callback URL.
//!
//! Template analysis is by far the longest stage. Posting each chapter's
//! result as it completes lets the UI fill in incrementally instead of
//! waiting for the whole task. Delivery is fire-and-forget: a failed or slow
//! callback is logged and never affects the task.

use decklens_core::{defaults, ChapterResult};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// Callback payload for one chapter-level progress event.
#[derive(Debug, Serialize)]
pub struct ChapterProgress<'a> {
    pub deck_id: Uuid,
    pub chapter_name: &'a str,
    /// "processing" when a chapter starts, "completed" when it finishes.
    pub status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_results: Option<&'a ChapterResult>,
}

/// Posts chapter progress to a configured callback URL.
pub struct ProgressNotifier {
    url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl ProgressNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            timeout_secs: defaults::PROGRESS_CALLBACK_TIMEOUT_SECS,
        }
    }

    pub fn from_env() -> Option<Self> {
        let url = std::env::var(defaults::ENV_PROGRESS_CALLBACK_URL).ok()?;
        if url.is_empty() {
            return None;
        }
        Some(Self::new(url))
    }

    /// Deliver one progress event. Never returns an error.
    pub async fn notify(
        &self,
        deck_id: Uuid,
        chapter_name: &str,
        status: &str,
        chapter_results: Option<&ChapterResult>,
    ) {
        let payload = ChapterProgress {
            deck_id,
            chapter_name,
            status,
            chapter_results,
        };

        let result = self
            .client
            .post(&self.url)
            .json(&payload)
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(
                    subsystem = "worker",
                    component = "progress",
                    deck_id = %deck_id,
                    chapter = chapter_name,
                    status,
                    "Chapter progress delivered"
                );
            }
            Ok(resp) => {
                warn!(
                    subsystem = "worker",
                    component = "progress",
                    deck_id = %deck_id,
                    chapter = chapter_name,
                    status_code = %resp.status(),
                    "Progress callback rejected"
                );
            }
            Err(e) => {
                warn!(
                    subsystem = "worker",
                    component = "progress",
                    deck_id = %deck_id,
                    chapter = chapter_name,
                    error = %e,
                    "Progress callback failed"
                );
            }
        }
    }
}
