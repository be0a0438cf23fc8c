//! Repository traits for the DeckLens processing layer.
//!
//! The Task Store is exclusively owned by the queue implementation; workers
//! only read assignments and write status/progress through these traits,
//! never through direct table access.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Duration;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Capability, ExtractionResult, NewTask, ProcessingTask, QueueStats, SpecializedResult,
    TemplateResult, VisualAnalysisEntry, VisualAnalysisResult, WorkerRegistration,
};

/// The Queue Manager contract: task creation, atomic leasing, progress,
/// completion with retry policy, and abandoned-task recovery.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a new processing task.
    async fn enqueue(&self, task: NewTask) -> Result<Uuid>;

    /// Atomically lease the next queued task this worker is capable of.
    ///
    /// Sets status=processing, owning_server_id and leased_at. No two
    /// concurrent callers ever lease the same task.
    async fn claim_next(
        &self,
        server_id: &str,
        capabilities: &[Capability],
    ) -> Result<Option<ProcessingTask>>;

    /// Update task progress. Advisory only; never fails the task.
    async fn update_progress(
        &self,
        task_id: Uuid,
        percent: i32,
        message: Option<&str>,
    ) -> Result<()>;

    /// Terminal transition to completed.
    async fn complete(&self, task_id: Uuid, result: Option<JsonValue>) -> Result<()>;

    /// Record a failed execution. While retry_count < max_retries the task is
    /// reset to queued with retry_count incremented and the lease cleared;
    /// otherwise it is left in failed status for operator attention.
    async fn fail(&self, task_id: Uuid, error: &str) -> Result<()>;

    /// Reset processing tasks whose owning server's last heartbeat is older
    /// than `liveness_window` back to queued with the lease cleared.
    /// Returns the number of tasks recovered. Idempotent; safe to run from
    /// every worker at startup.
    async fn recover_abandoned(&self, liveness_window: Duration) -> Result<u64>;

    /// Get a task by ID.
    async fn get(&self, task_id: Uuid) -> Result<Option<ProcessingTask>>;

    /// All tasks for a document, newest first.
    async fn get_for_document(&self, document_id: Uuid) -> Result<Vec<ProcessingTask>>;

    /// Count of queued tasks.
    async fn pending_count(&self) -> Result<i64>;

    /// Queue statistics summary.
    async fn queue_stats(&self) -> Result<QueueStats>;
}

/// Worker registration and heartbeat-based liveness.
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Idempotent registration; re-registering the same server_id refreshes
    /// capabilities and concurrency limits.
    async fn register(&self, registration: &WorkerRegistration) -> Result<()>;

    /// Refresh last_heartbeat for a registered server.
    async fn heartbeat(&self, server_id: &str) -> Result<()>;

    /// Workers whose last heartbeat is within `window`.
    async fn live_workers(&self, window: Duration) -> Result<Vec<WorkerRegistration>>;

    /// Remove a registration (graceful shutdown).
    async fn remove(&self, server_id: &str) -> Result<()>;
}

/// Visual analysis cache keyed strictly by document_id.
///
/// The read is the single gate deciding whether the expensive GPU-bound
/// visual stage runs at all for a document. Writes overwrite
/// unconditionally; concurrent writers race and last-write-wins is accepted
/// because writes are idempotent recomputations of the same stage.
#[async_trait]
pub trait VisualAnalysisCache: Send + Sync {
    async fn get(&self, document_id: Uuid) -> Result<Option<VisualAnalysisEntry>>;

    /// Batch lookup. Only found entries are present in the returned map;
    /// callers must handle partial results.
    async fn get_many(
        &self,
        document_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, VisualAnalysisEntry>>;

    async fn put(&self, entry: &VisualAnalysisEntry) -> Result<()>;
}

/// Result Reconciler persistence: four independent result categories per
/// document, each optional and independently retriable.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_visual_analysis(
        &self,
        document_id: Uuid,
        result: &VisualAnalysisResult,
    ) -> Result<()>;

    async fn save_extraction(&self, document_id: Uuid, result: &ExtractionResult) -> Result<()>;

    async fn save_template_results(
        &self,
        document_id: Uuid,
        result: &TemplateResult,
    ) -> Result<()>;

    /// Persist specialized analyses. Only non-empty entries are written; an
    /// entirely empty result is a no-op.
    async fn save_specialized(&self, document_id: Uuid, result: &SpecializedResult)
        -> Result<()>;

    async fn get_visual_analysis(&self, document_id: Uuid)
        -> Result<Option<VisualAnalysisResult>>;

    async fn get_extraction(&self, document_id: Uuid) -> Result<Option<ExtractionResult>>;

    async fn get_template_results(&self, document_id: Uuid) -> Result<Option<TemplateResult>>;

    async fn get_specialized(&self, document_id: Uuid) -> Result<SpecializedResult>;
}
