//! Task queue repository implementation (the Queue Manager).
//!
//! All mutations to task ownership and status go through this repository's
//! atomic lease/complete operations; workers never touch the task table
//! directly. The claim uses `FOR UPDATE SKIP LOCKED` so concurrent workers
//! can never lease the same task.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use decklens_core::{
    Capability, Error, NewTask, ProcessingTask, QueueStats, Result, TaskQueue, TaskStatus,
    TaskType,
};

/// PostgreSQL implementation of the TaskQueue trait.
#[derive(Clone)]
pub struct PgTaskQueue {
    pool: Pool<Postgres>,
}

const TASK_COLUMNS: &str = "id, document_id, company_id, file_path, task_type, status, \
     retry_count, max_retries, owning_server_id, progress_percent, progress_message, \
     error_message, result, created_at, leased_at, completed_at";

impl PgTaskQueue {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a task row into a ProcessingTask struct.
    fn parse_task_row(row: sqlx::postgres::PgRow) -> ProcessingTask {
        let task_type: String = row.get("task_type");
        let status: String = row.get("status");
        ProcessingTask {
            id: row.get("id"),
            document_id: row.get("document_id"),
            company_id: row.get("company_id"),
            file_path: row.get("file_path"),
            task_type: TaskType::parse(&task_type).unwrap_or(TaskType::PdfAnalysis),
            status: TaskStatus::parse(&status),
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            owning_server_id: row.get("owning_server_id"),
            progress_percent: row.get("progress_percent"),
            progress_message: row.get("progress_message"),
            error_message: row.get("error_message"),
            result: row.get("result"),
            created_at: row.get("created_at"),
            leased_at: row.get("leased_at"),
            completed_at: row.get("completed_at"),
        }
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(&self, task: NewTask) -> Result<Uuid> {
        let task_id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO processing_task
                 (id, document_id, company_id, file_path, task_type, status,
                  retry_count, max_retries, progress_percent, created_at)
             VALUES ($1, $2, $3, $4, $5, 'queued', 0, $6, 0, $7)",
        )
        .bind(task_id)
        .bind(task.document_id)
        .bind(&task.company_id)
        .bind(&task.file_path)
        .bind(task.task_type.as_str())
        .bind(task.max_retries)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "task_queue",
            task_id = %task_id,
            document_id = %task.document_id,
            task_type = %task.task_type,
            "Task enqueued"
        );
        Ok(task_id)
    }

    async fn claim_next(
        &self,
        server_id: &str,
        capabilities: &[Capability],
    ) -> Result<Option<ProcessingTask>> {
        let claimable = TaskType::claimable_by(capabilities);
        if claimable.is_empty() {
            return Ok(None);
        }
        let type_strings: Vec<String> =
            claimable.iter().map(|tt| tt.as_str().to_string()).collect();
        let now = Utc::now();

        // Filter by task type before locking; FOR UPDATE SKIP LOCKED makes
        // the claim safe under concurrent workers.
        let row = sqlx::query(&format!(
            "UPDATE processing_task
             SET status = 'processing', owning_server_id = $1, leased_at = $2
             WHERE id = (
                 SELECT id FROM processing_task
                 WHERE status = 'queued' AND task_type = ANY($3)
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(server_id)
        .bind(now)
        .bind(&type_strings)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if let Some(ref r) = row {
            let task_id: Uuid = r.get("id");
            debug!(
                subsystem = "db",
                component = "task_queue",
                op = "claim_next",
                task_id = %task_id,
                server_id,
                "Task leased"
            );
        }
        Ok(row.map(Self::parse_task_row))
    }

    async fn update_progress(
        &self,
        task_id: Uuid,
        percent: i32,
        message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE processing_task SET progress_percent = $1, progress_message = $2
             WHERE id = $3",
        )
        .bind(percent)
        .bind(message)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn complete(&self, task_id: Uuid, result: Option<JsonValue>) -> Result<()> {
        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE processing_task
             SET status = 'completed', completed_at = $1, result = $2,
                 progress_percent = 100, error_message = NULL
             WHERE id = $3",
        )
        .bind(now)
        .bind(&result)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            return Err(Error::TaskNotFound(task_id));
        }

        info!(
            subsystem = "db",
            component = "task_queue",
            task_id = %task_id,
            "Task completed"
        );
        Ok(())
    }

    async fn fail(&self, task_id: Uuid, error: &str) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Lock the row so concurrent fail() calls serialize and each one
        // consumes exactly one retry.
        let counts: Option<(i32, i32)> = sqlx::query_as(
            "SELECT retry_count, max_retries FROM processing_task WHERE id = $1 FOR UPDATE",
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let (retry_count, max_retries) = counts.ok_or(Error::TaskNotFound(task_id))?;

        if retry_count < max_retries {
            // Retry: reset to queued with the lease cleared.
            sqlx::query(
                "UPDATE processing_task
                 SET status = 'queued', retry_count = $1, error_message = $2,
                     owning_server_id = NULL, leased_at = NULL,
                     progress_percent = 0, progress_message = NULL
                 WHERE id = $3",
            )
            .bind(retry_count + 1)
            .bind(error)
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            warn!(
                subsystem = "db",
                component = "task_queue",
                task_id = %task_id,
                retry_count = retry_count + 1,
                max_retries,
                error,
                "Task failed, requeued for retry"
            );
        } else {
            // Retries exhausted: terminal failure, surfaced for the operator.
            sqlx::query(
                "UPDATE processing_task
                 SET status = 'failed', completed_at = $1, error_message = $2
                 WHERE id = $3",
            )
            .bind(now)
            .bind(error)
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            warn!(
                subsystem = "db",
                component = "task_queue",
                task_id = %task_id,
                retry_count,
                error,
                "Task permanently failed, retries exhausted"
            );
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn recover_abandoned(&self, liveness_window: Duration) -> Result<u64> {
        let cutoff = Utc::now() - liveness_window;

        // A processing task is abandoned when its owning server has no
        // fresh heartbeat, including servers missing from the registry
        // entirely. Recovery does not consume a retry: a worker crash is an
        // infrastructure event, not a task failure.
        let result = sqlx::query(
            "UPDATE processing_task
             SET status = 'queued', owning_server_id = NULL, leased_at = NULL,
                 progress_percent = 0, progress_message = NULL
             WHERE status = 'processing'
               AND NOT EXISTS (
                   SELECT 1 FROM worker_registry w
                   WHERE w.server_id = processing_task.owning_server_id
                     AND w.last_heartbeat >= $1
               )",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let count = result.rows_affected();
        if count > 0 {
            warn!(
                subsystem = "db",
                component = "task_queue",
                op = "recover_abandoned",
                task_count = count,
                "Recovered abandoned tasks to queued"
            );
        }
        Ok(count)
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<ProcessingTask>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM processing_task WHERE id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.map(Self::parse_task_row))
    }

    async fn get_for_document(&self, document_id: Uuid) -> Result<Vec<ProcessingTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM processing_task
             WHERE document_id = $1 ORDER BY created_at DESC"
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.into_iter().map(Self::parse_task_row).collect())
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM processing_task WHERE status = 'queued'")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'queued') as queued,
                COUNT(*) FILTER (WHERE status = 'processing') as processing,
                COUNT(*) FILTER (WHERE status = 'completed' AND completed_at > NOW() - INTERVAL '1 hour') as completed_last_hour,
                COUNT(*) FILTER (WHERE status = 'failed' AND completed_at > NOW() - INTERVAL '1 hour') as failed_last_hour,
                COUNT(*) as total
             FROM processing_task",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            queued: row.get::<i64, _>("queued"),
            processing: row.get::<i64, _>("processing"),
            completed_last_hour: row.get::<i64, _>("completed_last_hour"),
            failed_last_hour: row.get::<i64, _>("failed_last_hour"),
            total: row.get::<i64, _>("total"),
        })
    }
}
