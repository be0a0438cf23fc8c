//! Worker registry repository: registration and heartbeat-based liveness.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};

use decklens_core::{Capability, Error, Result, WorkerRegistration, WorkerRegistry};

/// PostgreSQL implementation of the WorkerRegistry trait.
#[derive(Clone)]
pub struct PgWorkerRegistry {
    pool: Pool<Postgres>,
}

impl PgWorkerRegistry {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> WorkerRegistration {
        let capabilities: Vec<String> = row.get("capabilities");
        WorkerRegistration {
            server_id: row.get("server_id"),
            server_type: row.get("server_type"),
            capabilities: capabilities
                .iter()
                .filter_map(|s| Capability::parse(s))
                .collect(),
            max_concurrent_tasks: row.get("max_concurrent_tasks"),
            registered_at: row.get("registered_at"),
            last_heartbeat: row.get("last_heartbeat"),
        }
    }
}

#[async_trait]
impl WorkerRegistry for PgWorkerRegistry {
    async fn register(&self, registration: &WorkerRegistration) -> Result<()> {
        let capabilities: Vec<String> = registration
            .capabilities
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();
        let now = Utc::now();

        // Idempotent: re-registration refreshes capabilities and limits.
        sqlx::query(
            "INSERT INTO worker_registry
                 (server_id, server_type, capabilities, max_concurrent_tasks,
                  registered_at, last_heartbeat)
             VALUES ($1, $2, $3, $4, $5, $5)
             ON CONFLICT (server_id) DO UPDATE SET
                 server_type = EXCLUDED.server_type,
                 capabilities = EXCLUDED.capabilities,
                 max_concurrent_tasks = EXCLUDED.max_concurrent_tasks,
                 last_heartbeat = EXCLUDED.last_heartbeat",
        )
        .bind(&registration.server_id)
        .bind(&registration.server_type)
        .bind(&capabilities)
        .bind(registration.max_concurrent_tasks)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "worker_registry",
            server_id = %registration.server_id,
            max_concurrent = registration.max_concurrent_tasks,
            "Worker registered"
        );
        Ok(())
    }

    async fn heartbeat(&self, server_id: &str) -> Result<()> {
        let now = Utc::now();
        let updated =
            sqlx::query("UPDATE worker_registry SET last_heartbeat = $1 WHERE server_id = $2")
                .bind(now)
                .bind(server_id)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            // Registration vanished (e.g. pruned while we were alive).
            return Err(Error::NotFound(format!(
                "worker registration: {}",
                server_id
            )));
        }
        debug!(
            subsystem = "db",
            component = "worker_registry",
            op = "heartbeat",
            server_id,
            "Heartbeat recorded"
        );
        Ok(())
    }

    async fn live_workers(&self, window: Duration) -> Result<Vec<WorkerRegistration>> {
        let cutoff = Utc::now() - window;
        let rows = sqlx::query(
            "SELECT server_id, server_type, capabilities, max_concurrent_tasks,
                    registered_at, last_heartbeat
             FROM worker_registry
             WHERE last_heartbeat >= $1
             ORDER BY server_id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn remove(&self, server_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM worker_registry WHERE server_id = $1")
            .bind(server_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
