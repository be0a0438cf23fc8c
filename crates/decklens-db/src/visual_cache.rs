//! Visual analysis cache repository.
//!
//! Keyed strictly by document_id; one entry per document. The cache read is
//! the single gate deciding whether the expensive vision stage runs for a
//! document, across any number of pipeline re-runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use decklens_core::{Error, PageAnalysis, Result, VisualAnalysisCache, VisualAnalysisEntry};

/// PostgreSQL implementation of the VisualAnalysisCache trait.
#[derive(Clone)]
pub struct PgVisualAnalysisCache {
    pool: Pool<Postgres>,
}

impl PgVisualAnalysisCache {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Result<VisualAnalysisEntry> {
        let pages_json: JsonValue = row.get("pages");
        let pages: Vec<PageAnalysis> = serde_json::from_value(pages_json)?;
        Ok(VisualAnalysisEntry {
            document_id: row.get("document_id"),
            pages,
            vision_model_used: row.get("vision_model_used"),
            prompt_used: row.get("prompt_used"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl VisualAnalysisCache for PgVisualAnalysisCache {
    async fn get(&self, document_id: Uuid) -> Result<Option<VisualAnalysisEntry>> {
        let row = sqlx::query(
            "SELECT document_id, pages, vision_model_used, prompt_used, created_at
             FROM visual_analysis_cache WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn get_many(
        &self,
        document_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, VisualAnalysisEntry>> {
        if document_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            "SELECT document_id, pages, vision_model_used, prompt_used, created_at
             FROM visual_analysis_cache WHERE document_id = ANY($1)",
        )
        .bind(document_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        // Only found entries appear in the map; missing keys are a normal
        // partial-hit outcome, not an error.
        let mut entries = HashMap::with_capacity(rows.len());
        for row in &rows {
            let entry = Self::parse_row(row)?;
            entries.insert(entry.document_id, entry);
        }
        debug!(
            subsystem = "db",
            component = "visual_cache",
            op = "get_many",
            requested = document_ids.len(),
            found = entries.len(),
            "Batch cache lookup"
        );
        Ok(entries)
    }

    async fn put(&self, entry: &VisualAnalysisEntry) -> Result<()> {
        let pages = serde_json::to_value(&entry.pages)?;
        let now = Utc::now();

        // Unconditional overwrite: a fresh run always wins. Concurrent
        // writers race and last-write-wins, since writes are idempotent
        // recomputations of the same stage.
        sqlx::query(
            "INSERT INTO visual_analysis_cache
                 (document_id, pages, vision_model_used, prompt_used, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (document_id) DO UPDATE SET
                 pages = EXCLUDED.pages,
                 vision_model_used = EXCLUDED.vision_model_used,
                 prompt_used = EXCLUDED.prompt_used,
                 created_at = EXCLUDED.created_at",
        )
        .bind(entry.document_id)
        .bind(&pages)
        .bind(&entry.vision_model_used)
        .bind(&entry.prompt_used)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "visual_cache",
            document_id = %entry.document_id,
            page_count = entry.pages.len(),
            "Cache entry written"
        );
        Ok(())
    }
}
