//! Result store repository (Result Reconciler persistence).
//!
//! Four result categories per document, each persisted independently as its
//! pipeline stage completes so a crash after stage N preserves stages 1..N.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use decklens_core::{
    ChapterResult, Error, ExtractionResult, PageAnalysis, Result, ResultStore, SlideFeedback,
    SpecializedKind, SpecializedResult, TemplateResult, VisualAnalysisResult,
};

/// PostgreSQL implementation of the ResultStore trait.
#[derive(Clone)]
pub struct PgResultStore {
    pool: Pool<Postgres>,
}

impl PgResultStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn save_visual_analysis(
        &self,
        document_id: Uuid,
        result: &VisualAnalysisResult,
    ) -> Result<()> {
        let pages = serde_json::to_value(&result.pages)?;
        let feedback = serde_json::to_value(&result.slide_feedback)?;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO visual_analysis_result
                 (document_id, pages, slide_feedback, vision_model_used, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (document_id) DO UPDATE SET
                 pages = EXCLUDED.pages,
                 slide_feedback = EXCLUDED.slide_feedback,
                 vision_model_used = EXCLUDED.vision_model_used,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(document_id)
        .bind(&pages)
        .bind(&feedback)
        .bind(&result.vision_model_used)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "result_store",
            document_id = %document_id,
            page_count = result.pages.len(),
            "Visual analysis result saved"
        );
        Ok(())
    }

    async fn save_extraction(&self, document_id: Uuid, result: &ExtractionResult) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO extraction_result
                 (document_id, company_offering, classification, funding_amount,
                  deck_date, company_name, model_used, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (document_id) DO UPDATE SET
                 company_offering = EXCLUDED.company_offering,
                 classification = EXCLUDED.classification,
                 funding_amount = EXCLUDED.funding_amount,
                 deck_date = EXCLUDED.deck_date,
                 company_name = EXCLUDED.company_name,
                 model_used = EXCLUDED.model_used,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(document_id)
        .bind(&result.company_offering)
        .bind(&result.classification)
        .bind(&result.funding_amount)
        .bind(&result.deck_date)
        .bind(&result.company_name)
        .bind(&result.model_used)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "result_store",
            document_id = %document_id,
            "Extraction result saved"
        );
        Ok(())
    }

    async fn save_template_results(
        &self,
        document_id: Uuid,
        result: &TemplateResult,
    ) -> Result<()> {
        let chapters = serde_json::to_value(&result.chapters)?;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO template_result
                 (document_id, template_name, overall_score, chapters, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (document_id) DO UPDATE SET
                 template_name = EXCLUDED.template_name,
                 overall_score = EXCLUDED.overall_score,
                 chapters = EXCLUDED.chapters,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(document_id)
        .bind(&result.template_name)
        .bind(result.overall_score)
        .bind(&chapters)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "result_store",
            document_id = %document_id,
            score = result.overall_score,
            "Template result saved"
        );
        Ok(())
    }

    async fn save_specialized(
        &self,
        document_id: Uuid,
        result: &SpecializedResult,
    ) -> Result<()> {
        let entries = result.entries();
        if entries.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        for (kind, analysis) in entries {
            sqlx::query(
                "INSERT INTO specialized_result (document_id, kind, analysis, updated_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (document_id, kind) DO UPDATE SET
                     analysis = EXCLUDED.analysis,
                     updated_at = EXCLUDED.updated_at",
            )
            .bind(document_id)
            .bind(kind.as_str())
            .bind(analysis)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        }

        debug!(
            subsystem = "db",
            component = "result_store",
            document_id = %document_id,
            "Specialized analyses saved"
        );
        Ok(())
    }

    async fn get_visual_analysis(
        &self,
        document_id: Uuid,
    ) -> Result<Option<VisualAnalysisResult>> {
        let row = sqlx::query(
            "SELECT pages, slide_feedback, vision_model_used
             FROM visual_analysis_result WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => {
                let pages_json: JsonValue = row.get("pages");
                let feedback_json: JsonValue = row.get("slide_feedback");
                let pages: Vec<PageAnalysis> = serde_json::from_value(pages_json)?;
                let slide_feedback: Vec<SlideFeedback> = serde_json::from_value(feedback_json)?;
                Ok(Some(VisualAnalysisResult {
                    pages,
                    slide_feedback,
                    vision_model_used: row.get("vision_model_used"),
                }))
            }
            None => Ok(None),
        }
    }

    async fn get_extraction(&self, document_id: Uuid) -> Result<Option<ExtractionResult>> {
        let row = sqlx::query(
            "SELECT company_offering, classification, funding_amount, deck_date,
                    company_name, model_used
             FROM extraction_result WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| ExtractionResult {
            company_offering: row.get("company_offering"),
            classification: row.get("classification"),
            funding_amount: row.get("funding_amount"),
            deck_date: row.get("deck_date"),
            company_name: row.get("company_name"),
            model_used: row.get("model_used"),
        }))
    }

    async fn get_template_results(&self, document_id: Uuid) -> Result<Option<TemplateResult>> {
        let row = sqlx::query(
            "SELECT template_name, overall_score, chapters
             FROM template_result WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => {
                let chapters_json: JsonValue = row.get("chapters");
                let chapters: Vec<ChapterResult> = serde_json::from_value(chapters_json)?;
                Ok(Some(TemplateResult {
                    template_name: row.get("template_name"),
                    overall_score: row.get("overall_score"),
                    chapters,
                }))
            }
            None => Ok(None),
        }
    }

    async fn get_specialized(&self, document_id: Uuid) -> Result<SpecializedResult> {
        let rows = sqlx::query(
            "SELECT kind, analysis FROM specialized_result WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut result = SpecializedResult::default();
        for row in rows {
            let kind_str: String = row.get("kind");
            let analysis: String = row.get("analysis");
            if let Some(kind) = SpecializedKind::parse(&kind_str) {
                result.set(kind, analysis);
            }
        }
        Ok(result)
    }
}
