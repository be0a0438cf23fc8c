//! Multi-stage deck analysis pipeline.
//!
//! Stage order: visual analysis (cache-gated) → offering extraction →
//! classification → template scoring → specialized analysis. Each stage's
//! output is persisted as soon as it completes, so a crash after stage N
//! preserves stages 1..N and a re-run skips the expensive visual pass via
//! the cache.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use decklens_core::{
    defaults, ChapterResult, Error, ExtractionResult, PageAnalysis, Question, QuestionResult,
    Result, ResultStore, SlideFeedback, SpecializedKind, SpecializedResult, Template,
    TemplateResult, VisualAnalysisCache, VisualAnalysisEntry, VisualAnalysisResult,
};
use decklens_inference::{GenerationBackend, VisionBackend};

use crate::classify::Classifier;
use crate::handler::{TaskContext, TaskHandler, TaskOutcome};
use crate::progress::ProgressNotifier;
use crate::render::PageRenderer;
use crate::scoring::{parse_score, weighted_mean};

const OFFERING_SYSTEM: &str = "You are a venture analyst. Given the slide-by-slide description \
of a pitch deck, state in one sentence what the company offers. Respond with only that sentence.";

const METADATA_SYSTEM: &str = "You are a venture analyst. From the pitch deck description, \
extract metadata as JSON with keys company_name, funding_amount, deck_date. Use null for \
anything not stated in the deck.";

const FEEDBACK_SYSTEM: &str = "You are a pitch coach reviewing a deck slide by slide. Respond \
with a JSON array of objects with keys page_number and feedback, one per slide, each feedback \
a short actionable suggestion.";

const ANALYSIS_SYSTEM: &str = "You are a venture analyst reviewing a pitch deck. Answer the \
question concisely based only on the deck content provided.";

const SCORING_SYSTEM: &str = "You are a strict reviewer. Given a question about a pitch deck \
and an analyst's answer, respond with a single integer score from 0 (not addressed) to 7 \
(fully convincing). Respond with only the number.";

fn specialized_system(kind: SpecializedKind) -> &'static str {
    match kind {
        SpecializedKind::ClinicalValidation => {
            "You are a clinical affairs expert. Assess the clinical validation evidence in \
             this pitch deck: study design, endpoints, cohort sizes, and what remains unproven."
        }
        SpecializedKind::RegulatoryPathway => {
            "You are a regulatory affairs expert. Assess the likely regulatory pathway for \
             this company's product, expected classification, and key approval risks."
        }
        SpecializedKind::ScientificHypothesis => {
            "You are a scientific reviewer. State the core scientific hypothesis behind this \
             company's product and assess its plausibility and supporting evidence."
        }
    }
}

/// The pipeline executor. Holds every collaborator behind a trait object so
/// tests can substitute deterministic fakes.
pub struct DeckPipeline {
    cache: Arc<dyn VisualAnalysisCache>,
    results: Arc<dyn ResultStore>,
    vision: Arc<dyn VisionBackend>,
    analysis: Arc<dyn GenerationBackend>,
    scoring: Arc<dyn GenerationBackend>,
    renderer: Arc<dyn PageRenderer>,
    classifier: Arc<dyn Classifier>,
    progress: Option<ProgressNotifier>,
    template: Option<Template>,
}

#[derive(Deserialize, Default)]
struct DeckMetadata {
    company_name: Option<String>,
    funding_amount: Option<String>,
    deck_date: Option<String>,
}

#[derive(Deserialize)]
struct FeedbackRow {
    page_number: i32,
    feedback: String,
}

impl DeckPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<dyn VisualAnalysisCache>,
        results: Arc<dyn ResultStore>,
        vision: Arc<dyn VisionBackend>,
        analysis: Arc<dyn GenerationBackend>,
        scoring: Arc<dyn GenerationBackend>,
        renderer: Arc<dyn PageRenderer>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            cache,
            results,
            vision,
            analysis,
            scoring,
            renderer,
            classifier,
            progress: None,
            template: None,
        }
    }

    pub fn with_template(mut self, template: Template) -> Self {
        self.template = Some(template);
        self
    }

    pub fn with_progress_notifier(mut self, notifier: ProgressNotifier) -> Self {
        self.progress = Some(notifier);
        self
    }

    /// Full pipeline for a pdf_analysis task. Returns a summary of what was
    /// produced, stored on the task row.
    pub async fn run_full(&self, ctx: &TaskContext) -> Result<JsonValue> {
        let document_id = ctx.document_id();

        ctx.report_progress(5, Some("Analyzing slides"));
        let entry = self.visual_stage(ctx).await?;

        ctx.report_progress(25, Some("Generating slide feedback"));
        let feedback = self.slide_feedback(&entry).await;
        self.results
            .save_visual_analysis(
                document_id,
                &VisualAnalysisResult {
                    pages: entry.pages.clone(),
                    slide_feedback: feedback,
                    vision_model_used: entry.vision_model_used.clone(),
                },
            )
            .await?;

        ctx.report_progress(35, Some("Extracting company offering"));
        let extraction = self.extraction_stage(&entry).await?;
        self.results.save_extraction(document_id, &extraction).await?;

        let template_result = self.template_stage(ctx, &entry, &extraction).await?;

        ctx.report_progress(92, Some("Running specialized analyses"));
        let kinds: Vec<SpecializedKind> = self
            .template
            .as_ref()
            .map(|t| t.specialized_kinds.clone())
            .unwrap_or_default();
        let specialized = self.specialized_stage(&entry, &kinds).await;
        self.results.save_specialized(document_id, &specialized).await?;

        ctx.report_progress(100, Some("Analysis complete"));
        info!(
            subsystem = "worker",
            component = "pipeline",
            document_id = %document_id,
            page_count = entry.pages.len(),
            "Pipeline complete"
        );

        Ok(json!({
            "page_count": entry.pages.len(),
            "classification": extraction.classification,
            "overall_score": template_result.as_ref().map(|t| t.overall_score),
            "specialized_kinds": specialized
                .entries()
                .iter()
                .map(|(kind, _)| kind.as_str())
                .collect::<Vec<_>>(),
        }))
    }

    /// Standalone specialized sub-task: one analysis kind, reusing the
    /// visual cache. Does not rewrite the visual result category.
    pub async fn run_specialized(
        &self,
        ctx: &TaskContext,
        kind: SpecializedKind,
    ) -> Result<JsonValue> {
        let document_id = ctx.document_id();

        ctx.report_progress(10, Some("Analyzing slides"));
        let entry = self.visual_stage(ctx).await?;

        ctx.report_progress(50, Some("Running specialized analysis"));
        let text = self
            .analysis
            .generate_with_system(specialized_system(kind), &entry.combined_description())
            .await?;

        let mut result = SpecializedResult::default();
        result.set(kind, text);
        if result.is_empty() {
            return Err(Error::Inference(format!(
                "Empty {} analysis for document {}",
                kind, document_id
            )));
        }
        self.results.save_specialized(document_id, &result).await?;

        ctx.report_progress(100, Some("Analysis complete"));
        Ok(json!({ "kind": kind.as_str() }))
    }

    /// Visual analysis, gated by the cache. The cache read is the single
    /// decision point for whether the vision model runs at all.
    async fn visual_stage(&self, ctx: &TaskContext) -> Result<VisualAnalysisEntry> {
        let document_id = ctx.document_id();

        if let Some(entry) = self.cache.get(document_id).await? {
            info!(
                subsystem = "worker",
                component = "pipeline",
                stage = "visual",
                document_id = %document_id,
                page_count = entry.pages.len(),
                "Visual analysis cache hit"
            );
            return Ok(entry);
        }

        let rendered = self.renderer.render_pages(ctx.file_path()).await?;
        let mut pages = Vec::with_capacity(rendered.len());
        for page in rendered {
            let description = self
                .vision
                .describe_image(&page.data, "image/png", Some(defaults::VISION_PROMPT))
                .await?;
            pages.push(PageAnalysis {
                page_number: page.page_number,
                description,
                slide_image_path: page.image_path,
            });
        }

        let entry = VisualAnalysisEntry::new(
            document_id,
            pages,
            self.vision.model_name(),
            defaults::VISION_PROMPT,
        );
        self.cache.put(&entry).await?;
        Ok(entry)
    }

    /// One generation call producing per-slide feedback. Parse failures
    /// degrade to empty feedback rather than failing the stage.
    async fn slide_feedback(&self, entry: &VisualAnalysisEntry) -> Vec<SlideFeedback> {
        let raw = match self
            .analysis
            .generate_json(FEEDBACK_SYSTEM, &entry.combined_description())
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    subsystem = "worker",
                    component = "pipeline",
                    stage = "feedback",
                    document_id = %entry.document_id,
                    error = %e,
                    "Slide feedback generation failed"
                );
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<FeedbackRow>>(&raw) {
            Ok(rows) => rows
                .into_iter()
                .map(|r| SlideFeedback {
                    page_number: r.page_number,
                    feedback: r.feedback,
                })
                .collect(),
            Err(e) => {
                warn!(
                    subsystem = "worker",
                    component = "pipeline",
                    stage = "feedback",
                    document_id = %entry.document_id,
                    error = %e,
                    "Unparseable slide feedback, continuing without it"
                );
                Vec::new()
            }
        }
    }

    /// Offering extraction plus metadata plus classification.
    async fn extraction_stage(&self, entry: &VisualAnalysisEntry) -> Result<ExtractionResult> {
        let combined = entry.combined_description();

        let offering = self
            .analysis
            .generate_with_system(OFFERING_SYSTEM, &combined)
            .await?;
        let offering = offering.trim().to_string();

        // Metadata is best-effort; a malformed response leaves the fields
        // null instead of failing the stage.
        let metadata = match self.analysis.generate_json(METADATA_SYSTEM, &combined).await {
            Ok(raw) => serde_json::from_str::<DeckMetadata>(&raw).unwrap_or_else(|e| {
                warn!(
                    subsystem = "worker",
                    component = "pipeline",
                    stage = "extraction",
                    document_id = %entry.document_id,
                    error = %e,
                    "Unparseable deck metadata"
                );
                DeckMetadata::default()
            }),
            Err(e) => {
                warn!(
                    subsystem = "worker",
                    component = "pipeline",
                    stage = "extraction",
                    document_id = %entry.document_id,
                    error = %e,
                    "Metadata extraction failed"
                );
                DeckMetadata::default()
            }
        };

        let classification = match self.classifier.classify(&offering).await {
            Ok(classification) => classification,
            Err(e) => {
                warn!(
                    subsystem = "worker",
                    component = "pipeline",
                    stage = "classification",
                    document_id = %entry.document_id,
                    error = %e,
                    "Classification failed"
                );
                None
            }
        };

        Ok(ExtractionResult {
            company_offering: offering,
            classification,
            funding_amount: metadata.funding_amount,
            deck_date: metadata.deck_date,
            company_name: metadata.company_name,
            model_used: self.analysis.model_name().to_string(),
        })
    }

    /// Template scoring with progressive per-chapter delivery. Returns None
    /// when no template is configured.
    async fn template_stage(
        &self,
        ctx: &TaskContext,
        entry: &VisualAnalysisEntry,
        extraction: &ExtractionResult,
    ) -> Result<Option<TemplateResult>> {
        let Some(template) = &self.template else {
            return Ok(None);
        };

        let document_id = ctx.document_id();
        let context_text = format!(
            "Company offering: {}\n\nDeck contents:\n{}",
            extraction.company_offering,
            entry.combined_description()
        );

        let chapter_count = template.chapters.len().max(1);
        let mut chapters = Vec::with_capacity(template.chapters.len());
        for (i, chapter) in template.chapters.iter().enumerate() {
            if let Some(notifier) = &self.progress {
                notifier
                    .notify(document_id, &chapter.name, "processing", None)
                    .await;
            }
            ctx.report_progress(
                40 + (50 * i / chapter_count) as i32,
                Some(&format!("Scoring chapter: {}", chapter.name)),
            );

            let mut questions = Vec::with_capacity(chapter.questions.len());
            for question in &chapter.questions {
                questions.push(self.score_question(question, &context_text).await);
            }

            let score = weighted_mean(
                &questions
                    .iter()
                    .map(|q| (q.score as f64, q.weight))
                    .collect::<Vec<_>>(),
            );
            let result = ChapterResult {
                name: chapter.name.clone(),
                weight: chapter.weight,
                score,
                questions,
            };

            if let Some(notifier) = &self.progress {
                notifier
                    .notify(document_id, &chapter.name, "completed", Some(&result))
                    .await;
            }
            chapters.push(result);
        }

        let overall_score = weighted_mean(
            &chapters
                .iter()
                .map(|c| (c.score, c.weight))
                .collect::<Vec<_>>(),
        );
        let result = TemplateResult {
            template_name: template.name.clone(),
            overall_score,
            chapters,
        };
        self.results
            .save_template_results(document_id, &result)
            .await?;

        info!(
            subsystem = "worker",
            component = "pipeline",
            stage = "template",
            document_id = %document_id,
            score = overall_score,
            "Template scoring complete"
        );
        Ok(Some(result))
    }

    /// One question: an analysis call and a separate scoring call. Any
    /// failure records an error response and score 0 so sibling questions
    /// keep running.
    async fn score_question(&self, question: &Question, context_text: &str) -> QuestionResult {
        let prompt = format!("{}\n\nQuestion: {}", context_text, question.text);

        let response = match self
            .analysis
            .generate_with_system(ANALYSIS_SYSTEM, &prompt)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    subsystem = "worker",
                    component = "pipeline",
                    stage = "template",
                    question = %question.text,
                    error = %e,
                    "Question analysis failed"
                );
                return QuestionResult {
                    question: question.text.clone(),
                    weight: question.weight,
                    response: format!("Analysis failed: {}", e),
                    score: 0,
                };
            }
        };

        let score_prompt = format!(
            "Question: {}\n\nAnalyst answer: {}",
            question.text, response
        );
        let score = match self
            .scoring
            .generate_with_system(SCORING_SYSTEM, &score_prompt)
            .await
        {
            Ok(raw) => parse_score(&raw),
            Err(e) => {
                warn!(
                    subsystem = "worker",
                    component = "pipeline",
                    stage = "template",
                    question = %question.text,
                    error = %e,
                    "Question scoring failed"
                );
                return QuestionResult {
                    question: question.text.clone(),
                    weight: question.weight,
                    response: format!("Scoring failed: {}", e),
                    score: 0,
                };
            }
        };

        QuestionResult {
            question: question.text.clone(),
            weight: question.weight,
            response,
            score,
        }
    }

    /// Specialized analyses inside the full pipeline. Per-kind failures are
    /// logged and skipped; the result holds whatever succeeded.
    async fn specialized_stage(
        &self,
        entry: &VisualAnalysisEntry,
        kinds: &[SpecializedKind],
    ) -> SpecializedResult {
        let mut result = SpecializedResult::default();
        let combined = entry.combined_description();

        for kind in kinds {
            match self
                .analysis
                .generate_with_system(specialized_system(*kind), &combined)
                .await
            {
                Ok(text) => result.set(*kind, text),
                Err(e) => {
                    warn!(
                        subsystem = "worker",
                        component = "pipeline",
                        stage = "specialized",
                        kind = %kind,
                        document_id = %entry.document_id,
                        error = %e,
                        "Specialized analysis failed, skipping kind"
                    );
                }
            }
        }
        result
    }
}

/// Handler for full-pipeline pdf_analysis tasks.
pub struct PdfAnalysisHandler {
    pipeline: Arc<DeckPipeline>,
}

impl PdfAnalysisHandler {
    pub fn new(pipeline: Arc<DeckPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait::async_trait]
impl TaskHandler for PdfAnalysisHandler {
    fn task_types(&self) -> Vec<decklens_core::TaskType> {
        vec![decklens_core::TaskType::PdfAnalysis]
    }

    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        match self.pipeline.run_full(&ctx).await {
            Ok(summary) => TaskOutcome::Success(Some(summary)),
            Err(e) => TaskOutcome::Failed(e.to_string()),
        }
    }
}

/// Handler for standalone specialized analysis sub-tasks.
pub struct SpecializedAnalysisHandler {
    pipeline: Arc<DeckPipeline>,
}

impl SpecializedAnalysisHandler {
    pub fn new(pipeline: Arc<DeckPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait::async_trait]
impl TaskHandler for SpecializedAnalysisHandler {
    fn task_types(&self) -> Vec<decklens_core::TaskType> {
        SpecializedKind::ALL
            .iter()
            .map(|kind| decklens_core::TaskType::for_specialized(*kind))
            .collect()
    }

    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        let Some(kind) = ctx.task.task_type.specialized_kind() else {
            return TaskOutcome::Failed(format!(
                "Not a specialized task type: {}",
                ctx.task.task_type
            ));
        };
        match self.pipeline.run_specialized(&ctx, kind).await {
            Ok(summary) => TaskOutcome::Success(Some(summary)),
            Err(e) => TaskOutcome::Failed(e.to_string()),
        }
    }
}
