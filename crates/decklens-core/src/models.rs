//! Data model for the DeckLens processing layer.
//!
//! Covers the processing task queue, worker registration, the visual
//! analysis cache, template configuration, and the four independently
//! persisted result categories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;

// ---------------------------------------------------------------------------
// Task queue
// ---------------------------------------------------------------------------

/// Status of a processing task.
///
/// Status only moves forward through queued → processing → (completed |
/// failed); the single exception is retry, which resets a failed execution
/// back to queued with `retry_count` incremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Parse a status string from the database. Unknown values fall back to
    /// `Queued` so a bad row degrades into the normal lease flow.
    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => TaskStatus::Queued,
            "processing" => TaskStatus::Processing,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Queued,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Specialized analysis kinds, dispatched either inside the full pipeline or
/// as standalone sub-tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecializedKind {
    ClinicalValidation,
    RegulatoryPathway,
    ScientificHypothesis,
}

impl SpecializedKind {
    /// All specialized analysis kinds in dispatch order.
    pub const ALL: [SpecializedKind; 3] = [
        SpecializedKind::ClinicalValidation,
        SpecializedKind::RegulatoryPathway,
        SpecializedKind::ScientificHypothesis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpecializedKind::ClinicalValidation => "clinical_validation",
            SpecializedKind::RegulatoryPathway => "regulatory_pathway",
            SpecializedKind::ScientificHypothesis => "scientific_hypothesis",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "clinical_validation" => Some(SpecializedKind::ClinicalValidation),
            "regulatory_pathway" => Some(SpecializedKind::RegulatoryPathway),
            "scientific_hypothesis" => Some(SpecializedKind::ScientificHypothesis),
            _ => None,
        }
    }
}

impl std::fmt::Display for SpecializedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Type of a processing task.
///
/// `PdfAnalysis` drives a document's full pipeline; the `Specialized*`
/// variants run a single specialized analysis so it can be dispatched and
/// retried independently of template processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    PdfAnalysis,
    SpecializedClinicalValidation,
    SpecializedRegulatoryPathway,
    SpecializedScientificHypothesis,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::PdfAnalysis,
        TaskType::SpecializedClinicalValidation,
        TaskType::SpecializedRegulatoryPathway,
        TaskType::SpecializedScientificHypothesis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::PdfAnalysis => "pdf_analysis",
            TaskType::SpecializedClinicalValidation => "specialized_clinical_validation",
            TaskType::SpecializedRegulatoryPathway => "specialized_regulatory_pathway",
            TaskType::SpecializedScientificHypothesis => "specialized_scientific_hypothesis",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf_analysis" => Some(TaskType::PdfAnalysis),
            "specialized_clinical_validation" => Some(TaskType::SpecializedClinicalValidation),
            "specialized_regulatory_pathway" => Some(TaskType::SpecializedRegulatoryPathway),
            "specialized_scientific_hypothesis" => Some(TaskType::SpecializedScientificHypothesis),
            _ => None,
        }
    }

    /// Task type for a standalone specialized analysis sub-task.
    pub fn for_specialized(kind: SpecializedKind) -> Self {
        match kind {
            SpecializedKind::ClinicalValidation => TaskType::SpecializedClinicalValidation,
            SpecializedKind::RegulatoryPathway => TaskType::SpecializedRegulatoryPathway,
            SpecializedKind::ScientificHypothesis => TaskType::SpecializedScientificHypothesis,
        }
    }

    /// The specialized analysis kind, if this is a specialized sub-task.
    pub fn specialized_kind(&self) -> Option<SpecializedKind> {
        match self {
            TaskType::PdfAnalysis => None,
            TaskType::SpecializedClinicalValidation => Some(SpecializedKind::ClinicalValidation),
            TaskType::SpecializedRegulatoryPathway => Some(SpecializedKind::RegulatoryPathway),
            TaskType::SpecializedScientificHypothesis => {
                Some(SpecializedKind::ScientificHypothesis)
            }
        }
    }

    /// Capabilities a worker must advertise to lease this task type.
    pub fn required_capabilities(&self) -> &'static [Capability] {
        match self {
            TaskType::PdfAnalysis => &[
                Capability::VisualProcessing,
                Capability::TextProcessing,
                Capability::TemplateAnalysis,
            ],
            TaskType::SpecializedClinicalValidation
            | TaskType::SpecializedRegulatoryPathway
            | TaskType::SpecializedScientificHypothesis => {
                &[Capability::SpecializedAnalysis]
            }
        }
    }

    /// Task types leasable by a worker advertising `capabilities`.
    pub fn claimable_by(capabilities: &[Capability]) -> Vec<TaskType> {
        TaskType::ALL
            .iter()
            .copied()
            .filter(|tt| {
                tt.required_capabilities()
                    .iter()
                    .all(|cap| capabilities.contains(cap))
            })
            .collect()
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline stage capabilities a worker can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    VisualProcessing,
    TextProcessing,
    TemplateAnalysis,
    SpecializedAnalysis,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::VisualProcessing,
        Capability::TextProcessing,
        Capability::TemplateAnalysis,
        Capability::SpecializedAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::VisualProcessing => "visual_processing",
            Capability::TextProcessing => "text_processing",
            Capability::TemplateAnalysis => "template_analysis",
            Capability::SpecializedAnalysis => "specialized_analysis",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "visual_processing" => Some(Capability::VisualProcessing),
            "text_processing" => Some(Capability::TextProcessing),
            "template_analysis" => Some(Capability::TemplateAnalysis),
            "specialized_analysis" => Some(Capability::SpecializedAnalysis),
            _ => None,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of work: a document's full (or partial, for specialized
/// sub-tasks) analysis pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub id: Uuid,
    pub document_id: Uuid,
    pub company_id: Option<String>,
    pub file_path: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    /// Worker currently holding the lease. None when unleased. At most one
    /// worker holds a non-null lease on a task at any time.
    pub owning_server_id: Option<String>,
    pub progress_percent: i32,
    pub progress_message: Option<String>,
    pub error_message: Option<String>,
    pub result: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub leased_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Request to enqueue a new processing task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub document_id: Uuid,
    pub company_id: Option<String>,
    pub file_path: String,
    pub task_type: TaskType,
    pub max_retries: i32,
}

impl NewTask {
    /// Full-pipeline analysis task for a document.
    pub fn pdf_analysis(document_id: Uuid, file_path: impl Into<String>) -> Self {
        Self {
            document_id,
            company_id: None,
            file_path: file_path.into(),
            task_type: TaskType::PdfAnalysis,
            max_retries: defaults::TASK_MAX_RETRIES,
        }
    }

    /// Standalone specialized analysis sub-task.
    pub fn specialized(
        document_id: Uuid,
        file_path: impl Into<String>,
        kind: SpecializedKind,
    ) -> Self {
        Self {
            document_id,
            company_id: None,
            file_path: file_path.into(),
            task_type: TaskType::for_specialized(kind),
            max_retries: defaults::TASK_MAX_RETRIES,
        }
    }

    pub fn with_company_id(mut self, company_id: impl Into<String>) -> Self {
        self.company_id = Some(company_id.into());
        self
    }
}

/// Queue statistics summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: i64,
    pub processing: i64,
    pub completed_last_hour: i64,
    pub failed_last_hour: i64,
    pub total: i64,
}

// ---------------------------------------------------------------------------
// Worker registration
// ---------------------------------------------------------------------------

/// Registration record for a GPU worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    /// Unique per-process identifier, derived from host + pid.
    pub server_id: String,
    /// Capability tag for the node class (currently always "gpu").
    pub server_type: String,
    pub capabilities: Vec<Capability>,
    pub max_concurrent_tasks: i32,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl WorkerRegistration {
    /// Build a registration for this process with the given capabilities.
    pub fn for_process(capabilities: Vec<Capability>, max_concurrent_tasks: i32) -> Self {
        let now = Utc::now();
        Self {
            server_id: server_id_for_process(),
            server_type: "gpu".to_string(),
            capabilities,
            max_concurrent_tasks,
            registered_at: now,
            last_heartbeat: now,
        }
    }
}

/// Derive a unique server identifier for this process from host + pid.
pub fn server_id_for_process() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{}-{}", host, std::process::id())
}

// ---------------------------------------------------------------------------
// Visual analysis cache
// ---------------------------------------------------------------------------

/// One slide's visual analysis output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageAnalysis {
    pub page_number: i32,
    pub description: String,
    pub slide_image_path: Option<String>,
}

/// Cached visual analysis for a document, keyed one-to-one by document_id.
///
/// The cache survives across pipeline re-runs: re-analyzing the same document
/// with the same model/prompt hits this entry instead of recomputing. It is
/// never invalidated automatically, only overwritten by a fresh run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualAnalysisEntry {
    pub document_id: Uuid,
    pub pages: Vec<PageAnalysis>,
    pub vision_model_used: String,
    pub prompt_used: String,
    pub created_at: DateTime<Utc>,
}

impl VisualAnalysisEntry {
    pub fn new(
        document_id: Uuid,
        pages: Vec<PageAnalysis>,
        vision_model_used: impl Into<String>,
        prompt_used: impl Into<String>,
    ) -> Self {
        Self {
            document_id,
            pages,
            vision_model_used: vision_model_used.into(),
            prompt_used: prompt_used.into(),
            created_at: Utc::now(),
        }
    }

    /// All page descriptions concatenated in page order, for downstream
    /// text-model stages.
    pub fn combined_description(&self) -> String {
        self.pages
            .iter()
            .map(|p| format!("Slide {}: {}", p.page_number, p.description))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

// ---------------------------------------------------------------------------
// Template configuration
// ---------------------------------------------------------------------------

/// A weighted analysis question inside a template chapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// A weighted chapter of questions inside a review template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub questions: Vec<Question>,
}

/// A configured review template: ordered chapters of weighted questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub chapters: Vec<Chapter>,
    /// Specialized analyses this template enables inside the full pipeline.
    #[serde(default)]
    pub specialized_kinds: Vec<SpecializedKind>,
}

fn default_weight() -> f64 {
    1.0
}

// ---------------------------------------------------------------------------
// Result categories
// ---------------------------------------------------------------------------

/// Reviewer-style feedback for one slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideFeedback {
    pub page_number: i32,
    pub feedback: String,
}

/// Result category 1: visual analysis plus per-slide feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualAnalysisResult {
    pub pages: Vec<PageAnalysis>,
    pub slide_feedback: Vec<SlideFeedback>,
    pub vision_model_used: String,
}

/// Result category 2: extraction results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// One-sentence business summary of the company's offering.
    pub company_offering: String,
    pub classification: Option<String>,
    pub funding_amount: Option<String>,
    pub deck_date: Option<String>,
    pub company_name: Option<String>,
    pub model_used: String,
}

/// Per-question outcome within a chapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question: String,
    pub weight: f64,
    /// Model response, or an error string when the analysis call failed.
    pub response: String,
    /// 0–7 integer score. 0 when the analysis call failed.
    pub score: i32,
}

/// Per-chapter outcome: weighted mean of question scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterResult {
    pub name: String,
    pub weight: f64,
    pub score: f64,
    pub questions: Vec<QuestionResult>,
}

/// Result category 3: template/chapter/question scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateResult {
    pub template_name: String,
    /// Weighted mean of chapter scores by chapter weight.
    pub overall_score: f64,
    pub chapters: Vec<ChapterResult>,
}

/// Result category 4: specialized analyses. Only non-empty entries are
/// persisted; the category is independent of template processing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecializedResult {
    pub clinical_validation: Option<String>,
    pub regulatory_pathway: Option<String>,
    pub scientific_hypothesis: Option<String>,
}

impl SpecializedResult {
    pub fn get(&self, kind: SpecializedKind) -> Option<&str> {
        match kind {
            SpecializedKind::ClinicalValidation => self.clinical_validation.as_deref(),
            SpecializedKind::RegulatoryPathway => self.regulatory_pathway.as_deref(),
            SpecializedKind::ScientificHypothesis => self.scientific_hypothesis.as_deref(),
        }
    }

    pub fn set(&mut self, kind: SpecializedKind, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        match kind {
            SpecializedKind::ClinicalValidation => self.clinical_validation = Some(text),
            SpecializedKind::RegulatoryPathway => self.regulatory_pathway = Some(text),
            SpecializedKind::ScientificHypothesis => self.scientific_hypothesis = Some(text),
        }
    }

    /// Present (kind, text) entries, in `SpecializedKind::ALL` order.
    pub fn entries(&self) -> Vec<(SpecializedKind, &str)> {
        SpecializedKind::ALL
            .iter()
            .filter_map(|kind| self.get(*kind).map(|text| (*kind, text)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
