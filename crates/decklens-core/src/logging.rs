//! Structured logging schema and field name constants for DeckLens.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized field names across
//! every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), task completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration (per page, per question) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "inference", "worker"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "task_queue", "pipeline", "ollama", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim_next", "describe_page", "score_question"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Processing task UUID.
pub const TASK_ID: &str = "task_id";

/// Task type enum variant.
pub const TASK_TYPE: &str = "task_type";

/// Document UUID being analyzed.
pub const DOCUMENT_ID: &str = "document_id";

/// Worker server identifier (host + pid).
pub const SERVER_ID: &str = "server_id";

/// Pipeline stage name.
pub const STAGE: &str = "stage";

/// Template chapter name during scoring.
pub const CHAPTER: &str = "chapter";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of document pages processed.
pub const PAGE_COUNT: &str = "page_count";

/// Number of tasks recovered or affected.
pub const TASK_COUNT: &str = "task_count";

/// A question or chapter score.
pub const SCORE: &str = "score";

/// Byte length of a prompt or response.
pub const PROMPT_LEN: &str = "prompt_len";
