//! Centralized default constants for the DeckLens processing layer.
//!
//! **This module is the single source of truth** for all shared default
//! values. The worker, database, and inference crates reference these
//! constants instead of defining their own magic numbers.

// =============================================================================
// WORKER COORDINATION
// =============================================================================

/// Heartbeat interval for worker liveness reporting.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Polling interval when the queue is empty (milliseconds).
pub const POLL_INTERVAL_MS: u64 = 5000;

/// A worker is considered dead once its last heartbeat is older than this.
/// Four missed heartbeats, so a single dropped request never triggers
/// task recovery.
pub const LIVENESS_WINDOW_SECS: i64 = 120;

/// Default maximum concurrent tasks per worker process.
pub const MAX_CONCURRENT_TASKS: usize = 2;

/// Default maximum retries before a task is permanently failed.
pub const TASK_MAX_RETRIES: i32 = 3;

/// Local bound on a single task execution inside the worker. The queue itself
/// enforces no per-task deadline; this only keeps a wedged model call from
/// pinning a concurrency slot forever.
pub const TASK_TIMEOUT_SECS: u64 = 3600;

/// Worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// SCORING
// =============================================================================

/// Minimum question score.
pub const SCORE_MIN: i32 = 0;

/// Maximum question score.
pub const SCORE_MAX: i32 = 7;

/// Middle score used when the scoring model output cannot be parsed.
pub const SCORE_FALLBACK: i32 = 3;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://localhost:11434";

/// Timeout for a single vision-model call (per page).
pub const VISION_TIMEOUT_SECS: u64 = 120;

/// Timeout for a single analysis generation call.
pub const GENERATION_TIMEOUT_SECS: u64 = 120;

/// Timeout for a single scoring-model call. The scoring model is expected
/// to be small and fast.
pub const SCORING_TIMEOUT_SECS: u64 = 30;

/// Default prompt used for per-page visual analysis. Stored with each cache
/// entry so a prompt change is visible as provenance.
pub const VISION_PROMPT: &str =
    "Describe this pitch deck slide in detail. Include any text visible on the slide.";

// =============================================================================
// PAGE RENDERING
// =============================================================================

/// DPI for rendering document pages to images.
pub const RENDER_DPI: u32 = 150;

/// Timeout for the external page-rendering command.
pub const RENDER_CMD_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// CALLBACKS
// =============================================================================

/// Timeout for progress callback HTTP requests.
pub const PROGRESS_CALLBACK_TIMEOUT_SECS: u64 = 10;

/// Timeout for the external classification service.
pub const CLASSIFICATION_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// ENVIRONMENT VARIABLE NAMES
// =============================================================================

/// PostgreSQL connection string.
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// Ollama base URL override.
pub const ENV_OLLAMA_URL: &str = "OLLAMA_URL";

/// Vision model name (required for the visual stage).
pub const ENV_VISION_MODEL: &str = "DECKLENS_VISION_MODEL";

/// Analysis generation model name.
pub const ENV_ANALYSIS_MODEL: &str = "DECKLENS_ANALYSIS_MODEL";

/// Scoring model name (deliberately a smaller model than analysis).
pub const ENV_SCORING_MODEL: &str = "DECKLENS_SCORING_MODEL";

/// Max concurrent tasks override.
pub const ENV_MAX_CONCURRENT: &str = "DECKLENS_MAX_CONCURRENT";

/// Poll interval override (milliseconds).
pub const ENV_POLL_INTERVAL_MS: &str = "DECKLENS_POLL_INTERVAL_MS";

/// Heartbeat interval override (seconds).
pub const ENV_HEARTBEAT_INTERVAL_SECS: &str = "DECKLENS_HEARTBEAT_INTERVAL_SECS";

/// Classification service URL (keyword fallback used when unset).
pub const ENV_CLASSIFICATION_URL: &str = "DECKLENS_CLASSIFICATION_URL";

/// Progress callback URL for progressive per-chapter delivery.
pub const ENV_PROGRESS_CALLBACK_URL: &str = "DECKLENS_PROGRESS_CALLBACK_URL";

/// Path to the review template JSON. Template scoring is skipped when unset.
pub const ENV_TEMPLATE_PATH: &str = "DECKLENS_TEMPLATE_PATH";

/// Directory for persisted slide images. Rendered pages stay in a temp dir
/// when unset.
pub const ENV_SLIDE_DIR: &str = "DECKLENS_SLIDE_DIR";
