//! # decklens-inference
//!
//! Model inference backends for DeckLens deck analysis.
//!
//! Two backend seams, both served by Ollama in production:
//! - [`VisionBackend`]: slide-image description (`/api/generate` with images)
//! - [`GenerationBackend`]: text analysis and scoring (`/api/chat`)
//!
//! The pipeline holds three logical roles (vision, analysis, scoring), each
//! of which may point at a different model on the same Ollama instance.
//! [`mock`] provides deterministic in-process backends for tests.

pub mod generation;
pub mod mock;
pub mod vision;

pub use generation::{GenerationBackend, OllamaGenerationBackend};
pub use vision::{OllamaVisionBackend, VisionBackend};
