//! # decklens-worker
//!
//! The GPU worker process and analysis pipeline for DeckLens.
//!
//! This crate provides:
//! - The task worker: registration, heartbeats, polling, concurrent
//!   execution up to a per-worker ceiling
//! - The pipeline executor: visual analysis (cache-gated), offering
//!   extraction, classification, template scoring, specialized analyses
//! - Page rendering, sector classification, and progressive per-chapter
//!   delivery
//!
//! ## Example
//!
//! ```rust,ignore
//! use decklens_worker::{PdfAnalysisHandler, TaskWorker, WorkerConfig};
//! use decklens_db::Database;
//! use std::sync::Arc;
//!
//! let db = Database::connect("postgres://...").await?;
//! let worker = TaskWorker::new(
//!     Arc::new(db.tasks.clone()),
//!     Arc::new(db.workers.clone()),
//!     WorkerConfig::from_env(),
//! );
//! worker.register_handler(PdfAnalysisHandler::new(pipeline)).await;
//! let handle = worker.start();
//! handle.shutdown().await?;
//! ```

pub mod classify;
pub mod handler;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod scoring;
pub mod worker;

// Re-export core types
pub use decklens_core::*;

pub use classify::{Classifier, FallbackClassifier, HttpClassifier, KeywordClassifier};
pub use handler::{NoOpHandler, TaskContext, TaskHandler, TaskOutcome};
pub use pipeline::{DeckPipeline, PdfAnalysisHandler, SpecializedAnalysisHandler};
pub use progress::ProgressNotifier;
pub use render::{PageRenderer, PdftoppmRenderer, RenderedPage};
pub use worker::{TaskWorker, WorkerConfig, WorkerEvent, WorkerHandle};
