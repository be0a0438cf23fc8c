//! # decklens-core
//!
//! Core types, traits, and abstractions for the DeckLens processing layer.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the database, inference, and worker crates depend on. It performs no
//! I/O of its own.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
