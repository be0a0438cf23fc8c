//! # decklens-db
//!
//! PostgreSQL persistence layer for the DeckLens processing queue.
//!
//! This crate provides:
//! - Connection pool management
//! - The task queue repository (atomic lease, retry policy, abandoned-task
//!   recovery)
//! - The worker registry (registration + heartbeat liveness)
//! - The visual analysis cache
//! - The result store for the four per-document result categories
//!
//! ## Example
//!
//! ```rust,ignore
//! use decklens_db::Database;
//! use decklens_core::{NewTask, TaskQueue};
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/decklens").await?;
//!     let task_id = db
//!         .tasks
//!         .enqueue(NewTask::pdf_analysis(Uuid::new_v4(), "uploads/x/x.pdf"))
//!         .await?;
//!     println!("Enqueued task: {}", task_id);
//!     Ok(())
//! }
//! ```

pub mod pool;
pub mod results;
pub mod tasks;
pub mod visual_cache;
pub mod workers;

// Re-export core types
pub use decklens_core::*;

pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use results::PgResultStore;
pub use tasks::PgTaskQueue;
pub use visual_cache::PgVisualAnalysisCache;
pub use workers::PgWorkerRegistry;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Task queue repository (the Queue Manager).
    pub tasks: PgTaskQueue,
    /// Worker registry for registration and heartbeats.
    pub workers: PgWorkerRegistry,
    /// Visual analysis cache.
    pub visual_cache: PgVisualAnalysisCache,
    /// Result store for the four result categories.
    pub results: PgResultStore,
}

impl Database {
    /// Build a database context from an existing pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            tasks: PgTaskQueue::new(pool.clone()),
            workers: PgWorkerRegistry::new(pool.clone()),
            visual_cache: PgVisualAnalysisCache::new(pool.clone()),
            results: PgResultStore::new(pool.clone()),
            pool,
        }
    }

    /// Connect with default pool configuration.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Run pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Internal(format!("Migration failed: {}", e)))?;
        Ok(())
    }
}
