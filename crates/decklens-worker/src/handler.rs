//! Task handlers: the seam between the worker loop and pipeline execution.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use decklens_core::{ProcessingTask, TaskType};

/// Progress callback type for task handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to task handlers.
pub struct TaskContext {
    /// The leased task being processed.
    pub task: ProcessingTask,
    progress_callback: Option<ProgressCallback>,
}

impl TaskContext {
    pub fn new(task: ProcessingTask) -> Self {
        Self {
            task,
            progress_callback: None,
        }
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress to the callback. Advisory only.
    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    pub fn document_id(&self) -> Uuid {
        self.task.document_id
    }

    pub fn file_path(&self) -> &str {
        &self.task.file_path
    }
}

/// Result of task execution.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Task completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Task failed with an error message. Retry eligibility is decided by
    /// the queue, not the handler.
    Failed(String),
}

/// Trait for task handlers.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The task types this handler processes.
    fn task_types(&self) -> Vec<TaskType>;

    /// Execute the task.
    async fn execute(&self, ctx: TaskContext) -> TaskOutcome;
}

/// No-op handler for testing.
pub struct NoOpHandler {
    task_types: Vec<TaskType>,
}

impl NoOpHandler {
    pub fn new(task_types: Vec<TaskType>) -> Self {
        Self { task_types }
    }
}

#[async_trait]
impl TaskHandler for NoOpHandler {
    fn task_types(&self) -> Vec<TaskType> {
        self.task_types.clone()
    }

    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        ctx.report_progress(50, Some("Processing..."));
        ctx.report_progress(100, Some("Done"));
        TaskOutcome::Success(None)
    }
}
