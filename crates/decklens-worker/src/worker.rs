//! The GPU worker process: registration, heartbeats, polling, and concurrent
//! task execution.
//!
//! Two independent loops run for the process lifetime: the heartbeat loop
//! keeps the registration live (and re-registers after a failed beat), and
//! the polling loop leases tasks up to the concurrency ceiling. Heartbeat
//! cadence is never blocked by task execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use decklens_core::{
    defaults, server_id_for_process, Capability, ProcessingTask, Result, TaskQueue, TaskType,
    WorkerRegistration, WorkerRegistry,
};

use crate::handler::{TaskContext, TaskHandler, TaskOutcome};

/// Configuration for the task worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique per-process identifier (host + pid by default).
    pub server_id: String,
    /// Pipeline capabilities this worker advertises.
    pub capabilities: Vec<Capability>,
    /// Maximum number of concurrent tasks.
    pub max_concurrent_tasks: usize,
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Whether to enable task processing.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            server_id: server_id_for_process(),
            capabilities: Capability::ALL.to_vec(),
            max_concurrent_tasks: defaults::MAX_CONCURRENT_TASKS,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            heartbeat_interval_secs: defaults::HEARTBEAT_INTERVAL_SECS,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DECKLENS_MAX_CONCURRENT` | `2` | Max concurrent tasks |
    /// | `DECKLENS_POLL_INTERVAL_MS` | `5000` | Polling interval when queue is empty |
    /// | `DECKLENS_HEARTBEAT_INTERVAL_SECS` | `30` | Heartbeat interval |
    pub fn from_env() -> Self {
        let max_concurrent_tasks = std::env::var(defaults::ENV_MAX_CONCURRENT)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::MAX_CONCURRENT_TASKS)
            .max(1);

        let poll_interval_ms = std::env::var(defaults::ENV_POLL_INTERVAL_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::POLL_INTERVAL_MS);

        let heartbeat_interval_secs = std::env::var(defaults::ENV_HEARTBEAT_INTERVAL_SECS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::HEARTBEAT_INTERVAL_SECS);

        Self {
            max_concurrent_tasks,
            poll_interval_ms,
            heartbeat_interval_secs,
            ..Default::default()
        }
    }

    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = server_id.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the task worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A task was leased and started.
    TaskStarted { task_id: Uuid, task_type: TaskType },
    /// Task progress was updated.
    TaskProgress {
        task_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    /// A task completed successfully.
    TaskCompleted { task_id: Uuid, task_type: TaskType },
    /// A task failed (the queue decides retry eligibility).
    TaskFailed {
        task_id: Uuid,
        task_type: TaskType,
        error: String,
    },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully. In-flight tasks finish;
    /// no new tasks are leased.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx.send(()).await.map_err(|_| {
            decklens_core::Error::Internal("Failed to send shutdown signal".into())
        })?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Task worker that leases and executes processing tasks.
pub struct TaskWorker {
    queue: Arc<dyn TaskQueue>,
    registry: Arc<dyn WorkerRegistry>,
    config: WorkerConfig,
    handlers: Arc<RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl TaskWorker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        registry: Arc<dyn WorkerRegistry>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            queue,
            registry,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Register a handler for each task type it declares.
    pub async fn register_handler<H: TaskHandler + 'static>(&self, handler: H) {
        let handler: Arc<dyn TaskHandler> = Arc::new(handler);
        let mut handlers = self.handlers.write().await;
        for task_type in handler.task_types() {
            handlers.insert(task_type, handler.clone());
            debug!(%task_type, "Registered task handler");
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Get the pending task count.
    pub async fn pending_count(&self) -> Result<i64> {
        self.queue.pending_count().await
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let worker = Arc::new(self);
        let poll_worker = worker.clone();
        let heartbeat_worker = worker.clone();

        tokio::spawn(async move {
            let heartbeat = tokio::spawn(async move {
                heartbeat_worker.heartbeat_loop().await;
            });
            poll_worker.run(&mut shutdown_rx).await;
            heartbeat.abort();
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    fn registration(&self) -> WorkerRegistration {
        let now = Utc::now();
        WorkerRegistration {
            server_id: self.config.server_id.clone(),
            server_type: "gpu".to_string(),
            capabilities: self.config.capabilities.clone(),
            max_concurrent_tasks: self.config.max_concurrent_tasks as i32,
            registered_at: now,
            last_heartbeat: now,
        }
    }

    /// Heartbeat loop, independent of the polling loop. A failed beat is
    /// followed by a re-registration attempt on the same tick.
    async fn heartbeat_loop(&self) {
        let interval = Duration::from_secs(self.config.heartbeat_interval_secs);
        loop {
            sleep(interval).await;
            if let Err(e) = self.registry.heartbeat(&self.config.server_id).await {
                warn!(
                    server_id = %self.config.server_id,
                    error = %e,
                    "Heartbeat failed, re-registering"
                );
                if let Err(e) = self.registry.register(&self.registration()).await {
                    error!(
                        server_id = %self.config.server_id,
                        error = %e,
                        "Re-registration failed"
                    );
                }
            }
        }
    }

    /// Run the worker loop with concurrent task processing.
    ///
    /// Registers, recovers abandoned tasks, then keeps a persistent
    /// in-flight set: completed executions are reaped each tick and any
    /// free slot is refilled from the queue immediately, independent of
    /// still-running tasks. Only sleeps when no slot can be filled.
    #[instrument(skip(self, shutdown_rx), fields(server_id = %self.config.server_id))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Task worker is disabled, not starting");
            return;
        }

        if let Err(e) = self.registry.register(&self.registration()).await {
            error!(error = %e, "Initial registration failed, worker not starting");
            return;
        }

        // Startup recovery is idempotent and bounded by the liveness check,
        // so every worker attempting it is safe.
        match self
            .queue
            .recover_abandoned(chrono::Duration::seconds(defaults::LIVENESS_WINDOW_SECS))
            .await
        {
            Ok(0) => {}
            Ok(recovered) => info!(task_count = recovered, "Recovered abandoned tasks"),
            Err(e) => warn!(error = %e, "Abandoned-task recovery failed"),
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_tasks,
            capabilities = ?self.config.capabilities,
            "Task worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_concurrent = self.config.max_concurrent_tasks;

        // The in-flight set persists across polling ticks: a free slot is
        // refilled as soon as the queue has work, without waiting for the
        // other slots to drain.
        let mut tasks = tokio::task::JoinSet::new();

        loop {
            // Reap whatever finished since the last tick.
            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    error!(error = ?e, "Task execution panicked");
                }
            }

            // Refill free slots from the queue.
            while tasks.len() < max_concurrent {
                match self.claim_task().await {
                    Some(task) => {
                        let worker = self.clone_refs();
                        tasks.spawn(async move {
                            worker.execute_task(task).await;
                        });
                    }
                    None => break,
                }
            }

            if tasks.is_empty() {
                // Idle: sleep before polling again.
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Task worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            } else {
                // Wake on a completion, or on the poll tick while a slot is
                // still free for the queue to fill.
                let slot_free = tasks.len() < max_concurrent;
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Task worker received shutdown signal");
                        break;
                    }
                    result = tasks.join_next() => {
                        if let Some(Err(e)) = result {
                            error!(error = ?e, "Task execution panicked");
                        }
                    }
                    _ = sleep(poll_interval), if slot_free => {}
                }
            }
        }

        // Graceful shutdown: in-flight tasks finish, no new ones are leased.
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Task execution panicked");
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Task worker stopped");
    }

    /// Lease the next available task without processing it.
    async fn claim_task(&self) -> Option<ProcessingTask> {
        match self
            .queue
            .claim_next(&self.config.server_id, &self.config.capabilities)
            .await
        {
            Ok(Some(task)) => Some(task),
            Ok(None) => None,
            Err(e) => {
                error!(error = ?e, "Failed to claim task");
                None
            }
        }
    }

    /// Clone references needed for spawned task executions.
    fn clone_refs(&self) -> TaskWorkerRef {
        TaskWorkerRef {
            queue: self.queue.clone(),
            handlers: self.handlers.clone(),
            event_tx: self.event_tx.clone(),
        }
    }
}

/// Lightweight reference bundle for executing one task in a spawned unit.
struct TaskWorkerRef {
    queue: Arc<dyn TaskQueue>,
    handlers: Arc<RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl TaskWorkerRef {
    /// Execute a single leased task.
    async fn execute_task(self, task: ProcessingTask) {
        let start = Instant::now();
        let task_id = task.id;
        let task_type = task.task_type;
        let document_id = task.document_id;

        info!(%task_id, %task_type, %document_id, "Processing task");
        let _ = self
            .event_tx
            .send(WorkerEvent::TaskStarted { task_id, task_type });

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&task_type).cloned()
        };

        let outcome = match handler {
            Some(handler) => {
                let event_tx = self.event_tx.clone();
                let progress_queue = self.queue.clone();
                let ctx = TaskContext::new(task).with_progress_callback(move |percent, message| {
                    let _ = event_tx.send(WorkerEvent::TaskProgress {
                        task_id,
                        percent,
                        message: message.map(String::from),
                    });
                    // Progress writes are advisory; fire and forget.
                    let queue = progress_queue.clone();
                    let message = message.map(String::from);
                    tokio::spawn(async move {
                        if let Err(e) = queue
                            .update_progress(task_id, percent, message.as_deref())
                            .await
                        {
                            debug!(%task_id, error = %e, "Progress update failed");
                        }
                    });
                });

                let task_timeout = Duration::from_secs(defaults::TASK_TIMEOUT_SECS);
                match tokio::time::timeout(task_timeout, handler.execute(ctx)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(
                            %task_id,
                            %task_type,
                            "Task exceeded timeout of {}s",
                            defaults::TASK_TIMEOUT_SECS
                        );
                        TaskOutcome::Failed(format!(
                            "Task exceeded timeout of {}s",
                            defaults::TASK_TIMEOUT_SECS
                        ))
                    }
                }
            }
            None => {
                warn!(%task_type, "No handler registered for task type");
                TaskOutcome::Failed(format!("No handler for task type: {}", task_type))
            }
        };

        match outcome {
            TaskOutcome::Success(result) => {
                if let Err(e) = self.queue.complete(task_id, result).await {
                    error!(error = ?e, %task_id, "Failed to mark task as completed");
                } else {
                    info!(
                        %task_id,
                        %task_type,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Task completed successfully"
                    );
                    let _ = self
                        .event_tx
                        .send(WorkerEvent::TaskCompleted { task_id, task_type });
                }
            }
            TaskOutcome::Failed(error) => {
                if let Err(e) = self.queue.fail(task_id, &error).await {
                    error!(error = ?e, %task_id, "Failed to mark task as failed");
                } else {
                    warn!(
                        %task_id,
                        %task_type,
                        %error,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Task failed"
                    );
                    let _ = self.event_tx.send(WorkerEvent::TaskFailed {
                        task_id,
                        task_type,
                        error,
                    });
                }
            }
        }
    }
}
