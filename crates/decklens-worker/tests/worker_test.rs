//! Worker loop tests against an in-memory queue and registry. These exercise
//! claim/execute/complete/fail wiring and graceful shutdown without Postgres.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use decklens_core::{
    Capability, Error, NewTask, ProcessingTask, QueueStats, Result, TaskQueue, TaskStatus,
    TaskType, WorkerRegistration, WorkerRegistry,
};
use decklens_worker::{
    NoOpHandler, TaskContext, TaskHandler, TaskOutcome, TaskWorker, WorkerConfig, WorkerEvent,
};

// =============================================================================
// In-memory queue and registry
// =============================================================================

#[derive(Default)]
struct InMemoryQueue {
    tasks: Mutex<HashMap<Uuid, ProcessingTask>>,
}

impl InMemoryQueue {
    fn status_of(&self, task_id: Uuid) -> Option<TaskStatus> {
        self.tasks.lock().unwrap().get(&task_id).map(|t| t.status)
    }

    fn task(&self, task_id: Uuid) -> Option<ProcessingTask> {
        self.tasks.lock().unwrap().get(&task_id).cloned()
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn enqueue(&self, task: NewTask) -> Result<Uuid> {
        let id = Uuid::now_v7();
        self.tasks.lock().unwrap().insert(
            id,
            ProcessingTask {
                id,
                document_id: task.document_id,
                company_id: task.company_id,
                file_path: task.file_path,
                task_type: task.task_type,
                status: TaskStatus::Queued,
                retry_count: 0,
                max_retries: task.max_retries,
                owning_server_id: None,
                progress_percent: 0,
                progress_message: None,
                error_message: None,
                result: None,
                created_at: Utc::now(),
                leased_at: None,
                completed_at: None,
            },
        );
        Ok(id)
    }

    async fn claim_next(
        &self,
        server_id: &str,
        capabilities: &[Capability],
    ) -> Result<Option<ProcessingTask>> {
        let claimable = TaskType::claimable_by(capabilities);
        let mut tasks = self.tasks.lock().unwrap();
        let next = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued && claimable.contains(&t.task_type))
            .min_by_key(|t| t.created_at)
            .map(|t| t.id);
        Ok(next.map(|id| {
            let task = tasks.get_mut(&id).unwrap();
            task.status = TaskStatus::Processing;
            task.owning_server_id = Some(server_id.to_string());
            task.leased_at = Some(Utc::now());
            task.clone()
        }))
    }

    async fn update_progress(
        &self,
        task_id: Uuid,
        percent: i32,
        message: Option<&str>,
    ) -> Result<()> {
        if let Some(task) = self.tasks.lock().unwrap().get_mut(&task_id) {
            task.progress_percent = percent;
            task.progress_message = message.map(String::from);
        }
        Ok(())
    }

    async fn complete(&self, task_id: Uuid, result: Option<JsonValue>) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&task_id)
            .ok_or(Error::TaskNotFound(task_id))?;
        task.status = TaskStatus::Completed;
        task.result = result;
        task.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn fail(&self, task_id: Uuid, error: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&task_id)
            .ok_or(Error::TaskNotFound(task_id))?;
        if task.retry_count < task.max_retries {
            task.retry_count += 1;
            task.status = TaskStatus::Queued;
            task.owning_server_id = None;
            task.leased_at = None;
            task.error_message = Some(error.to_string());
        } else {
            task.status = TaskStatus::Failed;
            task.error_message = Some(error.to_string());
            task.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn recover_abandoned(&self, _liveness_window: chrono::Duration) -> Result<u64> {
        Ok(0)
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<ProcessingTask>> {
        Ok(self.task(task_id))
    }

    async fn get_for_document(&self, document_id: Uuid) -> Result<Vec<ProcessingTask>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn pending_count(&self) -> Result<i64> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.status == TaskStatus::Queued)
            .count() as i64)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let tasks = self.tasks.lock().unwrap();
        let count = |status: TaskStatus| {
            tasks.values().filter(|t| t.status == status).count() as i64
        };
        Ok(QueueStats {
            queued: count(TaskStatus::Queued),
            processing: count(TaskStatus::Processing),
            completed_last_hour: count(TaskStatus::Completed),
            failed_last_hour: count(TaskStatus::Failed),
            total: tasks.len() as i64,
        })
    }
}

#[derive(Default)]
struct InMemoryRegistry {
    registered: Mutex<HashMap<String, WorkerRegistration>>,
    heartbeats: Mutex<Vec<String>>,
}

#[async_trait]
impl WorkerRegistry for InMemoryRegistry {
    async fn register(&self, registration: &WorkerRegistration) -> Result<()> {
        self.registered
            .lock()
            .unwrap()
            .insert(registration.server_id.clone(), registration.clone());
        Ok(())
    }

    async fn heartbeat(&self, server_id: &str) -> Result<()> {
        if !self.registered.lock().unwrap().contains_key(server_id) {
            return Err(Error::NotFound(format!(
                "worker registration: {}",
                server_id
            )));
        }
        self.heartbeats.lock().unwrap().push(server_id.to_string());
        Ok(())
    }

    async fn live_workers(
        &self,
        _window: chrono::Duration,
    ) -> Result<Vec<WorkerRegistration>> {
        Ok(self.registered.lock().unwrap().values().cloned().collect())
    }

    async fn remove(&self, server_id: &str) -> Result<()> {
        self.registered.lock().unwrap().remove(server_id);
        Ok(())
    }
}

// =============================================================================
// Handlers
// =============================================================================

struct SlowHandler {
    delay: Duration,
}

#[async_trait]
impl TaskHandler for SlowHandler {
    fn task_types(&self) -> Vec<TaskType> {
        vec![TaskType::PdfAnalysis]
    }

    async fn execute(&self, _ctx: TaskContext) -> TaskOutcome {
        tokio::time::sleep(self.delay).await;
        TaskOutcome::Success(None)
    }
}

struct AlwaysFailsHandler;

#[async_trait]
impl TaskHandler for AlwaysFailsHandler {
    fn task_types(&self) -> Vec<TaskType> {
        vec![TaskType::PdfAnalysis]
    }

    async fn execute(&self, _ctx: TaskContext) -> TaskOutcome {
        TaskOutcome::Failed("synthetic failure".to_string())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn fast_config(server_id: &str) -> WorkerConfig {
    WorkerConfig::default()
        .with_server_id(server_id)
        .with_poll_interval(10)
        .with_max_concurrent(2)
}

async fn wait_for_status(
    queue: &InMemoryQueue,
    task_id: Uuid,
    status: TaskStatus,
) -> ProcessingTask {
    for _ in 0..200 {
        if queue.status_of(task_id) == Some(status) {
            return queue.task(task_id).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "task {} never reached {:?} (currently {:?})",
        task_id,
        status,
        queue.status_of(task_id)
    );
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_worker_completes_a_task_end_to_end() {
    let queue = Arc::new(InMemoryQueue::default());
    let registry = Arc::new(InMemoryRegistry::default());

    let task_id = queue
        .enqueue(NewTask::pdf_analysis(Uuid::new_v4(), "uploads/a/a.pdf"))
        .await
        .unwrap();

    let worker = TaskWorker::new(queue.clone(), registry.clone(), fast_config("wt-complete"));
    worker
        .register_handler(NoOpHandler::new(vec![TaskType::PdfAnalysis]))
        .await;

    let handle = worker.start();
    let mut events = handle.events();

    let task = wait_for_status(&queue, task_id, TaskStatus::Completed).await;
    assert_eq!(task.owning_server_id.as_deref(), Some("wt-complete"));
    assert!(task.completed_at.is_some());

    // The event stream saw the lifecycle, including handler progress.
    let mut saw_started = false;
    let mut saw_progress = false;
    let mut saw_completed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            WorkerEvent::TaskStarted { task_id: id, .. } if id == task_id => saw_started = true,
            WorkerEvent::TaskProgress {
                task_id: id,
                percent: 100,
                ..
            } if id == task_id => saw_progress = true,
            WorkerEvent::TaskCompleted { task_id: id, .. } if id == task_id => {
                saw_completed = true
            }
            _ => {}
        }
    }
    assert!(saw_started && saw_progress && saw_completed);

    // Worker registered itself at startup.
    assert!(!registry.registered.lock().unwrap().is_empty());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_free_slot_is_refilled_while_long_task_runs() {
    let queue = Arc::new(InMemoryQueue::default());
    let registry = Arc::new(InMemoryRegistry::default());

    let slow_task = queue
        .enqueue(NewTask::pdf_analysis(Uuid::new_v4(), "uploads/s/slow.pdf"))
        .await
        .unwrap();

    let worker = TaskWorker::new(queue.clone(), registry, fast_config("wt-refill"));
    worker
        .register_handler(SlowHandler {
            delay: Duration::from_millis(800),
        })
        .await;
    let handle = worker.start();

    wait_for_status(&queue, slow_task, TaskStatus::Processing).await;

    // Enqueued after the first lease: must be claimed onto the free slot
    // while the slow task is still in flight, not after it drains.
    let second_task = queue
        .enqueue(NewTask::pdf_analysis(Uuid::new_v4(), "uploads/s/second.pdf"))
        .await
        .unwrap();

    for _ in 0..50 {
        if queue.status_of(second_task) != Some(TaskStatus::Queued) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        queue.status_of(slow_task),
        Some(TaskStatus::Processing),
        "slow task should still be running"
    );
    assert_ne!(
        queue.status_of(second_task),
        Some(TaskStatus::Queued),
        "second task should be leased while the slow task runs"
    );

    wait_for_status(&queue, slow_task, TaskStatus::Completed).await;
    wait_for_status(&queue, second_task, TaskStatus::Completed).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failing_task_is_retried_to_the_bound() {
    let queue = Arc::new(InMemoryQueue::default());
    let registry = Arc::new(InMemoryRegistry::default());

    let mut new_task = NewTask::pdf_analysis(Uuid::new_v4(), "uploads/f/f.pdf");
    new_task.max_retries = 2;
    let task_id = queue.enqueue(new_task).await.unwrap();

    let worker = TaskWorker::new(queue.clone(), registry, fast_config("wt-retry"));
    worker.register_handler(AlwaysFailsHandler).await;
    let handle = worker.start();

    let task = wait_for_status(&queue, task_id, TaskStatus::Failed).await;
    assert_eq!(task.retry_count, 2);
    assert_eq!(task.error_message.as_deref(), Some("synthetic failure"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unhandled_task_type_fails() {
    let queue = Arc::new(InMemoryQueue::default());
    let registry = Arc::new(InMemoryRegistry::default());

    let mut new_task = NewTask::pdf_analysis(Uuid::new_v4(), "uploads/u/u.pdf");
    new_task.max_retries = 0;
    let task_id = queue.enqueue(new_task).await.unwrap();

    // No handler registered at all.
    let worker = TaskWorker::new(queue.clone(), registry, fast_config("wt-nohandler"));
    let handle = worker.start();

    let task = wait_for_status(&queue, task_id, TaskStatus::Failed).await;
    assert!(task
        .error_message
        .unwrap()
        .contains("No handler for task type"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_capability_scoped_worker_leaves_other_tasks_queued() {
    let queue = Arc::new(InMemoryQueue::default());
    let registry = Arc::new(InMemoryRegistry::default());

    let pdf_task = queue
        .enqueue(NewTask::pdf_analysis(Uuid::new_v4(), "uploads/p/p.pdf"))
        .await
        .unwrap();
    let specialized_task = queue
        .enqueue(NewTask::specialized(
            Uuid::new_v4(),
            "uploads/s/s.pdf",
            decklens_core::SpecializedKind::RegulatoryPathway,
        ))
        .await
        .unwrap();

    // Worker only advertises specialized analysis.
    let config = fast_config("wt-caps")
        .with_capabilities(vec![Capability::SpecializedAnalysis]);
    let worker = TaskWorker::new(queue.clone(), registry, config);
    worker
        .register_handler(NoOpHandler::new(vec![
            TaskType::SpecializedRegulatoryPathway,
        ]))
        .await;
    let handle = worker.start();

    wait_for_status(&queue, specialized_task, TaskStatus::Completed).await;
    // The pdf task stays queued for a capable worker.
    assert_eq!(queue.status_of(pdf_task), Some(TaskStatus::Queued));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disabled_worker_claims_nothing() {
    let queue = Arc::new(InMemoryQueue::default());
    let registry = Arc::new(InMemoryRegistry::default());

    let task_id = queue
        .enqueue(NewTask::pdf_analysis(Uuid::new_v4(), "uploads/d/d.pdf"))
        .await
        .unwrap();

    let config = fast_config("wt-disabled").with_enabled(false);
    let worker = TaskWorker::new(queue.clone(), registry, config);
    worker
        .register_handler(NoOpHandler::new(vec![TaskType::PdfAnalysis]))
        .await;
    let _handle = worker.start();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(queue.status_of(task_id), Some(TaskStatus::Queued));
}
