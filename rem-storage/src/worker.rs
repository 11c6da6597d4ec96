//! Embedding worker
//!
//! Bounded-queue, fixed-size worker pool generating embeddings in the
//! background. Ingestion latency never depends on provider availability:
//! enqueue is non-blocking with a drop-oldest overflow policy, and failed
//! batches are logged rather than retried (the entity's embedding stays
//! absent until its next write).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rem_llm::EmbeddingProvider;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::Db;

/// One field of one entity awaiting an embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingTask {
    pub task_id: String,
    pub entity_id: String,
    pub table_name: String,
    pub field_name: String,
    pub content: String,
    pub provider: String,
    pub model: String,
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub num_workers: usize,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub queue_capacity: usize,
    /// How long `stop` waits for inflight batches before aborting.
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: 2,
            batch_size: 10,
            batch_timeout: Duration::from_secs(1),
            queue_capacity: 1024,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            num_workers: std::env::var("REM_EMBEDDING_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.num_workers),
            batch_size: std::env::var("REM_EMBEDDING_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.batch_size),
            batch_timeout: std::env::var("REM_EMBEDDING_BATCH_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.batch_timeout),
            queue_capacity: std::env::var("REM_EMBEDDING_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.queue_capacity),
            shutdown_grace: defaults.shutdown_grace,
        }
    }
}

struct QueueInner {
    tasks: VecDeque<EmbeddingTask>,
    dropped: u64,
}

/// Cloneable enqueue handle shared with repositories.
#[derive(Clone)]
pub struct EmbeddingQueue {
    inner: Arc<Mutex<QueueInner>>,
    notify: Arc<Notify>,
    capacity: usize,
    provider_label: Arc<str>,
    model_label: Arc<str>,
}

impl EmbeddingQueue {
    fn new(capacity: usize, provider_label: &str, model_label: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                tasks: VecDeque::new(),
                dropped: 0,
            })),
            notify: Arc::new(Notify::new()),
            capacity,
            provider_label: provider_label.into(),
            model_label: model_label.into(),
        }
    }

    /// Enqueue a task. Never blocks beyond the queue lock; on overflow the
    /// oldest task is dropped with a warning.
    pub fn queue_task(&self, task: EmbeddingTask) {
        {
            let mut inner = self.inner.lock().expect("embedding queue lock");
            if inner.tasks.len() >= self.capacity {
                if let Some(evicted) = inner.tasks.pop_front() {
                    inner.dropped += 1;
                    tracing::warn!(
                        table = %evicted.table_name,
                        field = %evicted.field_name,
                        dropped_total = inner.dropped,
                        "embedding queue full, dropping oldest task"
                    );
                }
            }
            inner.tasks.push_back(task);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<EmbeddingTask> {
        self.inner.lock().expect("embedding queue lock").tasks.pop_front()
    }

    /// Current queue depth, for observability.
    pub fn depth(&self) -> usize {
        self.inner.lock().expect("embedding queue lock").tasks.len()
    }

    /// Tasks dropped to overflow since startup.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().expect("embedding queue lock").dropped
    }

    pub fn provider_label(&self) -> &str {
        &self.provider_label
    }

    pub fn model_label(&self) -> &str {
        &self.model_label
    }
}

/// Background embedding worker pool.
pub struct EmbeddingWorker {
    db: Db,
    provider: Arc<dyn EmbeddingProvider>,
    config: WorkerConfig,
    queue: EmbeddingQueue,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl EmbeddingWorker {
    pub fn new(db: Db, provider: Arc<dyn EmbeddingProvider>, config: WorkerConfig) -> Self {
        let queue = EmbeddingQueue::new(
            config.queue_capacity,
            provider.provider_name(),
            provider.model_id(),
        );
        Self {
            db,
            provider,
            config,
            queue,
            running: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    /// Enqueue handle for repositories.
    pub fn queue(&self) -> EmbeddingQueue {
        self.queue.clone()
    }

    /// Start the worker pool. Idempotent.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("embedding worker already running");
            return;
        }
        tracing::info!(
            workers = self.config.num_workers,
            batch_size = self.config.batch_size,
            "starting embedding workers"
        );
        for worker_id in 0..self.config.num_workers {
            let db = self.db.clone();
            let provider = Arc::clone(&self.provider);
            let queue = self.queue.clone();
            let running = Arc::clone(&self.running);
            let config = self.config.clone();
            self.handles.push(tokio::spawn(async move {
                worker_loop(worker_id, db, provider, queue, running, config).await;
            }));
        }
    }

    /// Stop the pool: cancel inflight waits and drain up to the grace period.
    pub async fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("stopping embedding workers");
        self.queue.notify.notify_waiters();

        for handle in self.handles.drain(..) {
            if tokio::time::timeout(self.config.shutdown_grace, handle)
                .await
                .is_err()
            {
                tracing::warn!("embedding worker did not stop within grace period");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    db: Db,
    provider: Arc<dyn EmbeddingProvider>,
    queue: EmbeddingQueue,
    running: Arc<AtomicBool>,
    config: WorkerConfig,
) {
    tracing::debug!(worker_id, "embedding worker started");
    loop {
        let batch = collect_batch(&queue, &config).await;
        if !batch.is_empty() {
            tracing::debug!(worker_id, batch = batch.len(), "processing embedding batch");
            process_batch(&db, provider.as_ref(), batch).await;
            continue;
        }
        if !running.load(Ordering::SeqCst) {
            break;
        }
    }
    tracing::debug!(worker_id, "embedding worker stopped");
}

/// Collect up to `batch_size` tasks: wait `batch_timeout` for the first,
/// then only briefly for stragglers.
async fn collect_batch(queue: &EmbeddingQueue, config: &WorkerConfig) -> Vec<EmbeddingTask> {
    let mut batch = Vec::new();

    let first = match queue.pop() {
        Some(task) => Some(task),
        None => {
            tokio::select! {
                _ = queue.notify.notified() => {}
                _ = tokio::time::sleep(config.batch_timeout) => {}
            }
            queue.pop()
        }
    };
    let Some(first) = first else {
        return batch;
    };
    batch.push(first);

    let straggler_wait = Duration::from_millis(100);
    while batch.len() < config.batch_size {
        match queue.pop() {
            Some(task) => batch.push(task),
            None => {
                tokio::select! {
                    _ = queue.notify.notified() => {}
                    _ = tokio::time::sleep(straggler_wait) => break,
                }
            }
        }
    }
    batch
}

/// Embed one batch and upsert the vectors. Errors are logged, not retried.
async fn process_batch(db: &Db, provider: &dyn EmbeddingProvider, batch: Vec<EmbeddingTask>) {
    let texts: Vec<String> = batch.iter().map(|t| t.content.clone()).collect();

    let vectors = match provider.embed_batch(&texts).await {
        Ok(vectors) if vectors.len() == batch.len() => vectors,
        Ok(vectors) => {
            tracing::error!(
                expected = batch.len(),
                got = vectors.len(),
                "embedding batch size mismatch, dropping batch"
            );
            return;
        }
        Err(e) => {
            tracing::error!(error = %e, batch = batch.len(), "embedding batch failed");
            return;
        }
    };

    for (task, vector) in batch.iter().zip(vectors) {
        let Ok(entity_id) = Uuid::parse_str(&task.entity_id) else {
            tracing::error!(entity_id = %task.entity_id, "invalid entity id on embedding task");
            continue;
        };
        let sql = format!(
            "INSERT INTO embeddings_{} (id, entity_id, field_name, provider, model, embedding, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6::vector, NOW(), NOW()) \
             ON CONFLICT (entity_id, field_name, provider) \
             DO UPDATE SET model = EXCLUDED.model, embedding = EXCLUDED.embedding, updated_at = NOW()",
            task.table_name
        );
        let id = Uuid::now_v7();
        let literal = vector_literal(&vector);
        if let Err(e) = db
            .execute(
                &sql,
                &[
                    &id,
                    &entity_id,
                    &task.field_name,
                    &task.provider,
                    &task.model,
                    &literal,
                ],
            )
            .await
        {
            tracing::error!(
                error = %e,
                table = %task.table_name,
                entity_id = %task.entity_id,
                "failed to upsert embedding"
            );
        }
    }
}

/// pgvector text literal for a vector.
pub fn vector_literal(vector: &[f32]) -> String {
    let mut literal = String::with_capacity(vector.len() * 10 + 2);
    literal.push('[');
    for (i, value) in vector.iter().enumerate() {
        if i > 0 {
            literal.push(',');
        }
        literal.push_str(&value.to_string());
    }
    literal.push(']');
    literal
}
