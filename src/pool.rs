//! Embedding worker pool.
//!
//! A supervisor task owns N worker actors. Each worker holds its own
//! [`Embedder`] instance, receives batches over an inbox channel, and embeds
//! the texts of a batch concurrently. Tasks answer over per-task oneshot
//! channels, so callers never poll shared state.
//!
//! Failure handling is two-level:
//!
//! * [`EmbedError::Model`] fails only the affected task; the worker keeps
//!   running.
//! * [`EmbedError::Unavailable`] kills the worker: every task of the current
//!   batch is rejected, the supervisor respawns a replacement at the same
//!   index, and queued tasks are redistributed to the surviving workers.
//!   Respawn attempts are bounded per slot; once a slot's replacements keep
//!   failing it is abandoned, and with no live workers left its queued tasks
//!   are rejected with [`PoolError::NoWorkers`] rather than recirculated.
//!
//! On top of that, [`EmbeddingPool::embed_chunks`] resubmits retryably-failed
//! tasks a bounded number of times before excluding them from the result.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout_at;

use crate::config::PoolConfig;
use crate::embedder::{EmbedError, EmbedderFactory};
use crate::progress::{ProgressEvent, ProgressReporter};

#[derive(Debug, Clone, Error)]
pub enum PoolError {
    #[error("no embedding workers available")]
    NoWorkers,
    #[error("worker {index} failed to initialize within {seconds}s")]
    InitTimeout { index: usize, seconds: u64 },
    #[error("worker {index} failed to initialize: {message}")]
    InitFailed { index: usize, message: String },
    #[error("worker {index} crashed: {message}")]
    WorkerCrashed { index: usize, message: String },
    #[error("embedding failed: {message}")]
    EmbedFailed { message: String },
    #[error("embedding task dropped before completion")]
    TaskDropped,
    #[error("embedding pool is shut down")]
    ShutDown,
}

impl PoolError {
    /// Whether resubmitting the task could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::WorkerCrashed { .. }
                | PoolError::EmbedFailed { .. }
                | PoolError::TaskDropped
        )
    }
}

/// One queued embedding request; the result travels back over `respond_to`.
pub struct EmbedTask {
    pub chunk_id: String,
    pub text: String,
    pub respond_to: oneshot::Sender<Result<Vec<f32>, PoolError>>,
}

enum WorkerRequest {
    Batch(Vec<EmbedTask>),
    Shutdown,
}

enum WorkerEvent {
    Ready { index: usize },
    BatchDone { index: usize, completed: usize },
    Crashed { index: usize, message: String },
}

impl WorkerEvent {
    fn index(&self) -> usize {
        match self {
            WorkerEvent::Ready { index }
            | WorkerEvent::BatchDone { index, .. }
            | WorkerEvent::Crashed { index, .. } => *index,
        }
    }
}

/// Worker actor body: create the embedder, optionally warm it up, signal
/// ready, then serve batches until shutdown or a fatal embedder error.
async fn run_worker(
    index: usize,
    factory: Arc<dyn EmbedderFactory>,
    warmup: bool,
    mut inbox: mpsc::UnboundedReceiver<WorkerRequest>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let embedder = match factory.create() {
        Ok(embedder) => embedder,
        Err(err) => {
            let _ = events.send(WorkerEvent::Crashed {
                index,
                message: err.to_string(),
            });
            return;
        }
    };

    if warmup {
        // One throwaway inference so lazy model loading happens before the
        // worker accepts real batches.
        if let Err(err) = embedder.embed("warm-up").await {
            let _ = events.send(WorkerEvent::Crashed {
                index,
                message: err.to_string(),
            });
            return;
        }
    }

    let _ = events.send(WorkerEvent::Ready { index });

    while let Some(request) = inbox.recv().await {
        match request {
            WorkerRequest::Shutdown => break,
            WorkerRequest::Batch(tasks) => {
                let results = join_all(tasks.iter().map(|t| embedder.embed(&t.text))).await;

                let fatal = results.iter().find_map(|r| match r {
                    Err(EmbedError::Unavailable(message)) => Some(message.clone()),
                    _ => None,
                });
                if let Some(message) = fatal {
                    // The whole batch is rejected; retry policy lives with
                    // the caller.
                    for task in tasks {
                        let _ = task.respond_to.send(Err(PoolError::WorkerCrashed {
                            index,
                            message: message.clone(),
                        }));
                    }
                    let _ = events.send(WorkerEvent::Crashed { index, message });
                    return;
                }

                let completed = tasks.len();
                for (task, result) in tasks.into_iter().zip(results) {
                    let outcome = result.map_err(|err| {
                        tracing::debug!(chunk = %task.chunk_id, error = %err, "embed task failed");
                        PoolError::EmbedFailed {
                            message: err.to_string(),
                        }
                    });
                    let _ = task.respond_to.send(outcome);
                }
                let _ = events.send(WorkerEvent::BatchDone { index, completed });
            }
        }
    }
}

enum WorkerState {
    Initializing,
    Idle,
    Busy,
    Crashed,
}

/// Consecutive failed replacements tolerated per worker slot before the
/// supervisor abandons it. Reset whenever a replacement reaches ready.
const MAX_RESPAWN_ATTEMPTS: u32 = 3;

struct WorkerHandle {
    tx: Option<mpsc::UnboundedSender<WorkerRequest>>,
    state: WorkerState,
    queue: VecDeque<EmbedTask>,
    inflight: usize,
    respawns_left: u32,
}

impl WorkerHandle {
    fn live(&self) -> bool {
        !matches!(self.state, WorkerState::Crashed)
    }

    fn load(&self) -> usize {
        self.queue.len() + self.inflight
    }
}

enum PoolCommand {
    Submit(Vec<EmbedTask>),
    Shutdown,
}

struct Supervisor {
    workers: Vec<WorkerHandle>,
    factory: Arc<dyn EmbedderFactory>,
    config: PoolConfig,
    progress: Arc<dyn ProgressReporter>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
    submitted: usize,
    completed: usize,
}

impl Supervisor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<PoolCommand>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(PoolCommand::Submit(tasks)) => {
                        self.submitted += tasks.len();
                        self.assign(tasks);
                        self.dispatch();
                    }
                    Some(PoolCommand::Shutdown) | None => {
                        self.shutdown();
                        break;
                    }
                },
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
    }

    /// Queue tasks on the least-loaded live worker; with no live workers the
    /// tasks are rejected outright and leave the submitted total.
    fn assign(&mut self, tasks: impl IntoIterator<Item = EmbedTask>) {
        let mut rejected = 0usize;
        for task in tasks {
            let target = self
                .workers
                .iter_mut()
                .filter(|w| w.live())
                .min_by_key(|w| w.load());
            match target {
                Some(worker) => worker.queue.push_back(task),
                None => {
                    let _ = task.respond_to.send(Err(PoolError::NoWorkers));
                    rejected += 1;
                }
            }
        }
        self.submitted = self.submitted.saturating_sub(rejected);
    }

    /// Send batches to idle workers. A full batch always goes out; a partial
    /// batch goes out only when nothing else is in flight, so trailing work
    /// is flushed without fragmenting steady-state batches.
    fn dispatch(&mut self) {
        let any_busy = self
            .workers
            .iter()
            .any(|w| matches!(w.state, WorkerState::Busy));
        let mut failed: Vec<usize> = Vec::new();

        for (index, worker) in self.workers.iter_mut().enumerate() {
            if !matches!(worker.state, WorkerState::Idle) || worker.queue.is_empty() {
                continue;
            }
            if worker.queue.len() < self.config.batch_size && any_busy {
                continue;
            }
            let take = worker.queue.len().min(self.config.batch_size);
            let batch: Vec<EmbedTask> = worker.queue.drain(..take).collect();
            worker.inflight = batch.len();
            worker.state = WorkerState::Busy;
            let sent = match &worker.tx {
                Some(tx) => tx.send(WorkerRequest::Batch(batch)).is_ok(),
                None => false,
            };
            if !sent {
                failed.push(index);
            }
        }

        // A send can only fail if the worker task is gone; treat it as a
        // crash so its work is redistributed.
        for index in failed {
            self.handle_event(WorkerEvent::Crashed {
                index,
                message: "worker channel closed".to_string(),
            });
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Ready { index } => {
                if let Some(worker) = self.workers.get_mut(index) {
                    if matches!(worker.state, WorkerState::Initializing) {
                        worker.state = WorkerState::Idle;
                        // A healthy replacement earns back its full budget.
                        worker.respawns_left = MAX_RESPAWN_ATTEMPTS;
                    }
                }
                self.dispatch();
            }
            WorkerEvent::BatchDone { index, completed } => {
                if let Some(worker) = self.workers.get_mut(index) {
                    worker.inflight = 0;
                    if matches!(worker.state, WorkerState::Busy) {
                        worker.state = WorkerState::Idle;
                    }
                }
                self.completed += completed;
                self.progress.report(ProgressEvent::EmbeddingProgress {
                    completed: self.completed,
                    total: self.submitted,
                });
                self.dispatch();
            }
            WorkerEvent::Crashed { index, message } => {
                let mut queued = VecDeque::new();
                let mut respawn_allowed = false;
                if let Some(worker) = self.workers.get_mut(index) {
                    worker.state = WorkerState::Crashed;
                    worker.tx = None;
                    queued = std::mem::take(&mut worker.queue);
                    // Rejected in-flight tasks leave the submitted total;
                    // their retries re-enter it on resubmission, so the
                    // progress counters track distinct outstanding chunks.
                    let inflight = std::mem::take(&mut worker.inflight);
                    self.submitted = self.submitted.saturating_sub(inflight);
                    if worker.respawns_left > 0 {
                        worker.respawns_left -= 1;
                        respawn_allowed = true;
                    }
                }
                if respawn_allowed {
                    tracing::warn!(worker = index, %message, "embedding worker crashed, respawning");
                    self.respawn(index);
                } else {
                    tracing::warn!(
                        worker = index,
                        %message,
                        "embedding worker crashed, respawn budget exhausted"
                    );
                }
                self.assign(queued);
                self.dispatch();
            }
        }
    }

    fn respawn(&mut self, index: usize) {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(
            index,
            Arc::clone(&self.factory),
            self.config.warmup,
            rx,
            self.event_tx.clone(),
        ));
        if let Some(worker) = self.workers.get_mut(index) {
            worker.tx = Some(tx);
            worker.state = WorkerState::Initializing;
        }
    }

    fn shutdown(&mut self) {
        for worker in &mut self.workers {
            if let Some(tx) = worker.tx.take() {
                let _ = tx.send(WorkerRequest::Shutdown);
            }
            for task in worker.queue.drain(..) {
                let _ = task.respond_to.send(Err(PoolError::ShutDown));
            }
        }
    }
}

/// Handle to a running pool. Cloning is cheap; all clones feed the same
/// supervisor.
#[derive(Clone)]
pub struct EmbeddingPool {
    commands: mpsc::UnboundedSender<PoolCommand>,
    config: PoolConfig,
    dims: usize,
}

impl EmbeddingPool {
    /// Start the pool: spawn the configured number of workers and wait for
    /// each to initialize, with a per-worker timeout. Workers that fail or
    /// time out are logged and skipped; with zero usable workers the first
    /// initialization error is returned.
    pub async fn start(
        config: PoolConfig,
        factory: Arc<dyn EmbedderFactory>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<Self, PoolError> {
        let dims = factory.dims();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let worker_count = config.worker_count();
        let mut workers = Vec::with_capacity(worker_count);
        let mut first_error: Option<PoolError> = None;

        for index in 0..worker_count {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_worker(
                index,
                Arc::clone(&factory),
                config.warmup,
                rx,
                event_tx.clone(),
            ));

            let deadline = tokio::time::Instant::now() + config.init_timeout();
            let outcome = loop {
                match timeout_at(deadline, event_rx.recv()).await {
                    // Late events from an already-skipped worker are ignored.
                    Ok(Some(event)) if event.index() != index => continue,
                    Ok(Some(event)) => break Some(event),
                    Ok(None) | Err(_) => break None,
                }
            };

            match outcome {
                Some(WorkerEvent::Ready { .. }) => {
                    workers.push(WorkerHandle {
                        tx: Some(tx),
                        state: WorkerState::Idle,
                        queue: VecDeque::new(),
                        inflight: 0,
                        respawns_left: MAX_RESPAWN_ATTEMPTS,
                    });
                }
                Some(WorkerEvent::Crashed { message, .. }) => {
                    tracing::warn!(worker = index, %message, "embedding worker failed to initialize");
                    first_error.get_or_insert(PoolError::InitFailed { index, message });
                    workers.push(dead_slot());
                }
                Some(WorkerEvent::BatchDone { .. }) => {
                    // Impossible before the first dispatch; treat as dead.
                    workers.push(dead_slot());
                }
                None => {
                    tracing::warn!(worker = index, "embedding worker init timed out");
                    first_error.get_or_insert(PoolError::InitTimeout {
                        index,
                        seconds: config.init_timeout_secs,
                    });
                    // Dropping `tx` makes the stuck worker exit once it
                    // finishes initializing.
                    drop(tx);
                    workers.push(dead_slot());
                }
            }
        }

        let ready = workers.iter().filter(|w| w.live()).count();
        if ready == 0 {
            return Err(first_error.unwrap_or(PoolError::NoWorkers));
        }
        tracing::info!(ready, requested = worker_count, "embedding pool started");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor {
            workers,
            factory,
            config: config.clone(),
            progress,
            event_tx,
            submitted: 0,
            completed: 0,
        };
        tokio::spawn(supervisor.run(command_rx, event_rx));

        Ok(Self {
            commands: command_tx,
            config,
            dims,
        })
    }

    /// Output dimensionality of this pool's embedders.
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Embed `(id, text)` pairs. The result maps each id to its vector;
    /// tasks that still fail after the configured retries are excluded and
    /// logged rather than failing the whole call.
    pub async fn embed_chunks(
        &self,
        items: Vec<(String, String)>,
    ) -> Result<HashMap<String, Vec<f32>>, PoolError> {
        let mut results = HashMap::with_capacity(items.len());
        let mut pending = items;
        let mut attempt = 0u32;

        loop {
            let wave = self.submit_wave(std::mem::take(&mut pending)).await?;
            for (id, text, outcome) in wave {
                match outcome {
                    Ok(vector) => {
                        results.insert(id, vector);
                    }
                    Err(PoolError::NoWorkers) => return Err(PoolError::NoWorkers),
                    Err(PoolError::ShutDown) => return Err(PoolError::ShutDown),
                    Err(err) if err.is_retryable() && attempt < self.config.max_chunk_retries => {
                        pending.push((id, text));
                    }
                    Err(err) => {
                        tracing::warn!(chunk = %id, error = %err, "embedding failed after retries, excluding chunk");
                    }
                }
            }
            if pending.is_empty() {
                return Ok(results);
            }
            attempt += 1;
            tracing::debug!(retrying = pending.len(), attempt, "resubmitting failed embed tasks");
            tokio::time::sleep(self.config.retry_delay()).await;
        }
    }

    /// Embed a single text, typically a query. Unlike [`embed_chunks`],
    /// exhausted retries surface as an error here.
    ///
    /// [`embed_chunks`]: EmbeddingPool::embed_chunks
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>, PoolError> {
        let mut map = self
            .embed_chunks(vec![("query".to_string(), text.to_string())])
            .await?;
        map.remove("query").ok_or(PoolError::EmbedFailed {
            message: "no embedding produced for query".to_string(),
        })
    }

    /// Stop the supervisor and all workers. Queued tasks are rejected.
    pub fn shutdown(&self) {
        let _ = self.commands.send(PoolCommand::Shutdown);
    }

    async fn submit_wave(
        &self,
        items: Vec<(String, String)>,
    ) -> Result<Vec<(String, String, Result<Vec<f32>, PoolError>)>, PoolError> {
        let mut receivers = Vec::with_capacity(items.len());
        let mut tasks = Vec::with_capacity(items.len());
        for (id, text) in items {
            let (tx, rx) = oneshot::channel();
            tasks.push(EmbedTask {
                chunk_id: id.clone(),
                text: text.clone(),
                respond_to: tx,
            });
            receivers.push((id, text, rx));
        }
        self.commands
            .send(PoolCommand::Submit(tasks))
            .map_err(|_| PoolError::ShutDown)?;

        let mut wave = Vec::with_capacity(receivers.len());
        for (id, text, rx) in receivers {
            let outcome = match rx.await {
                Ok(result) => result,
                Err(_) => Err(PoolError::TaskDropped),
            };
            wave.push((id, text, outcome));
        }
        Ok(wave)
    }
}

fn dead_slot() -> WorkerHandle {
    WorkerHandle {
        tx: None,
        state: WorkerState::Crashed,
        queue: VecDeque::new(),
        inflight: 0,
        respawns_left: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::{Embedder, HashEmbedderFactory};
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn test_config(workers: usize) -> PoolConfig {
        PoolConfig {
            workers,
            batch_size: 8,
            init_timeout_secs: 5,
            max_chunk_retries: 2,
            retry_delay_ms: 10,
            warmup: false,
        }
    }

    async fn start_pool(config: PoolConfig, factory: Arc<dyn EmbedderFactory>) -> EmbeddingPool {
        EmbeddingPool::start(config, factory, Arc::new(NoProgress))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_embed_chunks_happy_path() {
        let pool = start_pool(test_config(2), Arc::new(HashEmbedderFactory)).await;
        let items: Vec<(String, String)> = (0..5)
            .map(|i| (format!("chunk-{}", i), format!("content number {}", i)))
            .collect();
        let embeddings = pool.embed_chunks(items).await.unwrap();
        assert_eq!(embeddings.len(), 5);
        for vector in embeddings.values() {
            assert_eq!(vector.len(), pool.dims());
        }
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_empty_input() {
        let pool = start_pool(test_config(1), Arc::new(HashEmbedderFactory)).await;
        let embeddings = pool.embed_chunks(Vec::new()).await.unwrap();
        assert!(embeddings.is_empty());
        pool.shutdown();
    }

    struct FailingFactory;

    impl EmbedderFactory for FailingFactory {
        fn create(&self) -> Result<Box<dyn Embedder>, EmbedError> {
            Err(EmbedError::Unavailable("model file missing".to_string()))
        }

        fn dims(&self) -> usize {
            4
        }
    }

    #[tokio::test]
    async fn test_all_workers_fail_to_init() {
        let result = EmbeddingPool::start(
            test_config(2),
            Arc::new(FailingFactory),
            Arc::new(NoProgress),
        )
        .await;
        assert!(matches!(result, Err(PoolError::InitFailed { .. })));
    }

    /// Embedder that crashes fatally on the first text containing "crash";
    /// later instances (and later calls) are healthy.
    struct CrashOnce {
        tripped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Embedder for CrashOnce {
        fn dims(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "crash-once"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            if text.contains("crash")
                && self
                    .tripped
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                return Err(EmbedError::Unavailable("simulated crash".to_string()));
            }
            Ok(vec![1.0, 0.0, 0.0, 0.0])
        }
    }

    struct CrashOnceFactory {
        tripped: Arc<AtomicBool>,
        created: Arc<AtomicUsize>,
    }

    impl EmbedderFactory for CrashOnceFactory {
        fn create(&self) -> Result<Box<dyn Embedder>, EmbedError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CrashOnce {
                tripped: Arc::clone(&self.tripped),
            }))
        }

        fn dims(&self) -> usize {
            4
        }
    }

    #[tokio::test]
    async fn test_worker_crash_resolves_every_task() {
        let created = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(CrashOnceFactory {
            tripped: Arc::new(AtomicBool::new(false)),
            created: Arc::clone(&created),
        });
        let pool = start_pool(test_config(1), factory).await;

        let items: Vec<(String, String)> = (0..6)
            .map(|i| {
                let text = if i == 3 {
                    "please crash now".to_string()
                } else {
                    format!("ordinary text {}", i)
                };
                (format!("chunk-{}", i), text)
            })
            .collect();

        // Every task resolves despite the mid-batch crash: the batch is
        // rejected, a replacement worker spawns, and the retry succeeds.
        let embeddings = pool.embed_chunks(items).await.unwrap();
        assert_eq!(embeddings.len(), 6);
        assert!(created.load(Ordering::SeqCst) >= 2, "expected a respawn");
        pool.shutdown();
    }

    /// Embedder whose per-task failures are non-fatal.
    struct Flaky;

    #[async_trait]
    impl Embedder for Flaky {
        fn dims(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "flaky"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            if text.contains("poison") {
                return Err(EmbedError::Model("token limit exceeded".to_string()));
            }
            Ok(vec![0.0, 1.0, 0.0, 0.0])
        }
    }

    struct FlakyFactory;

    impl EmbedderFactory for FlakyFactory {
        fn create(&self) -> Result<Box<dyn Embedder>, EmbedError> {
            Ok(Box::new(Flaky))
        }

        fn dims(&self) -> usize {
            4
        }
    }

    #[tokio::test]
    async fn test_persistent_task_failure_excluded() {
        let pool = start_pool(test_config(1), Arc::new(FlakyFactory)).await;
        let items = vec![
            ("good".to_string(), "fine text".to_string()),
            ("bad".to_string(), "poison text".to_string()),
        ];
        let embeddings = pool.embed_chunks(items).await.unwrap();
        assert!(embeddings.contains_key("good"));
        assert!(!embeddings.contains_key("bad"));
        pool.shutdown();
    }

    /// Factory whose first embedder exists but always fails fatally, and
    /// whose replacement embedders cannot be created at all.
    struct DoomedFactory {
        created: AtomicUsize,
    }

    struct AlwaysUnavailable;

    #[async_trait]
    impl Embedder for AlwaysUnavailable {
        fn dims(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "always-unavailable"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            Err(EmbedError::Unavailable("model gone".to_string()))
        }
    }

    impl EmbedderFactory for DoomedFactory {
        fn create(&self) -> Result<Box<dyn Embedder>, EmbedError> {
            if self.created.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Box::new(AlwaysUnavailable))
            } else {
                Err(EmbedError::Unavailable("replacement failed".to_string()))
            }
        }

        fn dims(&self) -> usize {
            4
        }
    }

    #[tokio::test]
    async fn test_failed_respawns_reject_tasks_instead_of_looping() {
        let pool = start_pool(
            test_config(1),
            Arc::new(DoomedFactory {
                created: AtomicUsize::new(0),
            }),
        )
        .await;
        let items: Vec<(String, String)> = (0..4)
            .map(|i| (format!("chunk-{}", i), format!("text {}", i)))
            .collect();

        // With every replacement failing, the tasks must still resolve or
        // reject; they may never circulate between crash and respawn forever.
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            pool.embed_chunks(items),
        )
        .await
        .expect("tasks must resolve or reject after respawn failures");
        match result {
            Err(PoolError::NoWorkers) => {}
            Ok(map) => assert!(map.is_empty(), "no embedder ever succeeded"),
            Err(other) => panic!("unexpected error: {}", other),
        }
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_progress_totals_count_distinct_chunks_across_retries() {
        let progress = Arc::new(crate::progress::test_support::RecordingProgress::new());
        let factory = Arc::new(CrashOnceFactory {
            tripped: Arc::new(AtomicBool::new(false)),
            created: Arc::new(AtomicUsize::new(0)),
        });
        let pool = EmbeddingPool::start(test_config(1), factory, progress.clone())
            .await
            .unwrap();

        let items: Vec<(String, String)> = (0..6)
            .map(|i| {
                let text = if i == 2 {
                    "please crash now".to_string()
                } else {
                    format!("ordinary text {}", i)
                };
                (format!("chunk-{}", i), text)
            })
            .collect();
        let embeddings = pool.embed_chunks(items).await.unwrap();
        assert_eq!(embeddings.len(), 6);

        // The supervisor may still be delivering the final event.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let events = progress.events.lock().unwrap();
        let last = events
            .iter()
            .rev()
            .find_map(|e| match e {
                ProgressEvent::EmbeddingProgress { completed, total } => {
                    Some((*completed, *total))
                }
                _ => None,
            })
            .expect("at least one embedding progress event");
        // Six chunks went in; the crashed batch's retries must not inflate
        // either counter.
        assert_eq!(last, (6, 6));
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_embed_text_query() {
        let pool = start_pool(test_config(1), Arc::new(HashEmbedderFactory)).await;
        let vector = pool.embed_text("what are the opening hours").await.unwrap();
        assert_eq!(vector.len(), pool.dims());
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let pool = start_pool(test_config(1), Arc::new(HashEmbedderFactory)).await;
        pool.shutdown();
        // Give the supervisor a moment to exit.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let result = pool
            .embed_chunks(vec![("id".to_string(), "text".to_string())])
            .await;
        assert!(matches!(result, Err(PoolError::ShutDown)));
    }
}
