use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::error::{ErrorKind, JobError, WorkerError};
use crate::jobs::{JobStore, INTERRUPTED_MESSAGE};
use crate::pipeline::timeout::panic_message;
use crate::pipeline::{Pipeline, PipelineContext, StoreProgress};
use crate::worker::job::Job;

pub struct WorkerPool {
    job_sender: Sender<Job>,
    /// Kept to drain jobs still queued at shutdown.
    job_receiver: Receiver<Job>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    store: Arc<JobStore>,
}

impl WorkerPool {
    /// Starts `worker_count` threads sharing one bounded queue of
    /// `2 * worker_count` jobs.
    pub fn new(
        pipeline: Arc<Pipeline>,
        store: Arc<JobStore>,
        worker_count: usize,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }
        let (job_sender, job_receiver) = bounded::<Job>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_pipeline = Arc::clone(&pipeline);
            let worker_store = Arc::clone(&store);

            let spawned = thread::Builder::new()
                .name(format!("ocrpipe-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        job_rx,
                        shutdown_flag,
                        worker_pipeline,
                        worker_store,
                    );
                });

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shutdown.store(true, Ordering::Relaxed);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender,
            job_receiver,
            workers,
            shutdown,
            store,
        })
    }

    /// Queues a job. Blocks while the queue is full.
    pub fn submit(&self, job: Job) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(job)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// Jobs waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.job_receiver.len()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Waits for running jobs to finish, then fails whatever is still queued.
    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        let mut interrupted = 0;
        for job in self.job_receiver.try_iter() {
            // Pending → InProgress → Failed keeps the transition order intact
            let failed = self.store.start(&job.id).and_then(|_| {
                self.store.fail(
                    &job.id,
                    JobError::new(ErrorKind::Timeout, INTERRUPTED_MESSAGE),
                )
            });
            if let Err(e) = failed {
                warn!("Could not fail queued job {}: {}", job.id, e);
            }
            interrupted += 1;
        }
        if interrupted > 0 {
            warn!("{} queued job(s) failed by shutdown", interrupted);
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<Job>,
    shutdown: Arc<AtomicBool>,
    pipeline: Arc<Pipeline>,
    store: Arc<JobStore>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(job) => {
                debug!("Worker {} processing job {}", worker_id, job.id);
                execute(&pipeline, &store, job);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Runs one job to a terminal state.
fn execute(pipeline: &Pipeline, store: &Arc<JobStore>, job: Job) {
    if let Err(e) = store.start(&job.id) {
        warn!("Skipping job {}: {}", job.id, e);
        return;
    }

    let progress = StoreProgress::new(Arc::clone(store), &job.id);
    let ctx = PipelineContext::for_job(&job.id, job.strategy, job.request);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| pipeline.run(ctx, &progress)));
    let finished = match outcome {
        Ok(Ok(output)) => store.succeed(&job.id, output),
        Ok(Err(e)) => {
            warn!("Job {} failed: {}", job.id, e);
            store.fail(&job.id, e.to_job_error())
        }
        Err(payload) => {
            let reason = panic_message(payload);
            error!("Job {} panicked: {}", job.id, reason);
            store.fail(
                &job.id,
                JobError::new(
                    ErrorKind::ExtractionFailure,
                    format!("pipeline panicked: {}", reason),
                ),
            )
        }
    };

    match finished {
        Ok(record) => info!("Job {} finished: {}", job.id, record.state),
        Err(e) => error!("Could not record outcome of job {}: {}", job.id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::JobsConfig;
    use crate::error::ExtractionError;
    use crate::jobs::JobState;
    use crate::llm::{GenerationService, LlmError, LlmPostProcessor, ModelInfo};
    use crate::pipeline::PipelineConfig;
    use crate::storage::FilesystemStorage;
    use crate::strategy::{ExtractionStrategy, PageProgress, StrategyId, StrategyRegistry};
    use crate::worker::job::ExtractionRequest;
    use std::time::{Duration, Instant};

    struct SleepyStrategy(Duration);

    impl ExtractionStrategy for SleepyStrategy {
        fn id(&self) -> StrategyId {
            StrategyId::Marker
        }

        fn extract_text(&self, document: &[u8], _: &dyn PageProgress) -> Result<String, ExtractionError> {
            thread::sleep(self.0);
            if document.ends_with(b"panic") {
                panic!("strategy bug");
            }
            Ok(format!("{} bytes", document.len()))
        }
    }

    struct NoLlm;

    impl GenerationService for NoLlm {
        fn generate(&self, _: &str, _: &str) -> Result<String, LlmError> {
            Err(LlmError::Connection("offline".into()))
        }
        fn describe_images(&self, _: &str, _: &str, _: &[String]) -> Result<String, LlmError> {
            Err(LlmError::Connection("offline".into()))
        }
        fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
            Ok(Vec::new())
        }
        fn pull(&self, _: &str) -> Result<(), LlmError> {
            Ok(())
        }
    }

    fn pipeline(delay: Duration) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            PipelineConfig::default(),
            StrategyRegistry::with_strategies([
                Arc::new(SleepyStrategy(delay)) as Arc<dyn ExtractionStrategy>
            ]),
            Arc::new(MemoryCache::new()),
            LlmPostProcessor::new(Arc::new(NoLlm), false),
            Arc::new(FilesystemStorage::default()),
        ))
    }

    fn submit(pool: &WorkerPool, store: &JobStore, body: &[u8]) -> String {
        let job = store.create(StrategyId::Marker);
        let request = ExtractionRequest::new(body.to_vec(), "marker");
        pool.submit(Job::new(&job.id, StrategyId::Marker, request))
            .unwrap();
        job.id
    }

    fn wait_terminal(store: &JobStore, id: &str) -> JobState {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let state = store.get(id).unwrap().state;
            if state.is_terminal() || Instant::now() > deadline {
                return state;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_worker_pool_creation() {
        let store = Arc::new(JobStore::new(&JobsConfig::default()));
        let pool = WorkerPool::new(pipeline(Duration::ZERO), store, 2).unwrap();

        assert!(!pool.is_shutdown());
        assert_eq!(pool.worker_count(), 2);

        pool.shutdown();
        assert!(pool.is_shutdown());

        pool.wait();
    }

    #[test]
    fn test_zero_workers_is_an_error() {
        let store = Arc::new(JobStore::new(&JobsConfig::default()));
        assert!(WorkerPool::new(pipeline(Duration::ZERO), store, 0).is_err());
    }

    #[test]
    fn test_jobs_run_to_success() {
        let store = Arc::new(JobStore::new(&JobsConfig::default()));
        let pool = WorkerPool::new(pipeline(Duration::ZERO), Arc::clone(&store), 2).unwrap();

        let ids: Vec<String> = (0..5)
            .map(|i| submit(&pool, &store, format!("%PDF-{}", i).as_bytes()))
            .collect();

        for id in &ids {
            assert_eq!(wait_terminal(&store, id), JobState::Succeeded);
        }
        let output = store.get(&ids[0]).unwrap().output.unwrap();
        assert_eq!(output.text, "6 bytes");

        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_panicking_pipeline_fails_the_job() {
        let store = Arc::new(JobStore::new(&JobsConfig::default()));
        let pool = WorkerPool::new(pipeline(Duration::ZERO), Arc::clone(&store), 1).unwrap();

        let id = submit(&pool, &store, b"%PDF-panic");
        assert_eq!(wait_terminal(&store, &id), JobState::Failed);
        let error = store.get(&id).unwrap().error.unwrap();
        assert_eq!(error.kind, ErrorKind::ExtractionFailure);

        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let store = Arc::new(JobStore::new(&JobsConfig::default()));
        let pool = WorkerPool::new(pipeline(Duration::ZERO), Arc::clone(&store), 1).unwrap();
        pool.shutdown();

        let job = store.create(StrategyId::Marker);
        let result = pool.submit(Job::new(
            &job.id,
            StrategyId::Marker,
            ExtractionRequest::new(b"%PDF-".to_vec(), "marker"),
        ));
        assert!(matches!(result, Err(WorkerError::ChannelClosed)));
        pool.wait();
    }

    #[test]
    fn test_queued_jobs_fail_on_shutdown() {
        let store = Arc::new(JobStore::new(&JobsConfig::default()));
        let pool =
            WorkerPool::new(pipeline(Duration::from_millis(300)), Arc::clone(&store), 1).unwrap();

        let running = submit(&pool, &store, b"%PDF-a");
        // Let the single worker pick up the first job
        thread::sleep(Duration::from_millis(100));
        let queued = submit(&pool, &store, b"%PDF-b");

        pool.shutdown();
        pool.wait();

        assert_eq!(store.get(&running).unwrap().state, JobState::Succeeded);
        let job = store.get(&queued).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.unwrap().kind, ErrorKind::Timeout);
    }
}
