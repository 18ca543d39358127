//! Background worker pool that drains the run queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::actor::OwnerType;
use crate::artifacts::ArtifactStore;
use crate::broadcast::ProgressBroadcaster;
use crate::db::Database;
use crate::engine::EngineFactory;
use crate::error::WorkerError;
use crate::secrets::CredentialEncryptor;

use super::executor;

/// A queued run, ready for a worker to pick up.
#[derive(Debug, Clone)]
pub struct RunJob {
    pub run_id: i64,
    pub topic: String,
    pub owner_type: OwnerType,
    pub owner_id: i64,
    /// Relative run directory under the artifact root.
    pub run_dir: String,
}

/// Everything a worker needs to execute runs.
#[derive(Clone)]
pub struct WorkerContext {
    pub db: Database,
    pub store: ArtifactStore,
    pub broadcaster: ProgressBroadcaster,
    pub factory: Arc<dyn EngineFactory>,
    pub encryptor: Option<Arc<CredentialEncryptor>>,
}

pub struct RunWorkerPool {
    job_sender: Sender<RunJob>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl RunWorkerPool {
    /// Spawns `worker_count` threads draining the run queue.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(ctx: WorkerContext, worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (job_sender, job_receiver) = bounded::<RunJob>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_ctx = ctx.clone();

            let handle = thread::spawn(move || {
                run_worker(worker_id, job_rx, shutdown_flag, worker_ctx);
            });
            workers.push(handle);
        }

        info!("Started {} run workers", worker_count);

        Self {
            job_sender,
            workers,
            shutdown,
        }
    }

    /// Queues a job without blocking. A full queue is reported to the
    /// caller instead of stalling the submitting thread behind
    /// long-running engine work.
    pub fn submit(&self, job: RunJob) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }
        match self.job_sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(crossbeam_channel::TrySendError::Full(_)) => Err(WorkerError::QueueFull),
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => Err(WorkerError::ChannelClosed),
        }
    }

    pub fn shutdown(&self) {
        info!("Shutting down run worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Waits for in-flight runs to finish and workers to exit.
    pub fn wait(self) {
        // Drop sender to signal workers to exit.
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Run worker {} panicked: {:?}", i, e);
            } else {
                debug!("Run worker {} finished", i);
            }
        }

        info!("All run workers have stopped");
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<RunJob>,
    shutdown: Arc<AtomicBool>,
    ctx: WorkerContext,
) {
    debug!("Run worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Run worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(job) => {
                debug!("Run worker {} picked up run {}", worker_id, job.run_id);
                executor::execute(&ctx, &job);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Run worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Run worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use tempfile::TempDir;

    use crate::artifacts::ArtifactStore;
    use crate::broadcast::ProgressSink;
    use crate::db::run_repo;
    use crate::engine::{EngineError, EngineHandle, EngineRequest, EngineSettings};

    const NOW: &str = "2026-01-01T00:00:00Z";

    /// Engine that parks on a shared lock, keeping its worker busy for
    /// as long as the test holds the guard.
    struct ParkedEngine {
        gate: Arc<Mutex<()>>,
    }

    impl EngineHandle for ParkedEngine {
        fn generate(
            &mut self,
            _request: &EngineRequest,
            _sink: &dyn ProgressSink,
        ) -> Result<(), EngineError> {
            let _held = self.gate.lock().unwrap_or_else(|e| e.into_inner());
            Ok(())
        }
    }

    struct ParkedFactory {
        gate: Arc<Mutex<()>>,
    }

    impl crate::engine::EngineFactory for ParkedFactory {
        fn create(
            &self,
            _settings: &EngineSettings,
        ) -> Result<Box<dyn EngineHandle>, EngineError> {
            Ok(Box::new(ParkedEngine {
                gate: Arc::clone(&self.gate),
            }))
        }
    }

    fn context(gate: Arc<Mutex<()>>) -> (TempDir, WorkerContext) {
        let tmp = TempDir::new().unwrap();
        let ctx = WorkerContext {
            db: Database::open_in_memory().unwrap(),
            store: ArtifactStore::new(tmp.path()),
            broadcaster: ProgressBroadcaster::new(16),
            factory: Arc::new(ParkedFactory { gate }),
            encryptor: None,
        };
        (tmp, ctx)
    }

    fn job(ctx: &WorkerContext, topic: &str) -> RunJob {
        let run_id = run_repo::insert(&ctx.db, topic, "admin", 1, NOW).unwrap();
        RunJob {
            run_id,
            topic: topic.to_string(),
            owner_type: OwnerType::Admin,
            owner_id: 1,
            run_dir: format!("admin_ops/run_{}_{}", run_id, topic.to_lowercase()),
        }
    }

    #[test]
    fn test_full_queue_rejects_instead_of_blocking() {
        let gate = Arc::new(Mutex::new(()));
        let (_tmp, ctx) = context(Arc::clone(&gate));

        let guard = gate.lock().unwrap();
        let pool = RunWorkerPool::new(ctx.clone(), 1);

        // One worker with its engine parked and a queue of two slots:
        // submissions past that must come back QueueFull immediately.
        let mut rejected = 0;
        for i in 0..5 {
            match pool.submit(job(&ctx, &format!("Topic{}", i))) {
                Ok(()) => {}
                Err(WorkerError::QueueFull) => rejected += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert!(rejected >= 1, "full queue never rejected a submission");

        drop(guard);
        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let gate = Arc::new(Mutex::new(()));
        let (_tmp, ctx) = context(gate);
        let pool = RunWorkerPool::new(ctx.clone(), 1);

        pool.shutdown();
        assert!(pool.is_shutdown());
        assert!(matches!(
            pool.submit(job(&ctx, "Late")),
            Err(WorkerError::ChannelClosed)
        ));
        pool.wait();
    }
}
