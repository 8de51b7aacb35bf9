use crate::*;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;

/// How long `shutdown` waits for running work
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// The process-wide worker pool for CPU-bound cryptographic work.
///
/// Created once at startup and shut down once at exit. After `shutdown`
/// nothing more can be scheduled.
pub struct Scheduler {
    runtime: Mutex<Option<Runtime>>,
    workers: usize,
    id: String,
    next_attempt: AtomicU64,
    attempts: Arc<Mutex<HashSet<String>>>,
}

impl Scheduler {
    pub fn new(workers: usize) -> Result<Self, Error> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .max_blocking_threads(workers)
            .thread_name("ballotguard-worker")
            .build()
            .map_err(|e| Error::Internal(format!("unable to start worker pool: {}", e)))?;

        let id = hex::encode(rand::random::<[u8; 8]>());
        log::debug!("started worker pool {} with {} workers", id, workers);
        Ok(Scheduler {
            runtime: Mutex::new(Some(runtime)),
            workers,
            id,
            next_attempt: AtomicU64::new(1),
            attempts: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Random per-process id, the prefix of every attempt this pool hands out
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register a unit of work. It stays active until the `Attempt` is dropped,
    /// so move it into the closure that does the work.
    pub fn begin_attempt(&self) -> Attempt {
        let n = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}-{}", self.id, n);
        self.attempts.lock().insert(id.clone());
        Attempt {
            id,
            attempts: self.attempts.clone(),
        }
    }

    /// True when `attempt` was handed out by this pool
    pub fn owns(&self, attempt: &str) -> bool {
        attempt
            .strip_prefix(self.id.as_str())
            .map(|rest| rest.starts_with('-'))
            .unwrap_or(false)
    }

    pub fn is_active(&self, attempt: &str) -> bool {
        self.attempts.lock().contains(attempt)
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Run `f` on the pool. Its result is delivered through the returned handle.
    pub fn spawn_blocking<F, T>(&self, f: F) -> Result<TaskHandle<T>, Error>
    where
        F: FnOnce() -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let runtime = self.runtime.lock();
        match runtime.as_ref() {
            Some(rt) => Ok(TaskHandle {
                inner: rt.spawn_blocking(f),
            }),
            None => Err(Error::Internal("worker pool is shut down".into())),
        }
    }

    /// Stop the pool, letting running work finish within a grace period
    pub fn shutdown(&self) {
        if let Some(rt) = self.runtime.lock().take() {
            rt.shutdown_timeout(SHUTDOWN_GRACE);
            log::debug!("worker pool shut down");
        }
    }
}

/// A registered unit of work, see `Scheduler::begin_attempt`
pub struct Attempt {
    id: String,
    attempts: Arc<Mutex<HashSet<String>>>,
}

impl Attempt {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for Attempt {
    fn drop(&mut self) {
        self.attempts.lock().remove(&self.id);
    }
}

/// A handle to work running on the `Scheduler`
pub struct TaskHandle<T> {
    inner: JoinHandle<Result<T, Error>>,
}

impl<T> TaskHandle<T> {
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Block until the work completes and return its result
    pub fn wait(self) -> Result<T, Error> {
        match futures::executor::block_on(self.inner) {
            Ok(result) => result,
            Err(e) => {
                log::error!("background task failed: {}", e);
                Err(Error::Internal(format!("background task failed: {}", e)))
            }
        }
    }
}
