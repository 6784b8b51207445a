//! The job module runs finalized queries on a fixed-size worker pool.
//!
//! Each `run()` on a query maker produces exactly one `Job`; at most one job
//! per maker is in flight at a time. Jobs check the shared abort flag before
//! executing and the strategies check it again before demarshaling, so an
//! aborted query never mutates the registry and never delivers results.
//! Backend failures are recovered here: they surface to the consumer as an
//! empty completed result, never as a panic across the pool boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::clientlib::ThreadRegistrar;
use crate::collection::RemovalSignal;
use crate::errors::{Result, ViolaError};
use crate::meta::EntityList;
use crate::query::{QueryDescription, QueryKind, QueryState, QueryStrategy};
use crate::registry::EntityRegistry;

/// Fixed-size thread pool shared by the collections of one context. Workers
/// are plain OS threads; blocking backend calls are expected on them.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<WorkerPool> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("viola-worker-{i}"))
            .build()
            .map_err(|e| ViolaError::Pool(e.to_string()))?;
        Ok(WorkerPool { pool })
    }

    pub fn with_default_workers() -> Result<WorkerPool> {
        WorkerPool::new(num_cpus::get())
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub(crate) fn spawn(&self, work: impl FnOnce() + Send + 'static) {
        self.pool.spawn(work);
    }
}

/// Outcome of one job, delivered through the `QueryHandle`.
#[derive(Debug)]
pub enum QueryOutcome {
    /// The query ran to completion; backend errors degrade to an empty list.
    Completed(EntityList),
    /// The abort flag was observed in time; nothing was delivered and the
    /// registry was left untouched.
    Aborted,
}

/// Receiver side of a job's completion signal. The calling context never
/// blocks in `run()`; it waits here, or polls with a timeout.
#[derive(Debug)]
pub struct QueryHandle {
    kind: QueryKind,
    rx: mpsc::Receiver<QueryOutcome>,
}

impl QueryHandle {
    pub(crate) fn new(kind: QueryKind, rx: mpsc::Receiver<QueryOutcome>) -> QueryHandle {
        QueryHandle { kind, rx }
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Block until the job delivers its outcome.
    pub fn wait(&self) -> Result<QueryOutcome> {
        self.rx
            .recv()
            .map_err(|_| ViolaError::Generic("query worker disappeared before delivering a result".to_string()))
    }

    /// Like `wait`, but gives up after `timeout`, returning `Ok(None)`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<QueryOutcome>> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(ViolaError::Generic("query worker disappeared before delivering a result".to_string()))
            }
        }
    }
}

/// State shared between a query maker and its in-flight job.
pub(crate) struct JobShared {
    pub(crate) abort: AtomicBool,
    pub(crate) state: Mutex<QueryState>,
}

/// One asynchronous execution of a finalized query.
pub(crate) struct Job {
    job_id: String,
    desc: QueryDescription,
    kind: QueryKind,
    strategy: Arc<dyn QueryStrategy>,
    registry: Arc<EntityRegistry>,
    shared: Arc<JobShared>,
    registrar: Option<Arc<ThreadRegistrar>>,
    removal: Arc<RemovalSignal>,
    collection_id: String,
    tx: mpsc::Sender<QueryOutcome>,
}

impl Job {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        desc: QueryDescription,
        kind: QueryKind,
        strategy: Arc<dyn QueryStrategy>,
        registry: Arc<EntityRegistry>,
        shared: Arc<JobShared>,
        registrar: Option<Arc<ThreadRegistrar>>,
        removal: Arc<RemovalSignal>,
        collection_id: String,
        tx: mpsc::Sender<QueryOutcome>,
    ) -> Job {
        Job {
            job_id: uuid::Uuid::new_v4().to_string(),
            desc,
            kind,
            strategy,
            registry,
            shared,
            registrar,
            removal,
            collection_id,
            tx,
        }
    }

    pub(crate) fn job_id(&self) -> &str {
        &self.job_id
    }

    pub(crate) fn execute(self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if self.shared.abort.load(Ordering::SeqCst) {
                *state = QueryState::Aborted;
                drop(state);
                debug!(job_id = %self.job_id, "job aborted before execution");
                let _ = self.tx.send(QueryOutcome::Aborted);
                return;
            }
            *state = QueryState::Executing;
        }

        // every backend touch goes through per-thread client registration
        if let Some(registrar) = &self.registrar {
            registrar.ensure_initialized();
        }

        let outcome = match self.strategy.execute(&self.desc, &self.registry, &self.shared.abort) {
            Ok(Some(list)) => {
                debug!(job_id = %self.job_id, results = list.len(), "job completed");
                QueryOutcome::Completed(list)
            }
            Ok(None) => {
                debug!(job_id = %self.job_id, "job aborted");
                QueryOutcome::Aborted
            }
            Err(e) => {
                warn!(job_id = %self.job_id, collection_id = %self.collection_id, error = %e,
                    "query failed; delivering empty result");
                if !self.strategy.is_connected() {
                    self.removal.fire(&self.collection_id);
                }
                QueryOutcome::Completed(EntityList::empty(self.kind))
            }
        };

        {
            let mut state = self.shared.state.lock().unwrap();
            *state = match outcome {
                QueryOutcome::Aborted => QueryState::Aborted,
                QueryOutcome::Completed(_) => QueryState::Completed,
            };
        }
        let _ = self.tx.send(outcome);
    }
}
