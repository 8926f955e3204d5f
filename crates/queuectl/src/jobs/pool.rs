use crate::jobs::{
    error::{PoolError, StoreError},
    executor::ShellExecutor,
    retry::RetryConfig,
    runner::JobRunner,
    settings::SettingsRepo,
    shutdown::ShutdownSignal,
    store::JobStore,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Idle wait between polls when no job is pending.
    pub poll_interval: Duration,
    pub retry: RetryConfig,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            retry: RetryConfig::default(),
        }
    }
}

/// Lifecycle of a single worker, independent of the jobs it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl WorkerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerPhase::Starting => "starting",
            WorkerPhase::Running => "running",
            WorkerPhase::Stopping => "stopping",
            WorkerPhase::Stopped => "stopped",
        }
    }
}

/// A fixed set of workers sharing one `JobStore`.
///
/// Clones share the stop signal and the active counter, so a clone handed to
/// the admin API can stop the pool that another clone is running. A pool is
/// single-use: once stopped, `start_workers` returns as soon as the workers
/// notice the signal.
#[derive(Clone)]
pub struct WorkerPool {
    store: JobStore,
    runner: JobRunner,
    options: PoolOptions,
    shutdown: ShutdownSignal,
    active: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(
        store: JobStore,
        settings: SettingsRepo,
        executor: ShellExecutor,
        options: PoolOptions,
    ) -> Self {
        let runner = JobRunner::new(store.clone(), settings, executor, options.retry.clone());
        Self {
            store,
            runner,
            options,
            shutdown: ShutdownSignal::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Workers currently polling or executing (not yet stopping).
    pub fn active_worker_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Ask every worker to stop at its next loop boundary. Does not wait.
    pub fn stop_workers(&self) {
        if !self.shutdown.is_triggered() {
            info!("stopping all workers");
        }
        self.shutdown.trigger();
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Run `count` workers until Ctrl-C or `stop_workers`, then wait for all
    /// of them to exit.
    ///
    /// A worker that hits a storage fault logs it and exits; the others keep
    /// going. The first such fault is returned once every worker is done.
    pub async fn start_workers(&self, count: usize) -> Result<(), PoolError> {
        if count == 0 {
            warn!("start_workers called with zero workers; nothing to run");
            return Ok(());
        }

        let recovered = self.store.recover_interrupted().await?;
        if recovered > 0 {
            warn!(recovered, "reset interrupted jobs to pending");
        }

        let mut workers = JoinSet::new();
        for worker_id in 1..=count {
            let pool = self.clone();
            workers.spawn(async move { pool.worker_loop(worker_id).await });
        }
        info!(count, "workers started");

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut listening = true;
        let mut first_fault: Option<PoolError> = None;

        loop {
            tokio::select! {
                res = &mut ctrl_c, if listening => {
                    listening = false;
                    match res {
                        Ok(()) => {
                            info!("interrupt received");
                            self.stop_workers();
                        }
                        Err(e) => warn!(error = %e, "cannot listen for ctrl-c; use stop_workers"),
                    }
                }
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => {
                        first_fault.get_or_insert(PoolError::Store(e));
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "worker task panicked");
                        first_fault.get_or_insert(PoolError::WorkerPanicked(e.to_string()));
                    }
                }
            }
        }

        info!("all workers stopped");
        match first_fault {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    async fn worker_loop(&self, worker_id: usize) -> Result<(), StoreError> {
        debug!(worker_id, phase = WorkerPhase::Starting.as_str());
        let active = ActiveWorker::enter(&self.active);
        info!(worker_id, phase = WorkerPhase::Running.as_str(), "worker started");

        let result = self.poll_until_stopped(worker_id).await;

        drop(active);
        debug!(worker_id, phase = WorkerPhase::Stopping.as_str());
        if let Err(e) = &result {
            error!(worker_id, error = %e, "worker stopped on storage fault");
        }
        info!(worker_id, phase = WorkerPhase::Stopped.as_str(), "worker stopped");
        result
    }

    async fn poll_until_stopped(&self, worker_id: usize) -> Result<(), StoreError> {
        while !self.shutdown.is_triggered() {
            let Some(job) = self.store.claim_next_pending().await? else {
                tokio::time::sleep(self.options.poll_interval).await;
                continue;
            };

            info!(worker_id, job_id = %job.id, attempt = job.attempts, "claimed job");
            let outcome = self.runner.run(worker_id, job, &self.shutdown).await?;
            debug!(worker_id, ?outcome, "job left worker");
        }
        Ok(())
    }
}

/// Counts one worker as active for as long as it lives, including when the
/// worker task unwinds from a panic.
struct ActiveWorker {
    count: Arc<AtomicUsize>,
}

impl ActiveWorker {
    fn enter(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self {
            count: Arc::clone(count),
        }
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}
