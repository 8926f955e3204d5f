use crate::jobs::{
    error::StoreError,
    executor::ShellExecutor,
    model::{Job, JobState},
    retry::{next_delay, should_retry, RetryConfig},
    settings::{QueueSettings, SettingsRepo},
    shutdown::ShutdownSignal,
    store::JobStore,
};
use rand::{rngs::StdRng, SeedableRng};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How a claimed job left the worker that drew it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    DeadLettered,
    /// Shutdown was requested during a backoff; the job went back to pending.
    Released,
    /// The job was removed or changed under the worker; nothing left to do.
    Vanished,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    Retry { attempts: u32, delay: Duration },
    DeadLettered { attempts: u32 },
    Vanished,
}

/// Executes a claimed job and applies the retry/DLQ rules until the job
/// reaches an outcome. Retries stay on the calling worker.
#[derive(Clone)]
pub struct JobRunner {
    store: JobStore,
    settings: SettingsRepo,
    executor: ShellExecutor,
    retry_cfg: RetryConfig,
}

impl JobRunner {
    pub fn new(
        store: JobStore,
        settings: SettingsRepo,
        executor: ShellExecutor,
        retry_cfg: RetryConfig,
    ) -> Self {
        Self {
            store,
            settings,
            executor,
            retry_cfg,
        }
    }

    /// `job` must already be claimed (state `processing`, attempt counted).
    pub async fn run(
        &self,
        worker_id: usize,
        mut job: Job,
        shutdown: &ShutdownSignal,
    ) -> Result<RunOutcome, StoreError> {
        loop {
            let start = Instant::now();
            let result = self.executor.run(&job.command).await;
            let latency_ms = start.elapsed().as_millis() as u64;

            if result.succeeded {
                self.on_success(&job).await?;
                info!(
                    worker_id,
                    job_id = %job.id,
                    attempt = job.attempts,
                    latency_ms,
                    "job completed"
                );
                return Ok(RunOutcome::Completed);
            }

            warn!(
                worker_id,
                job_id = %job.id,
                attempt = job.attempts,
                exit_code = result.exit_code,
                error = result.error.as_deref().unwrap_or_default(),
                latency_ms,
                "job attempt failed"
            );

            let delay = match self.on_failure(&job).await? {
                FailureDecision::Retry { delay, .. } => delay,
                FailureDecision::DeadLettered { attempts } => {
                    warn!(worker_id, job_id = %job.id, attempts, "retries exhausted, job moved to DLQ");
                    return Ok(RunOutcome::DeadLettered);
                }
                FailureDecision::Vanished => return Ok(RunOutcome::Vanished),
            };

            info!(
                worker_id,
                job_id = %job.id,
                delay_ms = delay.as_millis() as u64,
                "retrying job after backoff"
            );
            tokio::time::sleep(delay).await;

            if shutdown.is_triggered() {
                self.store.set_state(&job.id, JobState::Pending).await?;
                info!(worker_id, job_id = %job.id, "shutdown requested, job released to pending");
                return Ok(RunOutcome::Released);
            }

            // Re-read after the sleep: the attempts counter may have moved.
            job = match self.store.reclaim_for_retry(&job.id).await? {
                Some(latest) => latest,
                None => {
                    warn!(worker_id, job_id = %job.id, "job changed during backoff, dropping retry");
                    return Ok(RunOutcome::Vanished);
                }
            };
        }
    }

    pub async fn on_success(&self, job: &Job) -> Result<(), StoreError> {
        if !self.store.set_state(&job.id, JobState::Completed).await? {
            warn!(job_id = %job.id, "completed job was no longer live");
        }
        Ok(())
    }

    pub async fn on_failure(&self, job: &Job) -> Result<FailureDecision, StoreError> {
        // 1) Latest persisted attempt count decides, not our local copy
        let Some(latest) = self.store.get(&job.id).await? else {
            return Ok(FailureDecision::Vanished);
        };
        let attempts = latest.attempts;
        let settings = self.current_settings().await;

        // 2) Decide retry vs DLQ
        if !should_retry(attempts, settings.max_retries) {
            if !self.store.move_to_dead(&job.id).await? {
                return Ok(FailureDecision::Vanished);
            }
            return Ok(FailureDecision::DeadLettered { attempts });
        }

        if !self.store.set_state(&job.id, JobState::Failed).await? {
            return Ok(FailureDecision::Vanished);
        }

        let mut rng = StdRng::from_entropy();
        let delay = next_delay(attempts, settings.backoff_base, &self.retry_cfg, &mut rng);
        Ok(FailureDecision::Retry { attempts, delay })
    }

    /// Defaults when `config.json` cannot be read.
    async fn current_settings(&self) -> QueueSettings {
        match self.settings.get().await {
            Ok(settings) => settings,
            Err(e) => {
                error!(error = %e, "failed to read queue settings, using defaults");
                QueueSettings::default()
            }
        }
    }
}
