// src/jobs/store.rs

use crate::jobs::error::StoreError;
use crate::jobs::lock::{DirLock, DirLockGuard};
use crate::jobs::model::{Job, JobState, NewJob, StateSummary};
use chrono::{DateTime, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub const JOBS_FILE: &str = "jobs.json";
pub const DLQ_FILE: &str = "dlq.json";

/// File-backed job store: live jobs in `jobs.json`, dead jobs in `dlq.json`.
///
/// Every operation holds the store lock for its whole read-modify-write, so
/// operations never interleave. The lock is an in-process mutex shared by
/// clones plus the data directory's `DirLock`, which also covers other
/// handles and other processes on the same directory.
#[derive(Clone)]
pub struct JobStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    jobs_path: PathBuf,
    dlq_path: PathBuf,
    lock: Mutex<()>,
    dir_lock: DirLock,
}

struct StoreGuard<'a> {
    _local: MutexGuard<'a, ()>,
    _dir: DirLockGuard,
}

/// Both collections as read under the lock.
struct Collections {
    live: Vec<Job>,
    dead: Vec<Job>,
}

impl Collections {
    fn contains(&self, id: &str) -> bool {
        self.live.iter().chain(self.dead.iter()).any(|j| j.id == id)
    }
}

impl JobStore {
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref();
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: data_dir.to_path_buf(),
                source,
            })?;

        Ok(Self {
            inner: Arc::new(StoreInner {
                jobs_path: data_dir.join(JOBS_FILE),
                dlq_path: data_dir.join(DLQ_FILE),
                lock: Mutex::new(()),
                dir_lock: DirLock::new(data_dir),
            }),
        })
    }

    // ----------------------------
    // Enqueue
    // ----------------------------

    /// Append a new pending job. The id must not exist live or dead.
    pub async fn enqueue(&self, new: NewJob) -> Result<Job, StoreError> {
        let _guard = self.lock().await?;
        let mut c = self.load().await?;

        if c.contains(&new.id) {
            return Err(StoreError::DuplicateId(new.id));
        }

        let job = Job::pending(new, now());
        c.live.push(job.clone());
        self.save_live(&c.live).await?;

        debug!(job_id = %job.id, "enqueued job");
        Ok(job)
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>, StoreError> {
        let _guard = self.lock().await?;
        let c = self.load().await?;

        Ok(match state {
            Some(st) => c.live.into_iter().filter(|j| j.state == st).collect(),
            None => c.live,
        })
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let _guard = self.lock().await?;
        let c = self.load().await?;
        Ok(c.live.into_iter().find(|j| j.id == id))
    }

    pub async fn summary(&self) -> Result<StateSummary, StoreError> {
        let _guard = self.lock().await?;
        let c = self.load().await?;

        let mut summary = StateSummary::new();
        for job in &c.live {
            *summary.entry(job.state).or_insert(0) += 1;
        }
        Ok(summary)
    }

    pub async fn list_dead(&self) -> Result<Vec<Job>, StoreError> {
        let _guard = self.lock().await?;
        Ok(self.load().await?.dead)
    }

    // ----------------------------
    // State transitions
    // ----------------------------

    /// Returns false when the job is not live or is already completed.
    /// `Dead` is refused: dead jobs only exist in the DLQ, see `move_to_dead`.
    pub async fn set_state(&self, id: &str, state: JobState) -> Result<bool, StoreError> {
        if state == JobState::Dead {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                state: state.as_str(),
            });
        }
        self.update_live(id, |job| job.state = state).await
    }

    /// Returns false when the job is not live or is already completed.
    pub async fn set_attempts(&self, id: &str, attempts: u32) -> Result<bool, StoreError> {
        self.update_live(id, |job| job.attempts = attempts).await
    }

    /// Claim the oldest pending job: mark it processing and count the attempt,
    /// all under one lock so two workers can never claim the same job.
    pub async fn claim_next_pending(&self) -> Result<Option<Job>, StoreError> {
        let _guard = self.lock().await?;
        let mut c = self.load().await?;

        let Some(job) = c.live.iter_mut().find(|j| j.state == JobState::Pending) else {
            return Ok(None);
        };
        begin_attempt(job);
        let claimed = job.clone();

        self.save_live(&c.live).await?;
        Ok(Some(claimed))
    }

    /// Take a `failed` job straight back to `processing` for its next attempt.
    /// Returns None if the job is gone or is no longer failed.
    pub async fn reclaim_for_retry(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let _guard = self.lock().await?;
        let mut c = self.load().await?;

        let Some(job) = c
            .live
            .iter_mut()
            .find(|j| j.id == id && j.state == JobState::Failed)
        else {
            return Ok(None);
        };
        begin_attempt(job);
        let claimed = job.clone();

        self.save_live(&c.live).await?;
        Ok(Some(claimed))
    }

    /// Put jobs left `processing` or `failed` by an interrupted process back
    /// to `pending`. Returns how many were reset.
    pub async fn recover_interrupted(&self) -> Result<usize, StoreError> {
        let _guard = self.lock().await?;
        let mut c = self.load().await?;

        let stamp = now();
        let mut recovered = 0;
        for job in c
            .live
            .iter_mut()
            .filter(|j| matches!(j.state, JobState::Processing | JobState::Failed))
        {
            job.state = JobState::Pending;
            job.updated_at = stamp;
            recovered += 1;
        }

        if recovered > 0 {
            self.save_live(&c.live).await?;
        }
        Ok(recovered)
    }

    // ----------------------------
    // DLQ
    // ----------------------------

    /// Move a live job into the DLQ, stamped `dead`.
    ///
    /// No-op (false) if the id is not live, so a stale reference can never
    /// put a second copy into the DLQ. The DLQ is written first: a crash
    /// between the two writes leaves a duplicate that `load` reconciles,
    /// never a lost job.
    pub async fn move_to_dead(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.lock().await?;
        let mut c = self.load().await?;

        let Some(pos) = c.live.iter().position(|j| j.id == id) else {
            return Ok(false);
        };
        let mut job = c.live.remove(pos);
        job.state = JobState::Dead;
        job.updated_at = now();
        c.dead.push(job);

        self.save_dead(&c.dead).await?;
        self.save_live(&c.live).await?;

        info!(job_id = %id, "moved job to DLQ");
        Ok(true)
    }

    /// Move a dead job back to the live queue as pending with attempts reset.
    /// Returns false for an unknown id, touching neither collection.
    pub async fn resurrect(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.lock().await?;
        let mut c = self.load().await?;

        let Some(pos) = c.dead.iter().position(|j| j.id == id) else {
            return Ok(false);
        };
        let mut job = c.dead.remove(pos);
        job.state = JobState::Pending;
        job.attempts = 0;
        job.updated_at = now();
        c.live.push(job);

        self.save_live(&c.live).await?;
        self.save_dead(&c.dead).await?;

        info!(job_id = %id, "resurrected job from DLQ");
        Ok(true)
    }

    // ----------------------------
    // Internals
    // ----------------------------

    async fn lock(&self) -> Result<StoreGuard<'_>, StoreError> {
        let local = self.inner.lock.lock().await;
        let dir = self.inner.dir_lock.acquire().await?;
        Ok(StoreGuard {
            _local: local,
            _dir: dir,
        })
    }

    async fn update_live<F>(&self, id: &str, apply: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Job),
    {
        let _guard = self.lock().await?;
        let mut c = self.load().await?;

        let Some(job) = c.live.iter_mut().find(|j| j.id == id) else {
            return Ok(false);
        };
        if job.state == JobState::Completed {
            return Ok(false);
        }
        apply(job);
        job.updated_at = now();

        self.save_live(&c.live).await?;
        Ok(true)
    }

    async fn load(&self) -> Result<Collections, StoreError> {
        let live = load_json(&self.inner.jobs_path).await?.unwrap_or_default();
        let dead = load_json(&self.inner.dlq_path).await?.unwrap_or_default();
        Ok(reconcile(live, dead))
    }

    async fn save_live(&self, live: &[Job]) -> Result<(), StoreError> {
        save_json(&self.inner.jobs_path, live).await
    }

    async fn save_dead(&self, dead: &[Job]) -> Result<(), StoreError> {
        save_json(&self.inner.dlq_path, dead).await
    }
}

/// Timestamps are persisted at microsecond precision; stamp them that way.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn begin_attempt(job: &mut Job) {
    job.state = JobState::Processing;
    job.attempts = job.attempts.saturating_add(1);
    job.updated_at = now();
}

/// An id found in both collections is the trace of a crash between the two
/// writes of a DLQ transition. Keep whichever copy was written last.
fn reconcile(mut live: Vec<Job>, mut dead: Vec<Job>) -> Collections {
    let dead_updated: HashMap<String, _> = dead
        .iter()
        .map(|j| (j.id.clone(), j.updated_at))
        .collect();

    let mut drop_dead = Vec::new();
    live.retain(|job| match dead_updated.get(&job.id) {
        None => true,
        Some(dead_at) if job.updated_at > *dead_at => {
            warn!(job_id = %job.id, "job found live and dead; keeping live copy");
            drop_dead.push(job.id.clone());
            true
        }
        Some(_) => {
            warn!(job_id = %job.id, "job found live and dead; keeping dead copy");
            false
        }
    });
    dead.retain(|job| !drop_dead.contains(&job.id));

    Collections { live, dead }
}

/// Read a JSON document. A missing or blank file is `None`; a file that
/// exists but cannot be read or parsed is an error, never an empty result.
pub(crate) async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Write through a uniquely named temp file in the same directory and
/// rename it into place, so a reader sees either the old document or the
/// new one and concurrent writers never share a temp file.
pub(crate) async fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Encode {
        path: path.to_path_buf(),
        source,
    })?;

    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_replace(&target, &bytes))
        .await
        .unwrap_or_else(|join| Err(std::io::Error::other(join)))
        .map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })
}

fn write_replace(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
