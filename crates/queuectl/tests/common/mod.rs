use queuectl::jobs::retry::RetryConfig;
use queuectl::jobs::{
    Job, JobStore, NewJob, PoolOptions, SettingsRepo, ShellExecutor, WorkerPool,
};
use std::future::Future;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestQueue {
    // Dropping the dir deletes the queue files.
    pub dir: TempDir,
    pub store: JobStore,
    pub settings: SettingsRepo,
}

pub async fn setup_queue() -> TestQueue {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let store = JobStore::open(dir.path())
        .await
        .expect("failed to open job store");
    let settings = SettingsRepo::new(dir.path());

    TestQueue {
        dir,
        store,
        settings,
    }
}

#[allow(dead_code)]
pub async fn enqueue(store: &JobStore, id: &str, command: &str) -> Job {
    let new = NewJob::new(id, command).expect("invalid test job");
    store.enqueue(new).await.expect("enqueue failed")
}

/// Millisecond backoff units and a short poll keep worker tests fast.
#[allow(dead_code)]
pub fn fast_pool(q: &TestQueue) -> WorkerPool {
    let options = PoolOptions {
        poll_interval: Duration::from_millis(20),
        retry: RetryConfig {
            unit: Duration::from_millis(10),
            ..RetryConfig::default()
        },
    };
    WorkerPool::new(
        q.store.clone(),
        q.settings.clone(),
        ShellExecutor::default(),
        options,
    )
}

/// Poll `check` until it returns true or `timeout` passes.
#[allow(dead_code)]
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
