use queuectl::api;
use queuectl::config;
use queuectl::jobs::{JobStore, SettingsRepo, ShellExecutor, WorkerPool};
use queuectl::observability;

use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::from_env()?;
    observability::init(cfg.log_json);

    let api_addr = cfg.admin_addr.clone();

    info!(
        data_dir = %cfg.data_dir.display(),
        workers = cfg.workers,
        poll_interval_ms = cfg.poll_interval_ms,
        backoff_unit_ms = cfg.backoff_unit_ms,
        max_backoff_secs = ?cfg.max_backoff_secs,
        backoff_jitter_pct = cfg.backoff_jitter_pct,
        api = api_addr.as_deref().unwrap_or("disabled"),
        "queuectl worker starting"
    );

    let store = JobStore::open(&cfg.data_dir).await?;
    let settings = SettingsRepo::new(&cfg.data_dir);
    let settings_now = settings.get().await?;
    info!(
        max_retries = settings_now.max_retries,
        backoff_base = settings_now.backoff_base,
        "queue settings loaded"
    );

    let pool = WorkerPool::new(
        store.clone(),
        settings.clone(),
        ShellExecutor::default(),
        cfg.pool_options(),
    );

    // ---- API task ----
    let app = api::router(api::ApiState {
        store,
        settings,
        pool: pool.clone(),
    });
    let api_pool = pool.clone();

    let api_handle = tokio::spawn(async move {
        let Some(addr) = api_addr else {
            return Ok(());
        };
        let stopped = api_pool.shutdown_signal();
        let served = async {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("admin api listening on http://{addr}");
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stopped.triggered().await })
                .await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        // A failed admin API takes the pool down with it.
        if let Err(e) = &served {
            error!(error = %e, "admin api failed");
            api_pool.stop_workers();
        }
        served
    });

    // ---- Worker pool ----
    let worker_count = cfg.workers;
    let pool_handle = tokio::spawn(async move {
        let res = pool.start_workers(worker_count).await;
        // Let the admin API drain even if the pool ended on a fault.
        pool.stop_workers();
        res
    });

    let (pool_res, api_res) = tokio::join!(pool_handle, api_handle);
    pool_res??;
    api_res??;

    info!("queuectl worker exited");
    Ok(())
}
