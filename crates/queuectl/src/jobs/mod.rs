pub mod error;
pub mod executor;
pub mod lock;
pub mod model;
pub mod retry;
pub mod settings;
pub mod shutdown;
pub mod store;

pub mod runner;
pub use runner::{JobRunner, RunOutcome};

pub mod pool;
pub use pool::{PoolOptions, WorkerPool};

pub use error::{PoolError, SettingsError, StoreError, ValidationError};
pub use executor::{ExecOutcome, ShellExecutor};
pub use model::{Job, JobState, NewJob, StateSummary};
pub use settings::{QueueSettings, SettingKey, SettingsRepo};
pub use store::JobStore;
