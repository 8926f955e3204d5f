// src/jobs/error.rs
use std::path::PathBuf;

use thiserror::Error;

/// Failures of the persisted job collections.
///
/// A missing file is never an error (it reads as an empty collection);
/// everything here means the on-disk state could not be trusted or written.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create data directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{} is not valid queue state: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("job '{0}' already exists")]
    DuplicateId(String),

    #[error("job '{id}' cannot be set to '{state}' directly; use move_to_dead")]
    InvalidTransition { id: String, state: &'static str },
}

/// Rejected job submissions. Nothing that fails validation reaches the store.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("job is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("job must be a JSON object")]
    NotAnObject,

    #[error("job is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("job field '{0}' must be a non-empty string")]
    EmptyField(&'static str),

    #[error("unknown job state '{0}' (expected pending, processing, completed, failed or dead)")]
    UnknownState(String),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown config key '{0}' (expected max-retries or backoff-base)")]
    UnknownKey(String),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why `WorkerPool::start_workers` reported a fault after draining.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker stopped on storage fault: {0}")]
    Store(#[from] StoreError),

    #[error("worker task panicked: {0}")]
    WorkerPanicked(String),
}
