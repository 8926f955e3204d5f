//! File-backed background job queue for shell commands.
//!
//! Jobs live in `jobs.json`, exhausted jobs in `dlq.json`, and the retry
//! settings in `config.json`, all under one data directory. A
//! [`jobs::WorkerPool`] claims pending jobs, runs them through the shell, and
//! retries failures with exponential backoff on the same worker until they
//! complete or land in the DLQ.

pub mod api;
pub mod config;
pub mod jobs;
pub mod observability;
