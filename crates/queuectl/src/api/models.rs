// src/api/models.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jobs::{JobState, StateSummary};

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Live jobs by state.
    pub jobs: StateSummary,
    pub dead: usize,
    pub active_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryResponse {
    pub id: String,
    pub state: JobState,
}

#[derive(Debug, Deserialize)]
pub struct SetConfigRequest {
    pub value: Value,
}
