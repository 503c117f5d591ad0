//! `/health` endpoint.

use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    /// Users with a bound live connection.
    pub online_users: usize,
}

pub fn health_check(start_time: Instant, online_users: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        online_users,
    }
}
