use serde::{Deserialize, Serialize};

/// Outcome of one completed request attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistic {
    pub request_method: String,
    pub request_uri: String,
    pub status_code: u16,
    pub success: bool,
    pub time_taken_ms: u64,
}

impl Statistic {
    /// Grouping key used for per-endpoint reporting, e.g. `GET:/health`.
    pub fn endpoint_key(&self) -> String {
        format!("{}:{}", self.request_method, self.request_uri)
    }
}
