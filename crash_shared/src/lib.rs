use crash_core::{HistoryEntry, Snapshot, Verification};
use serde::{Deserialize, Serialize};

/// Messages pushed to WebSocket subscribers.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", content = "data")]
pub enum ServerMsg {
    Snapshot(Snapshot),
    /// Flight progress for the round of the last full `Snapshot`.
    Multiplier { round_id: u64, multiplier: f64 },
    /// The subscriber fell behind and `0` snapshots were dropped.
    Lagged(u64),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HistoryResponse {
    pub rounds: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VerifyResponse {
    pub round_id: u64,
    pub crash_point: f64,
    pub commitment: String,
    pub seed: String,
    pub client_seed: String,
    pub commitment_matches: bool,
    pub recomputed_crash_point: f64,
    pub crash_point_matches: bool,
    pub fair: bool,
}

impl VerifyResponse {
    pub fn new(entry: &HistoryEntry, verification: &Verification) -> Self {
        Self {
            round_id: entry.round_id,
            crash_point: entry.crash_point,
            commitment: entry.commitment.clone(),
            seed: entry.seed.clone(),
            client_seed: entry.client_seed.clone(),
            commitment_matches: verification.commitment_matches,
            recomputed_crash_point: verification.recomputed_crash_point,
            crash_point_matches: verification.crash_point_matches,
            fair: verification.is_fair(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("round {0} not found or not finished")]
    RoundNotFound(u64),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("internal server error")]
    Internal,
}

pub type ApiResult<T> = Result<T, ApiError>;
