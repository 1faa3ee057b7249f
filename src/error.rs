use thiserror::Error;

/// Errors raised by the orchestration core itself (not by stages, which
/// report failure through `SharedState::error` per spec §7).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no stage registered under the name '{0}'")]
    UnknownStage(String),

    #[error("stage '{0}' is registered twice")]
    DuplicateStage(String),

    #[error("stage '{stage}' timed out after {deadline_secs}s")]
    StageTimeout { stage: String, deadline_secs: u64 },

    #[error("request exceeded its whole-request deadline of {0}s")]
    RequestTimeout(u64),

    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
