use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("kv backend error: {0}")]
    Kv(#[from] tollgate_kv::KvError),

    #[error("lock unavailable for {resource}")]
    LockUnavailable { resource: String },

    #[error("failed to serialize idempotency value: {0}")]
    Serialize(#[from] serde_json::Error),
}
