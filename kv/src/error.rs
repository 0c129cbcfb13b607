use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("kv backend error: {0}")]
    Backend(#[from] redis::RedisError),
}
