use thiserror::Error;

/// Typed error taxonomy shared by every write-path component (spec.md §7).
/// Each variant maps to a stable HTTP status at the caller's boundary; none
/// of that mapping happens here — this crate only carries the kind and the
/// structured hint the caller needs to render a useful response.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unavailable: {available} rooms left")]
    Unavailable { available: u32 },

    #[error("bid too low: minimum is {minimum}")]
    BidTooLow { minimum: crate::Money },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("lock unavailable for {resource}")]
    LockUnavailable { resource: String },

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("internal error (trace={trace_id}, subsystem={subsystem}): {source}")]
    Internal {
        trace_id: String,
        subsystem: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    /// Stable machine-readable kind for error bodies (spec.md §7).
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BadRequest",
            AppError::NotFound(_) => "NotFound",
            AppError::Unavailable { .. } => "Unavailable",
            AppError::BidTooLow { .. } => "BidTooLow",
            AppError::Conflict(_) => "Conflict",
            AppError::LockUnavailable { .. } => "LockUnavailable",
            AppError::RateLimited { .. } => "RateLimited",
            AppError::Forbidden(_) => "Forbidden",
            AppError::Internal { .. } => "Internal",
        }
    }

    /// Stable HTTP status code a caller's routing layer should map this to.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::NotFound(_) => 404,
            AppError::Unavailable { .. } => 409,
            AppError::BidTooLow { .. } => 409,
            AppError::Conflict(_) => 409,
            AppError::LockUnavailable { .. } => 429,
            AppError::RateLimited { .. } => 429,
            AppError::Forbidden(_) => 403,
            AppError::Internal { .. } => 503,
        }
    }

    /// Builds an `Internal` error, generating a fresh correlation id at the
    /// point of failure and logging it immediately so the id returned to
    /// the caller (spec.md §7 "internal errors return a correlation id")
    /// can actually be grepped back to this event — unlike a hardcoded
    /// subsystem literal, every call gets its own id.
    pub fn internal(subsystem: &'static str, source: impl Into<anyhow::Error>) -> Self {
        let trace_id = tollgate_telemetry::TraceId::new().to_string();
        let source = source.into();
        tracing::error!(subsystem, trace_id = %trace_id, error = %source, "internal error");
        AppError::Internal {
            trace_id,
            subsystem,
            source,
        }
    }
}
