/// Error types for the key-value store.
///
/// All fallible operations return `Result<T, KvsError>`. The variants map
/// directly onto the wire-visible error kinds of the HTTP API; `wire_code`
/// and `status_code` give the single source of truth for that mapping so
/// handlers never compare error strings by hand.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvsError {
    /// The client-supplied causal context could not be satisfied locally,
    /// or the entire owning bucket was unreachable.
    #[error("unable to satisfy causal context")]
    UnableToSatisfy,

    /// The key is absent or tombstoned.
    #[error("key does not exist")]
    KeyNotExist,

    /// The key is empty or longer than 50 bytes.
    #[error("key too long")]
    KeyTooLong,

    /// A PUT was issued without a value.
    #[error("value missing")]
    ValueMissing,

    /// A view was constructed with an invalid membership/replication factor.
    #[error("invalid view: {0}")]
    InvalidView(String),

    /// A peer could not be reached within the call timeout.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// Failure to (de)serialize a wire payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type KvsResult<T> = Result<T, KvsError>;

impl KvsError {
    /// The wire-visible error code shown in HTTP response bodies.
    pub fn wire_code(&self) -> &'static str {
        match self {
            KvsError::UnableToSatisfy => "unable_to_satisfy",
            KvsError::KeyNotExist => "key_not_exist",
            KvsError::KeyTooLong => "key_too_long",
            KvsError::ValueMissing => "value_missing",
            KvsError::InvalidView(_) => "invalid_view",
            KvsError::Unreachable(_) => "unable_to_satisfy",
            KvsError::Serialization(_) => "unable_to_satisfy",
        }
    }

    /// Whether this error reflects a transport-level failure (peer down,
    /// timed out, sent garbage) as opposed to a business-level outcome the
    /// peer deliberately returned. A bucket proxy retries the next replica
    /// on the former, but relays the latter immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, KvsError::Unreachable(_))
    }

    /// The HTTP status code this error maps to.
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            KvsError::UnableToSatisfy => StatusCode::BAD_REQUEST,
            KvsError::KeyNotExist => StatusCode::NOT_FOUND,
            KvsError::KeyTooLong => StatusCode::BAD_REQUEST,
            KvsError::ValueMissing => StatusCode::BAD_REQUEST,
            KvsError::InvalidView(_) => StatusCode::BAD_REQUEST,
            KvsError::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            KvsError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
