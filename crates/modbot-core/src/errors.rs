use std::time::Duration;

/// Core error type.
///
/// Adapter crates map their specific errors into this type so the bot core can
/// handle failures consistently. Expected outcomes such as "already
/// blacklisted" are plain `false` results, never errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Durable storage is unavailable or rejected a write. The operation was
    /// not applied.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single chat-client call.
///
/// Recorded per call by the reconciliation engine; it never aborts a batch.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not a member: {0}")]
    NotMember(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),
}

pub type ActionResult<T = ()> = std::result::Result<T, ActionError>;
