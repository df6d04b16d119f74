//! Categorical error taxonomy, per spec.md §7. Names are categorical, not
//! type-system identifiers in the original design, but Rust gives us a
//! closed enum for free — modeled on `codex-core`'s `CodexErr`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MuxErr>;

#[derive(Debug, Error)]
pub enum MuxErr {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("runtime failed to start: {0}")]
    RuntimeStartFailed(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("provider not supported: {0}")]
    ProviderNotSupported(String),

    #[error("api key not found: {0}")]
    ApiKeyNotFound(String),

    #[error("context exceeded")]
    ContextExceeded,

    #[error("aborted by user")]
    AbortUser,

    #[error("aborted ({0})")]
    AbortSystem(String),

    #[error("pre-tool hook timed out")]
    HookTimeoutPre,

    #[error("post-tool hook timed out")]
    HookTimeoutPost,

    #[error("overflow: {0}")]
    Overflow(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl MuxErr {
    /// Whether this error kind is retryable by the startup auto-retry
    /// machinery per spec.md §7's "rule of thumb".
    pub fn is_startup_retryable(&self) -> bool {
        matches!(
            self,
            MuxErr::RuntimeStartFailed(_) | MuxErr::AbortSystem(_)
        )
    }
}
