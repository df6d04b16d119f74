use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    /// Pre-hook exceeded its timeout; the tool was never executed.
    #[error("pre-tool hook timed out after {0:?}")]
    TimeoutPre(std::time::Duration),

    /// Post-hook exceeded its timeout; the tool result is retained but the
    /// hook's own verdict is lost.
    #[error("post-tool hook timed out after {0:?}")]
    TimeoutPost(std::time::Duration),

    #[error("hook process failed to start: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("hook process exited before signaling readiness")]
    NoReadySignal,

    #[error("hook rejected the tool call: {0}")]
    Blocked(String),

    #[error("io error communicating with hook: {0}")]
    Io(#[source] std::io::Error),
}
