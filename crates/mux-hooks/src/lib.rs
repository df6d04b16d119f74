//! # Mux Hooks
//!
//! A synchronous interception system for the tool-execution lifecycle,
//! modeled on `codex-hooks`'s coroutine protocol: `<project>/.mux/tool_hook`
//! (or the dedicated `tool_pre` / `tool_post` one-shot variants) is
//! co-invoked for every tool call.
//!
//! ## Protocol
//!
//! 1. The session spawns the hook process with `MUX_TOOL`, `MUX_TOOL_INPUT`
//!    (or the `__MUX_TOOL_INPUT_FILE__` sentinel + `MUX_TOOL_INPUT_PATH` when
//!    the input is large), `MUX_EXEC`, `MUX_WORKSPACE_ID`, `MUX_PROJECT_DIR`
//!    in its environment.
//! 2. The hook prints the literal value of `$MUX_EXEC` to stdout to signal
//!    "ready". The executor treats any other output before that line as
//!    hook-local logging and ignores it for protocol purposes.
//! 3. The session runs the tool and writes the result to the hook's stdin
//!    (`MUX_TOOL_RESULT`, or spilled to `MUX_TOOL_RESULT_PATH` when large).
//! 4. The hook may exit after reading.
//!
//! Hard timeouts (`pre_hook_timeout`, `post_hook_timeout`) apply
//! independently to each phase and never count tool execution time.

pub mod context;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod types;

pub use context::HookInvocationContext;
pub use error::HookError;
pub use executor::{HookExecutor, HookOutcome};
pub use types::{HookConfig, HookPhase};
