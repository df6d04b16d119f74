//! Wire and on-disk data types shared across the agent session runtime.
//!
//! This crate has no I/O of its own: it is the vocabulary that
//! `mux-core`'s event store, background process manager, and agent session
//! serialize to and from disk, and the shape that subscribers receive
//! stream events in.

pub mod background;
pub mod events;
pub mod init;
pub mod message;
pub mod todo;
pub mod workspace;

pub use background::{BackgroundProcessRecord, ProcessStatus};
pub use events::SessionEvent;
pub use init::{InitPhase, InitStatus, TimedLine};
pub use message::{MessageMetadata, MessagePart, MessageRole, MuxMessage, ToolCallState};
pub use todo::{TodoItem, TodoStatus};
pub use workspace::{AgentId, RuntimeKind, WorkspaceId};
