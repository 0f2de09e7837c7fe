//! Persistence layer for TaskPilot.
//!
//! Repository traits with two backends: an in-memory store for
//! development and tests, and a SQLite store for production. Stores are
//! injected into the orchestrator and approval service, never reached
//! through globals.

mod error;
mod memory;
mod sqlite;
mod traits;
mod types;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{PendingCallStore, TaskStore, ThreadStore, UserStore};
pub use types::{
    CallStatus, NewPendingCall, NewTask, PendingCall, Priority, Task, TaskFilter, TaskPatch,
    Thread, ThreadMessage, User,
};
