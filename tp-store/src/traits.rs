//! Repository traits for the TaskPilot stores.

use async_trait::async_trait;
use tp_llm::ChatMessage;
use uuid::Uuid;

use crate::error::StorageError;
use crate::types::{
    CallStatus, NewPendingCall, NewTask, PendingCall, Task, TaskFilter, TaskPatch, Thread,
    ThreadMessage, User,
};

/// Task records, scoped to their owning user on every operation.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, user_id: Uuid, task: NewTask) -> Result<Task, StorageError>;

    async fn get(&self, user_id: Uuid, id: Uuid) -> Result<Option<Task>, StorageError>;

    /// Apply a partial update. Fails with `NotFound` if the task does not
    /// exist or belongs to a different user.
    async fn update(&self, user_id: Uuid, id: Uuid, patch: TaskPatch)
    -> Result<Task, StorageError>;

    async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<(), StorageError>;

    /// Newest-first listing with optional filters.
    async fn list(&self, user_id: Uuid, filter: TaskFilter) -> Result<Vec<Task>, StorageError>;

    /// Delete every completed task; returns how many were removed.
    async fn delete_completed(&self, user_id: Uuid) -> Result<u64, StorageError>;
}

/// Conversation threads and their append-only message history.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn create_thread(&self, user_id: Uuid) -> Result<Thread, StorageError>;

    async fn get_thread(&self, user_id: Uuid, id: Uuid) -> Result<Option<Thread>, StorageError>;

    async fn append_message(
        &self,
        thread_id: Uuid,
        message: ChatMessage,
    ) -> Result<ThreadMessage, StorageError>;

    /// Messages in append order.
    async fn history(&self, thread_id: Uuid) -> Result<Vec<ThreadMessage>, StorageError>;
}

/// The pending-call ledger.
#[async_trait]
pub trait PendingCallStore: Send + Sync {
    /// Record a proposed call as `pending`. Fails with `DuplicateToolCall`
    /// when a pending row already exists for the same
    /// `(thread_id, tool_call_id)`.
    async fn insert(&self, call: NewPendingCall) -> Result<PendingCall, StorageError>;

    async fn get_call(&self, user_id: Uuid, id: Uuid)
    -> Result<Option<PendingCall>, StorageError>;

    /// Pending calls owned by `user_id`, oldest first.
    async fn list_pending(&self, user_id: Uuid) -> Result<Vec<PendingCall>, StorageError>;

    /// Atomically transition a `pending` call to a terminal status.
    ///
    /// This is a conditional update, not a read-then-write: under two
    /// concurrent resolutions exactly one caller wins and the other gets
    /// `AlreadyResolved`. `NotFound` covers both a missing row and a row
    /// owned by a different user.
    async fn resolve(
        &self,
        user_id: Uuid,
        id: Uuid,
        status: CallStatus,
    ) -> Result<PendingCall, StorageError>;
}

/// User records and bearer-token lookup.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(
        &self,
        email: &str,
        display_name: &str,
        token_hash: &str,
    ) -> Result<User, StorageError>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StorageError>;

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, StorageError>;
}
