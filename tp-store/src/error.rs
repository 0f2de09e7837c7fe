use crate::types::CallStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The pending→terminal transition lost to an earlier resolution.
    #[error("call {id} already resolved to {status}")]
    AlreadyResolved { id: Uuid, status: CallStatus },

    /// A pending row already exists for this `(thread_id, tool_call_id)`.
    #[error("pending call already recorded for tool call {tool_call_id}")]
    DuplicateToolCall { tool_call_id: String },

    #[error("email already registered: {0}")]
    EmailTaken(String),

    #[error("storage error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
