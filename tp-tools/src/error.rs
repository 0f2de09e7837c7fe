use thiserror::Error;
use tp_store::StorageError;

pub type Result<T> = std::result::Result<T, ToolError>;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for ToolError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { entity, id } => Self::NotFound(format!("{entity} {id}")),
            other => Self::Storage(other.to_string()),
        }
    }
}
