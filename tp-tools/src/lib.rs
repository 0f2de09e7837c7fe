//! Assistant function catalog and executor for TaskPilot.
//!
//! Every function the model may request is a variant of [`FunctionCall`]
//! with a typed argument struct, validated before any dispatch. The
//! [`FunctionExecutor`] maps approved calls onto the task store.

mod catalog;
mod error;
mod executor;

pub use catalog::{
    AnalyzeProductivityArgs, CreateTaskArgs, DeleteTaskArgs, FunctionCall, ListTasksArgs,
    UpdateTaskArgs,
};
pub use error::{Result, ToolError};
pub use executor::{Executor, FunctionExecutor};
