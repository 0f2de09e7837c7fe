//! The function catalog: names, typed arguments, schemas, approval class.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tp_llm::ToolDefinition;
use tp_store::Priority;
use uuid::Uuid;

use crate::error::{Result, ToolError};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskArgs {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTaskArgs {
    pub task_id: Uuid,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteTaskArgs {
    pub task_id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTasksArgs {
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub due_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_after: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzeProductivityArgs {
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

/// A validated function request from the model.
///
/// Parsing a name plus raw JSON arguments into a variant is the only way
/// to construct one, so ill-typed arguments never reach dispatch.
#[derive(Debug, Clone)]
pub enum FunctionCall {
    CreateTask(CreateTaskArgs),
    UpdateTask(UpdateTaskArgs),
    DeleteTask(DeleteTaskArgs),
    CompleteTask(DeleteTaskArgs),
    DeleteCompletedTasks,
    ListTasks(ListTasksArgs),
    AnalyzeProductivity(AnalyzeProductivityArgs),
}

impl FunctionCall {
    pub fn parse(name: &str, raw_args: &str) -> Result<Self> {
        let raw_args = if raw_args.trim().is_empty() {
            "{}"
        } else {
            raw_args
        };
        let invalid = |e: serde_json::Error| ToolError::InvalidArguments(format!("{name}: {e}"));

        let call = match name {
            "create_task" => {
                let args: CreateTaskArgs = serde_json::from_str(raw_args).map_err(invalid)?;
                if args.title.trim().is_empty() {
                    return Err(ToolError::InvalidArguments(
                        "create_task: title must not be empty".to_string(),
                    ));
                }
                Self::CreateTask(args)
            }
            "update_task" => Self::UpdateTask(serde_json::from_str(raw_args).map_err(invalid)?),
            "delete_task" => Self::DeleteTask(serde_json::from_str(raw_args).map_err(invalid)?),
            "complete_task" => Self::CompleteTask(serde_json::from_str(raw_args).map_err(invalid)?),
            "delete_completed_tasks" => Self::DeleteCompletedTasks,
            "list_tasks" => Self::ListTasks(serde_json::from_str(raw_args).map_err(invalid)?),
            "analyze_productivity" => {
                Self::AnalyzeProductivity(serde_json::from_str(raw_args).map_err(invalid)?)
            }
            other => return Err(ToolError::UnknownFunction(other.to_string())),
        };
        Ok(call)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateTask(_) => "create_task",
            Self::UpdateTask(_) => "update_task",
            Self::DeleteTask(_) => "delete_task",
            Self::CompleteTask(_) => "complete_task",
            Self::DeleteCompletedTasks => "delete_completed_tasks",
            Self::ListTasks(_) => "list_tasks",
            Self::AnalyzeProductivity(_) => "analyze_productivity",
        }
    }

    /// Side-effecting functions need a human decision; read-only ones run
    /// immediately.
    pub fn requires_approval(&self) -> bool {
        !matches!(self, Self::ListTasks(_) | Self::AnalyzeProductivity(_))
    }

    /// Tool definitions advertised to the model.
    pub fn definitions() -> Vec<ToolDefinition> {
        let priority_schema = json!({
            "type": "string",
            "enum": ["low", "medium", "high"],
        });

        let defs = [
            (
                "create_task",
                "Create a new task for the user.",
                json!({
                    "type": "object",
                    "properties": {
                        "title": { "type": "string", "description": "Short task title." },
                        "description": { "type": "string" },
                        "priority": priority_schema.clone(),
                        "due_date": { "type": "string", "format": "date-time" },
                    },
                    "required": ["title"],
                }),
            ),
            (
                "update_task",
                "Update fields of an existing task.",
                json!({
                    "type": "object",
                    "properties": {
                        "task_id": { "type": "string" },
                        "title": { "type": "string" },
                        "description": { "type": "string" },
                        "priority": priority_schema.clone(),
                        "due_date": { "type": "string", "format": "date-time" },
                        "completed": { "type": "boolean" },
                    },
                    "required": ["task_id"],
                }),
            ),
            (
                "delete_task",
                "Delete a task permanently.",
                json!({
                    "type": "object",
                    "properties": {
                        "task_id": { "type": "string" },
                    },
                    "required": ["task_id"],
                }),
            ),
            (
                "complete_task",
                "Mark a task as completed.",
                json!({
                    "type": "object",
                    "properties": {
                        "task_id": { "type": "string" },
                    },
                    "required": ["task_id"],
                }),
            ),
            (
                "delete_completed_tasks",
                "Delete every completed task for the user.",
                json!({ "type": "object", "properties": {} }),
            ),
            (
                "list_tasks",
                "List the user's tasks with optional filters.",
                json!({
                    "type": "object",
                    "properties": {
                        "priority": priority_schema.clone(),
                        "completed": { "type": "boolean" },
                        "due_before": { "type": "string", "format": "date-time" },
                        "due_after": { "type": "string", "format": "date-time" },
                    },
                }),
            ),
            (
                "analyze_productivity",
                "Summarize completion rate, overdue tasks, and recommendations.",
                json!({
                    "type": "object",
                    "properties": {
                        "start_date": { "type": "string", "format": "date-time" },
                        "end_date": { "type": "string", "format": "date-time" },
                    },
                }),
            ),
        ];

        defs.into_iter()
            .map(|(name, description, parameters)| {
                ToolDefinition::validated(name, description, parameters)
                    .expect("catalog tool names are valid")
            })
            .collect()
    }
}
