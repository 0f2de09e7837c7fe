//! Dispatch of validated function calls onto the task store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tp_store::{NewTask, Task, TaskFilter, TaskPatch, TaskStore};
use uuid::Uuid;

use crate::catalog::{AnalyzeProductivityArgs, FunctionCall};
use crate::error::Result;

/// Executes a validated call on behalf of a user.
///
/// The approval service depends on this trait so tests can substitute a
/// spy and assert that rejected calls never reach execution.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, user_id: Uuid, call: &FunctionCall) -> Result<Value>;
}

/// The real dispatcher. Stateless apart from the injected store.
pub struct FunctionExecutor {
    tasks: Arc<dyn TaskStore>,
}

impl FunctionExecutor {
    pub fn new(tasks: Arc<dyn TaskStore>) -> Self {
        Self { tasks }
    }

    async fn analyze_productivity(
        &self,
        user_id: Uuid,
        args: &AnalyzeProductivityArgs,
    ) -> Result<Value> {
        let now = Utc::now();
        let start = args.start_date.unwrap_or(now - Duration::days(30));
        let end = args.end_date.unwrap_or(now);

        let all = self.tasks.list(user_id, TaskFilter::default()).await?;
        let in_range: Vec<&Task> = all
            .iter()
            .filter(|t| t.created_at >= start && t.created_at <= end)
            .collect();

        let completed: Vec<&Task> = in_range.iter().copied().filter(|t| t.completed).collect();
        let incomplete = in_range.len() - completed.len();
        let overdue = all
            .iter()
            .filter(|t| !t.completed && t.due_date.is_some_and(|due| due < now))
            .count();
        let completion_rate = if in_range.is_empty() {
            0.0
        } else {
            completed.len() as f64 / in_range.len() as f64 * 100.0
        };

        let by_priority = |p: tp_store::Priority| completed.iter().filter(|t| t.priority == p).count();

        let mut recommendations: Vec<String> = Vec::new();
        if !in_range.is_empty() && completion_rate < 50.0 {
            recommendations.push(
                "Completion rate is below 50%. Break large tasks into smaller, more manageable items."
                    .to_string(),
            );
        }
        if overdue > 0 {
            recommendations.push(format!(
                "{overdue} task(s) are overdue. Review and reschedule them before taking on new work."
            ));
        }
        let high_open = in_range
            .iter()
            .filter(|t| !t.completed && t.priority == tp_store::Priority::High)
            .count();
        if high_open > 0 {
            recommendations.push(format!(
                "{high_open} high-priority task(s) are still open. Focus on these first."
            ));
        }
        if completion_rate > 80.0 {
            recommendations
                .push("Strong completion rate. Consider taking on more ambitious tasks.".to_string());
        }

        Ok(json!({
            "period": {
                "start_date": start.to_rfc3339(),
                "end_date": end.to_rfc3339(),
            },
            "summary": {
                "total_tasks": in_range.len(),
                "completed_tasks": completed.len(),
                "incomplete_tasks": incomplete,
                "overdue_tasks": overdue,
                "completion_rate": format!("{completion_rate:.2}%"),
            },
            "completed_by_priority": {
                "high": by_priority(tp_store::Priority::High),
                "medium": by_priority(tp_store::Priority::Medium),
                "low": by_priority(tp_store::Priority::Low),
            },
            "recommendations": recommendations,
        }))
    }
}

#[async_trait]
impl Executor for FunctionExecutor {
    #[tracing::instrument(level = "info", skip_all, fields(function = call.name()))]
    async fn execute(&self, user_id: Uuid, call: &FunctionCall) -> Result<Value> {
        match call {
            FunctionCall::CreateTask(args) => {
                let task = self
                    .tasks
                    .create(
                        user_id,
                        NewTask {
                            title: args.title.clone(),
                            description: args.description.clone(),
                            priority: args.priority.unwrap_or_default(),
                            due_date: args.due_date,
                            ai_generated: true,
                        },
                    )
                    .await?;
                tracing::info!(task_id = %task.id, "task created");
                Ok(json!({ "task": task }))
            }
            FunctionCall::UpdateTask(args) => {
                let task = self
                    .tasks
                    .update(
                        user_id,
                        args.task_id,
                        TaskPatch {
                            title: args.title.clone(),
                            description: args.description.clone(),
                            priority: args.priority,
                            due_date: args.due_date,
                            completed: args.completed,
                        },
                    )
                    .await?;
                tracing::info!(task_id = %task.id, "task updated");
                Ok(json!({ "task": task }))
            }
            FunctionCall::DeleteTask(args) => {
                self.tasks.delete(user_id, args.task_id).await?;
                tracing::info!(task_id = %args.task_id, "task deleted");
                Ok(json!({
                    "deleted": true,
                    "task_id": args.task_id,
                }))
            }
            FunctionCall::CompleteTask(args) => {
                let task = self
                    .tasks
                    .update(
                        user_id,
                        args.task_id,
                        TaskPatch {
                            completed: Some(true),
                            ..TaskPatch::default()
                        },
                    )
                    .await?;
                tracing::info!(task_id = %task.id, "task completed");
                Ok(json!({ "task": task }))
            }
            FunctionCall::DeleteCompletedTasks => {
                let deleted_count = self.tasks.delete_completed(user_id).await?;
                tracing::info!(deleted_count, "completed tasks deleted");
                Ok(json!({ "deleted_count": deleted_count }))
            }
            FunctionCall::ListTasks(args) => {
                let tasks = self
                    .tasks
                    .list(
                        user_id,
                        TaskFilter {
                            priority: args.priority,
                            completed: args.completed,
                            due_before: args.due_before,
                            due_after: args.due_after,
                        },
                    )
                    .await?;
                Ok(json!({
                    "count": tasks.len(),
                    "tasks": tasks,
                }))
            }
            FunctionCall::AnalyzeProductivity(args) => {
                self.analyze_productivity(user_id, args).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use tp_store::MemoryStore;

    fn executor() -> (FunctionExecutor, Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let executor = FunctionExecutor::new(store.clone());
        (executor, store, Uuid::new_v4())
    }

    #[tokio::test]
    async fn create_task_persists_exactly_one_task() {
        let (executor, store, user) = executor();
        let call = FunctionCall::parse("create_task", r#"{"title": "Buy milk"}"#).expect("parse");

        let result = executor.execute(user, &call).await.expect("execute");
        let tasks = store.list(user, TaskFilter::default()).await.expect("list");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Buy milk");
        assert!(tasks[0].ai_generated);
        assert_eq!(
            result["task"]["id"].as_str().expect("task id in result"),
            tasks[0].id.to_string()
        );
    }

    #[tokio::test]
    async fn delete_completed_tasks_reports_the_count() {
        let (executor, store, user) = executor();
        for n in 0..3 {
            let task = store
                .create(
                    user,
                    NewTask {
                        title: format!("task {n}"),
                        ..NewTask::default()
                    },
                )
                .await
                .expect("create");
            if n < 2 {
                store
                    .update(
                        user,
                        task.id,
                        TaskPatch {
                            completed: Some(true),
                            ..TaskPatch::default()
                        },
                    )
                    .await
                    .expect("update");
            }
        }

        let call = FunctionCall::parse("delete_completed_tasks", "{}").expect("parse");
        let result = executor.execute(user, &call).await.expect("execute");
        assert_eq!(result["deleted_count"], json!(2));
        let remaining = store.list(user, TaskFilter::default()).await.expect("list");
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_missing_task_is_not_found() {
        let (executor, _store, user) = executor();
        let call = FunctionCall::parse(
            "delete_task",
            &format!(r#"{{"task_id": "{}"}}"#, Uuid::new_v4()),
        )
        .expect("parse");

        let err = executor.execute(user, &call).await.expect_err("missing");
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn analyze_productivity_summarizes_completion() {
        let (executor, store, user) = executor();
        for completed in [true, true, false] {
            let task = store
                .create(
                    user,
                    NewTask {
                        title: "t".to_string(),
                        ..NewTask::default()
                    },
                )
                .await
                .expect("create");
            if completed {
                store
                    .update(
                        user,
                        task.id,
                        TaskPatch {
                            completed: Some(true),
                            ..TaskPatch::default()
                        },
                    )
                    .await
                    .expect("update");
            }
        }

        let call = FunctionCall::parse("analyze_productivity", "{}").expect("parse");
        let report = executor.execute(user, &call).await.expect("execute");
        assert_eq!(report["summary"]["total_tasks"], json!(3));
        assert_eq!(report["summary"]["completed_tasks"], json!(2));
        assert_eq!(report["summary"]["completion_rate"], json!("66.67%"));
    }
}
