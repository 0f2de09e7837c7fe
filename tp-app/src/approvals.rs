//! Approval API over the pending-call ledger.
//!
//! A call transitions `pending -> approved` or `pending -> rejected`
//! exactly once; the store enforces that transition atomically, so a
//! double-click or retried request can never execute a side effect twice.
//! The human decision is final: execution failures after approval are
//! reported in the result payload but never revert the status.

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tp_store::{CallStatus, PendingCall, PendingCallStore, StorageError};
use tp_tools::{Executor, FunctionCall};
use uuid::Uuid;

use crate::orchestrator::Orchestrator;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("pending call not found: {0}")]
    NotFound(Uuid),

    #[error("call already resolved to {0}")]
    AlreadyResolved(CallStatus),

    #[error(transparent)]
    Storage(StorageError),
}

fn map_resolve_err(e: StorageError) -> ApprovalError {
    match e {
        StorageError::NotFound { id, .. } => {
            ApprovalError::NotFound(id.parse().unwrap_or(Uuid::nil()))
        }
        StorageError::AlreadyResolved { status, .. } => ApprovalError::AlreadyResolved(status),
        other => ApprovalError::Storage(other),
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApprovalOutcome {
    pub success: bool,
    pub message: String,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RejectionOutcome {
    pub success: bool,
    pub message: String,
}

pub struct ApprovalService {
    calls: Arc<dyn PendingCallStore>,
    executor: Arc<dyn Executor>,
    orchestrator: Arc<Orchestrator>,
}

impl ApprovalService {
    pub fn new(
        calls: Arc<dyn PendingCallStore>,
        executor: Arc<dyn Executor>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            calls,
            executor,
            orchestrator,
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(user_id = %user_id, call_id = %call_id))]
    pub async fn approve(
        &self,
        user_id: Uuid,
        call_id: Uuid,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        let call = self
            .calls
            .resolve(user_id, call_id, CallStatus::Approved)
            .await
            .map_err(map_resolve_err)?;
        tracing::info!(function = %call.function_name, "pending call approved");

        let (result, exec_error) =
            match FunctionCall::parse(&call.function_name, &call.function_args) {
                Ok(parsed) => match self.executor.execute(user_id, &parsed).await {
                    Ok(value) => (value, None),
                    Err(e) => (
                        json!({ "error": true, "message": e.to_string() }),
                        Some(e.to_string()),
                    ),
                },
                Err(e) => (
                    json!({ "error": true, "message": e.to_string() }),
                    Some(e.to_string()),
                ),
            };

        if let Some(ref e) = exec_error {
            tracing::warn!(
                function = %call.function_name,
                error = %e,
                "approved call failed to execute"
            );
        }

        let follow_up = self.resume(user_id, &call, result.clone()).await;
        let message = match exec_error {
            Some(e) => format!("approved, but execution failed: {e}"),
            None => follow_up
                .filter(|reply| !reply.trim().is_empty())
                .unwrap_or_else(|| format!("{} executed", call.function_name)),
        };

        Ok(ApprovalOutcome {
            success: true,
            message,
            result,
        })
    }

    #[tracing::instrument(level = "info", skip_all, fields(user_id = %user_id, call_id = %call_id))]
    pub async fn reject(
        &self,
        user_id: Uuid,
        call_id: Uuid,
    ) -> Result<RejectionOutcome, ApprovalError> {
        let call = self
            .calls
            .resolve(user_id, call_id, CallStatus::Rejected)
            .await
            .map_err(map_resolve_err)?;
        tracing::info!(function = %call.function_name, "pending call rejected");

        // The run must not hang: feed a structured rejection back so the
        // assistant can acknowledge and offer alternatives.
        let payload = json!({
            "approved": false,
            "message": "The user declined this action.",
        });
        let follow_up = self.resume(user_id, &call, payload).await;
        let message = follow_up
            .filter(|reply| !reply.trim().is_empty())
            .unwrap_or_else(|| format!("{} rejected", call.function_name));

        Ok(RejectionOutcome {
            success: true,
            message,
        })
    }

    /// Best-effort run resumption. Failure here never affects the
    /// recorded terminal status.
    async fn resume(
        &self,
        user_id: Uuid,
        call: &PendingCall,
        payload: serde_json::Value,
    ) -> Option<String> {
        match self
            .orchestrator
            .resume_with_tool_result(user_id, call.thread_id, &call.tool_call_id, payload)
            .await
        {
            Ok(outcome) => Some(outcome.reply),
            Err(e) => {
                tracing::warn!(
                    call_id = %call.id,
                    thread_id = %call.thread_id,
                    error = %e,
                    "run resumption failed after resolution"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::harness;
    use tp_llm::Role;
    use tp_store::{
        NewTask, PendingCallStore as _, TaskFilter, TaskPatch, TaskStore as _, ThreadStore as _,
    };

    async fn pending_create_task(h: &crate::testutil::Harness) -> PendingCall {
        h.chat
            .push_tool_call("call_1", "create_task", r#"{"title": "Buy milk"}"#);
        h.orchestrator
            .handle_user_message(h.user_id, "add buy milk", None)
            .await
            .expect("chat");
        h.store
            .list_pending(h.user_id)
            .await
            .expect("list")
            .into_iter()
            .next()
            .expect("one pending call")
    }

    #[tokio::test]
    async fn approve_executes_once_and_returns_the_task() {
        let h = harness();
        let call = pending_create_task(&h).await;
        h.chat.push_reply("Done, Buy milk is on your list.");

        let outcome = h
            .approvals
            .approve(h.user_id, call.id)
            .await
            .expect("approve");

        assert!(outcome.success);
        assert_eq!(outcome.message, "Done, Buy milk is on your list.");
        assert_eq!(h.spy.count(), 1);

        let tasks = h
            .store
            .list(h.user_id, TaskFilter::default())
            .await
            .expect("tasks");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Buy milk");
        assert_eq!(
            outcome.result["task"]["id"].as_str().expect("task id"),
            tasks[0].id.to_string()
        );

        let resolved = h
            .store
            .get_call(h.user_id, call.id)
            .await
            .expect("get")
            .expect("call exists");
        assert_eq!(resolved.status, CallStatus::Approved);
        assert!(resolved.updated_at >= resolved.created_at);
    }

    #[tokio::test]
    async fn concurrent_approvals_execute_exactly_once() {
        let h = harness();
        let call = pending_create_task(&h).await;

        let (a, b) = tokio::join!(
            h.approvals.approve(h.user_id, call.id),
            h.approvals.approve(h.user_id, call.id),
        );

        let outcomes = [a, b];
        let wins = outcomes.iter().filter(|r| r.is_ok()).count();
        let losses = outcomes
            .iter()
            .filter(|r| matches!(r, Err(ApprovalError::AlreadyResolved(_))))
            .count();
        assert_eq!(wins, 1, "exactly one approval wins");
        assert_eq!(losses, 1, "the other sees AlreadyResolved");

        assert_eq!(h.spy.count(), 1, "the side effect ran exactly once");
        let tasks = h
            .store
            .list(h.user_id, TaskFilter::default())
            .await
            .expect("tasks");
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn reject_never_touches_the_executor() {
        let h = harness();
        let call = pending_create_task(&h).await;
        h.chat.push_reply("Okay, I won't create it.");

        let outcome = h
            .approvals
            .reject(h.user_id, call.id)
            .await
            .expect("reject");

        assert!(outcome.success);
        assert_eq!(outcome.message, "Okay, I won't create it.");
        assert_eq!(h.spy.count(), 0, "rejection must not execute anything");

        let resolved = h
            .store
            .get_call(h.user_id, call.id)
            .await
            .expect("get")
            .expect("call exists");
        assert_eq!(resolved.status, CallStatus::Rejected);

        // The rejection is reported back to the run as a tool result.
        let history = h.store.history(call.thread_id).await.expect("history");
        let tool_msg = history
            .iter()
            .find(|m| m.message.role == Role::Tool)
            .expect("tool result appended");
        assert!(tool_msg.message.content.contains("declined"));
        assert_eq!(tool_msg.message.tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn approving_twice_is_rejected_not_repeated() {
        let h = harness();
        let call = pending_create_task(&h).await;

        h.approvals
            .approve(h.user_id, call.id)
            .await
            .expect("first approve");
        let err = h
            .approvals
            .approve(h.user_id, call.id)
            .await
            .expect_err("second approve");
        assert!(matches!(
            err,
            ApprovalError::AlreadyResolved(CallStatus::Approved)
        ));
        assert_eq!(h.spy.count(), 1);
    }

    #[tokio::test]
    async fn approve_of_anothers_call_is_not_found() {
        let h = harness();
        let call = pending_create_task(&h).await;

        let err = h
            .approvals
            .approve(Uuid::new_v4(), call.id)
            .await
            .expect_err("foreign user");
        assert!(matches!(err, ApprovalError::NotFound(_)));
        assert_eq!(h.spy.count(), 0);
    }

    #[tokio::test]
    async fn execution_failure_keeps_the_approval() {
        let h = harness();

        // Ask to delete a task, then remove it out-of-band before approval.
        let task = h
            .store
            .create(
                h.user_id,
                NewTask {
                    title: "doomed".to_string(),
                    ..NewTask::default()
                },
            )
            .await
            .expect("create");
        h.chat.push_tool_call(
            "call_1",
            "delete_task",
            &format!(r#"{{"task_id": "{}"}}"#, task.id),
        );
        h.orchestrator
            .handle_user_message(h.user_id, "delete it", None)
            .await
            .expect("chat");
        h.store.delete(h.user_id, task.id).await.expect("delete");

        let call = h.store.list_pending(h.user_id).await.expect("list")[0].clone();
        let outcome = h
            .approvals
            .approve(h.user_id, call.id)
            .await
            .expect("approve succeeds as a decision");

        assert!(outcome.success);
        assert_eq!(outcome.result["error"], serde_json::json!(true));
        assert!(outcome.message.contains("execution failed"));

        // The decision stands: the call is approved, not reverted.
        let resolved = h
            .store
            .get_call(h.user_id, call.id)
            .await
            .expect("get")
            .expect("call exists");
        assert_eq!(resolved.status, CallStatus::Approved);
    }

    #[tokio::test]
    async fn delete_completed_tasks_scenario() {
        let h = harness();
        for n in 0..3 {
            let task = h
                .store
                .create(
                    h.user_id,
                    NewTask {
                        title: format!("task {n}"),
                        ..NewTask::default()
                    },
                )
                .await
                .expect("create");
            if n < 2 {
                h.store
                    .update(
                        h.user_id,
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

        h.chat
            .push_tool_call("call_1", "delete_completed_tasks", "{}");
        let outcome = h
            .orchestrator
            .handle_user_message(h.user_id, "delete all completed tasks", None)
            .await
            .expect("chat");
        assert!(outcome.has_pending_calls);

        let call = h.store.list_pending(h.user_id).await.expect("list")[0].clone();
        assert_eq!(call.function_name, "delete_completed_tasks");

        h.chat.push_reply("Removed 2 completed tasks.");
        let approved = h
            .approvals
            .approve(h.user_id, call.id)
            .await
            .expect("approve");
        assert_eq!(approved.result["deleted_count"], serde_json::json!(2));

        let remaining = h
            .store
            .list(h.user_id, TaskFilter::default())
            .await
            .expect("tasks");
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn resume_failure_does_not_undo_the_decision() {
        let h = harness();
        let call = pending_create_task(&h).await;
        h.chat.push_error(tp_llm::LlmError::Timeout);

        let outcome = h
            .approvals
            .approve(h.user_id, call.id)
            .await
            .expect("approve");
        assert!(outcome.success);
        assert_eq!(outcome.message, "create_task executed");
        assert_eq!(h.spy.count(), 1);

        let resolved = h
            .store
            .get_call(h.user_id, call.id)
            .await
            .expect("get")
            .expect("call exists");
        assert_eq!(resolved.status, CallStatus::Approved);
    }
}
