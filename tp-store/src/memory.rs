//! In-memory store.
//!
//! Backs development and tests. Data is lost on restart.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use tp_llm::ChatMessage;
use uuid::Uuid;

use crate::error::StorageError;
use crate::traits::{PendingCallStore, TaskStore, ThreadStore, UserStore};
use crate::types::{
    CallStatus, NewPendingCall, NewTask, PendingCall, Task, TaskFilter, TaskPatch, Thread,
    ThreadMessage, User,
};

#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
    threads: RwLock<HashMap<Uuid, Thread>>,
    messages: RwLock<HashMap<Uuid, Vec<ThreadMessage>>>,
    calls: RwLock<HashMap<Uuid, PendingCall>>,
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> StorageError {
    StorageError::Internal(e.to_string())
}

fn matches_filter(task: &Task, filter: &TaskFilter) -> bool {
    if let Some(priority) = filter.priority {
        if task.priority != priority {
            return false;
        }
    }
    if let Some(completed) = filter.completed {
        if task.completed != completed {
            return false;
        }
    }
    if let Some(due_before) = filter.due_before {
        match task.due_date {
            Some(due) if due <= due_before => {}
            _ => return false,
        }
    }
    if let Some(due_after) = filter.due_after {
        match task.due_date {
            Some(due) if due >= due_after => {}
            _ => return false,
        }
    }
    true
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create(&self, user_id: Uuid, task: NewTask) -> Result<Task, StorageError> {
        let now = Utc::now();
        let record = Task {
            id: Uuid::new_v4(),
            user_id,
            title: task.title,
            description: task.description,
            completed: false,
            priority: task.priority,
            due_date: task.due_date,
            ai_generated: task.ai_generated,
            created_at: now,
            updated_at: now,
        };
        self.tasks
            .write()
            .map_err(poisoned)?
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, user_id: Uuid, id: Uuid) -> Result<Option<Task>, StorageError> {
        Ok(self
            .tasks
            .read()
            .map_err(poisoned)?
            .get(&id)
            .filter(|t| t.user_id == user_id)
            .cloned())
    }

    async fn update(
        &self,
        user_id: Uuid,
        id: Uuid,
        patch: TaskPatch,
    ) -> Result<Task, StorageError> {
        let mut tasks = self.tasks.write().map_err(poisoned)?;
        let task = tasks
            .get_mut(&id)
            .filter(|t| t.user_id == user_id)
            .ok_or_else(|| StorageError::not_found("task", id))?;

        if let Some(title) = patch.title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = Some(description);
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(due_date) = patch.due_date {
            task.due_date = Some(due_date);
        }
        if let Some(completed) = patch.completed {
            task.completed = completed;
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<(), StorageError> {
        let mut tasks = self.tasks.write().map_err(poisoned)?;
        let owned = tasks.get(&id).is_some_and(|t| t.user_id == user_id);
        if !owned {
            return Err(StorageError::not_found("task", id));
        }
        tasks.remove(&id);
        Ok(())
    }

    async fn list(&self, user_id: Uuid, filter: TaskFilter) -> Result<Vec<Task>, StorageError> {
        let tasks = self.tasks.read().map_err(poisoned)?;
        let mut result: Vec<Task> = tasks
            .values()
            .filter(|t| t.user_id == user_id && matches_filter(t, &filter))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    async fn delete_completed(&self, user_id: Uuid) -> Result<u64, StorageError> {
        let mut tasks = self.tasks.write().map_err(poisoned)?;
        let before = tasks.len();
        tasks.retain(|_, t| !(t.user_id == user_id && t.completed));
        Ok((before - tasks.len()) as u64)
    }
}

#[async_trait]
impl ThreadStore for MemoryStore {
    async fn create_thread(&self, user_id: Uuid) -> Result<Thread, StorageError> {
        let now = Utc::now();
        let thread = Thread {
            id: Uuid::new_v4(),
            user_id,
            created_at: now,
            updated_at: now,
        };
        self.threads
            .write()
            .map_err(poisoned)?
            .insert(thread.id, thread.clone());
        self.messages
            .write()
            .map_err(poisoned)?
            .insert(thread.id, Vec::new());
        Ok(thread)
    }

    async fn get_thread(&self, user_id: Uuid, id: Uuid) -> Result<Option<Thread>, StorageError> {
        Ok(self
            .threads
            .read()
            .map_err(poisoned)?
            .get(&id)
            .filter(|t| t.user_id == user_id)
            .cloned())
    }

    async fn append_message(
        &self,
        thread_id: Uuid,
        message: ChatMessage,
    ) -> Result<ThreadMessage, StorageError> {
        let record = ThreadMessage {
            id: Uuid::new_v4(),
            thread_id,
            message,
            created_at: Utc::now(),
        };
        let mut messages = self.messages.write().map_err(poisoned)?;
        let log = messages
            .get_mut(&thread_id)
            .ok_or_else(|| StorageError::not_found("thread", thread_id))?;
        log.push(record.clone());

        if let Some(thread) = self.threads.write().map_err(poisoned)?.get_mut(&thread_id) {
            thread.updated_at = record.created_at;
        }
        Ok(record)
    }

    async fn history(&self, thread_id: Uuid) -> Result<Vec<ThreadMessage>, StorageError> {
        self.messages
            .read()
            .map_err(poisoned)?
            .get(&thread_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("thread", thread_id))
    }
}

#[async_trait]
impl PendingCallStore for MemoryStore {
    async fn insert(&self, call: NewPendingCall) -> Result<PendingCall, StorageError> {
        let mut calls = self.calls.write().map_err(poisoned)?;

        let duplicate = calls.values().any(|c| {
            c.thread_id == call.thread_id
                && c.tool_call_id == call.tool_call_id
                && c.status == CallStatus::Pending
        });
        if duplicate {
            return Err(StorageError::DuplicateToolCall {
                tool_call_id: call.tool_call_id,
            });
        }

        let now = Utc::now();
        let record = PendingCall {
            id: Uuid::new_v4(),
            user_id: call.user_id,
            thread_id: call.thread_id,
            run_id: call.run_id,
            tool_call_id: call.tool_call_id,
            function_name: call.function_name,
            function_args: call.function_args,
            status: CallStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        calls.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_call(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<Option<PendingCall>, StorageError> {
        Ok(self
            .calls
            .read()
            .map_err(poisoned)?
            .get(&id)
            .filter(|c| c.user_id == user_id)
            .cloned())
    }

    async fn list_pending(&self, user_id: Uuid) -> Result<Vec<PendingCall>, StorageError> {
        let calls = self.calls.read().map_err(poisoned)?;
        let mut result: Vec<PendingCall> = calls
            .values()
            .filter(|c| c.user_id == user_id && c.status == CallStatus::Pending)
            .cloned()
            .collect();
        // Oldest first: the longest-blocked call is resolved first.
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(result)
    }

    async fn resolve(
        &self,
        user_id: Uuid,
        id: Uuid,
        status: CallStatus,
    ) -> Result<PendingCall, StorageError> {
        if !status.is_terminal() {
            return Err(StorageError::Internal(
                "resolve requires a terminal status".to_string(),
            ));
        }

        // Check-and-set under a single write lock.
        let mut calls = self.calls.write().map_err(poisoned)?;
        let call = calls
            .get_mut(&id)
            .filter(|c| c.user_id == user_id)
            .ok_or_else(|| StorageError::not_found("pending call", id))?;

        if call.status != CallStatus::Pending {
            return Err(StorageError::AlreadyResolved {
                id,
                status: call.status,
            });
        }

        call.status = status;
        call.updated_at = Utc::now();
        Ok(call.clone())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(
        &self,
        email: &str,
        display_name: &str,
        token_hash: &str,
    ) -> Result<User, StorageError> {
        let mut users = self.users.write().map_err(poisoned)?;
        if users.values().any(|u| u.email == email) {
            return Err(StorageError::EmailTaken(email.to_string()));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: display_name.to_string(),
            token_hash: token_hash.to_string(),
            created_at: Utc::now(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StorageError> {
        Ok(self.users.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, StorageError> {
        Ok(self
            .users
            .read()
            .map_err(poisoned)?
            .values()
            .find(|u| u.token_hash == token_hash)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_call(user_id: Uuid, thread_id: Uuid, tool_call_id: &str) -> NewPendingCall {
        NewPendingCall {
            user_id,
            thread_id,
            run_id: Uuid::new_v4(),
            tool_call_id: tool_call_id.to_string(),
            function_name: "delete_task".to_string(),
            function_args: "{\"task_id\":\"t1\"}".to_string(),
        }
    }

    #[tokio::test]
    async fn resolve_transitions_exactly_once() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let call = store
            .insert(new_call(user, Uuid::new_v4(), "call_1"))
            .await
            .expect("insert");

        let resolved = store
            .resolve(user, call.id, CallStatus::Approved)
            .await
            .expect("first resolve wins");
        assert_eq!(resolved.status, CallStatus::Approved);

        let err = store
            .resolve(user, call.id, CallStatus::Rejected)
            .await
            .expect_err("second resolve loses");
        assert!(matches!(
            err,
            StorageError::AlreadyResolved {
                status: CallStatus::Approved,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn resolve_is_scoped_to_owner() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let call = store
            .insert(new_call(owner, Uuid::new_v4(), "call_1"))
            .await
            .expect("insert");

        let err = store
            .resolve(Uuid::new_v4(), call.id, CallStatus::Approved)
            .await
            .expect_err("other user must not resolve");
        assert!(matches!(err, StorageError::NotFound { .. }));

        // The owner can still resolve afterwards.
        store
            .resolve(owner, call.id, CallStatus::Rejected)
            .await
            .expect("owner resolves");
    }

    #[tokio::test]
    async fn duplicate_pending_tool_call_is_rejected() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let thread = Uuid::new_v4();
        store
            .insert(new_call(user, thread, "call_1"))
            .await
            .expect("first insert");

        let err = store
            .insert(new_call(user, thread, "call_1"))
            .await
            .expect_err("same tool call twice");
        assert!(matches!(err, StorageError::DuplicateToolCall { .. }));

        // A resolved call frees the slot for a new pending row.
        let calls = store.list_pending(user).await.expect("list");
        store
            .resolve(user, calls[0].id, CallStatus::Rejected)
            .await
            .expect("resolve");
        store
            .insert(new_call(user, thread, "call_1"))
            .await
            .expect("insert after terminal");
    }

    #[tokio::test]
    async fn list_pending_filters_owner_and_status() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let thread = Uuid::new_v4();

        let first = store
            .insert(new_call(alice, thread, "call_1"))
            .await
            .expect("insert");
        let second = store
            .insert(new_call(alice, thread, "call_2"))
            .await
            .expect("insert");
        store
            .insert(new_call(bob, Uuid::new_v4(), "call_3"))
            .await
            .expect("insert");
        store
            .resolve(alice, second.id, CallStatus::Approved)
            .await
            .expect("resolve");

        let pending = store.list_pending(alice).await.expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first.id);
    }

    #[tokio::test]
    async fn list_pending_is_oldest_first() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let thread = Uuid::new_v4();
        let first = store
            .insert(new_call(user, thread, "call_1"))
            .await
            .expect("insert");
        let second = store
            .insert(new_call(user, thread, "call_2"))
            .await
            .expect("insert");

        let pending = store.list_pending(user).await.expect("list");
        assert_eq!(
            pending.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
    }

    #[tokio::test]
    async fn task_filters_and_bulk_delete() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        for (title, completed) in [("a", true), ("b", false), ("c", true)] {
            let task = store
                .create(
                    user,
                    NewTask {
                        title: title.to_string(),
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

        let open = store
            .list(
                user,
                TaskFilter {
                    completed: Some(false),
                    ..TaskFilter::default()
                },
            )
            .await
            .expect("list");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].title, "b");

        let deleted = store.delete_completed(user).await.expect("delete");
        assert_eq!(deleted, 2);
        let remaining = store.list(user, TaskFilter::default()).await.expect("list");
        assert_eq!(remaining.len(), 1);
    }
}
