//! SQLite store.
//!
//! A single connection guarded by a mutex; statements run on the blocking
//! pool. Schema is created on open.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tp_llm::ChatMessage;
use uuid::Uuid;

use crate::error::StorageError;
use crate::traits::{PendingCallStore, TaskStore, ThreadStore, UserStore};
use crate::types::{
    CallStatus, NewPendingCall, NewTask, PendingCall, Priority, Task, TaskFilter, TaskPatch,
    Thread, ThreadMessage, User,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    token_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    completed INTEGER NOT NULL DEFAULT 0,
    priority TEXT NOT NULL DEFAULT 'medium',
    due_date TEXT,
    ai_generated INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id);

CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS thread_messages (
    id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL,
    message_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_thread_messages_thread ON thread_messages(thread_id);

CREATE TABLE IF NOT EXISTS pending_calls (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    thread_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    tool_call_id TEXT NOT NULL,
    function_name TEXT NOT NULL,
    function_args TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pending_calls_user_status ON pending_calls(user_id, status);
CREATE UNIQUE INDEX IF NOT EXISTS idx_pending_calls_open
    ON pending_calls(thread_id, tool_call_id) WHERE status = 'pending';
"#;

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db_err)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StorageError::Internal(e.to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| StorageError::Internal(e.to_string()))?
    }
}

fn db_err(e: rusqlite::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Internal(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_id(raw: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw).map_err(|e| StorageError::Internal(format!("bad uuid {raw:?}: {e}")))
}

fn row_to_task(row: &rusqlite::Row<'_>) -> Result<Task, StorageError> {
    let id: String = row.get(0).map_err(db_err)?;
    let user_id: String = row.get(1).map_err(db_err)?;
    let priority: String = row.get(5).map_err(db_err)?;
    let due_date: Option<String> = row.get(6).map_err(db_err)?;
    let created_at: String = row.get(8).map_err(db_err)?;
    let updated_at: String = row.get(9).map_err(db_err)?;

    Ok(Task {
        id: parse_id(&id)?,
        user_id: parse_id(&user_id)?,
        title: row.get(2).map_err(db_err)?,
        description: row.get(3).map_err(db_err)?,
        completed: row.get::<_, i64>(4).map_err(db_err)? != 0,
        priority: Priority::parse(&priority)
            .ok_or_else(|| StorageError::Internal(format!("bad priority {priority:?}")))?,
        due_date: due_date.as_deref().map(parse_ts).transpose()?,
        ai_generated: row.get::<_, i64>(7).map_err(db_err)? != 0,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

const TASK_COLUMNS: &str =
    "id, user_id, title, description, completed, priority, due_date, ai_generated, created_at, updated_at";

fn row_to_call(row: &rusqlite::Row<'_>) -> Result<PendingCall, StorageError> {
    let id: String = row.get(0).map_err(db_err)?;
    let user_id: String = row.get(1).map_err(db_err)?;
    let thread_id: String = row.get(2).map_err(db_err)?;
    let run_id: String = row.get(3).map_err(db_err)?;
    let status: String = row.get(7).map_err(db_err)?;
    let created_at: String = row.get(8).map_err(db_err)?;
    let updated_at: String = row.get(9).map_err(db_err)?;

    Ok(PendingCall {
        id: parse_id(&id)?,
        user_id: parse_id(&user_id)?,
        thread_id: parse_id(&thread_id)?,
        run_id: parse_id(&run_id)?,
        tool_call_id: row.get(4).map_err(db_err)?,
        function_name: row.get(5).map_err(db_err)?,
        function_args: row.get(6).map_err(db_err)?,
        status: CallStatus::parse(&status)
            .ok_or_else(|| StorageError::Internal(format!("bad call status {status:?}")))?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

const CALL_COLUMNS: &str =
    "id, user_id, thread_id, run_id, tool_call_id, function_name, function_args, status, created_at, updated_at";

#[async_trait]
impl TaskStore for SqliteStore {
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
        let insert = record.clone();
        self.blocking(move |conn| {
            conn.execute(
                r#"
INSERT INTO tasks (id, user_id, title, description, completed, priority, due_date, ai_generated, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
"#,
                params![
                    insert.id.to_string(),
                    insert.user_id.to_string(),
                    insert.title,
                    insert.description,
                    insert.completed as i64,
                    insert.priority.as_str(),
                    insert.due_date.map(format_ts),
                    insert.ai_generated as i64,
                    format_ts(insert.created_at),
                    format_ts(insert.updated_at),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await?;
        Ok(record)
    }

    async fn get(&self, user_id: Uuid, id: Uuid) -> Result<Option<Task>, StorageError> {
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND user_id = ?2"),
                params![id.to_string(), user_id.to_string()],
                |row| Ok(row_to_task(row)),
            )
            .optional()
            .map_err(db_err)?
            .transpose()
        })
        .await
    }

    async fn update(
        &self,
        user_id: Uuid,
        id: Uuid,
        patch: TaskPatch,
    ) -> Result<Task, StorageError> {
        self.blocking(move |conn| {
            let changed = conn
                .execute(
                    r#"
UPDATE tasks
   SET title = COALESCE(?3, title),
       description = COALESCE(?4, description),
       priority = COALESCE(?5, priority),
       due_date = COALESCE(?6, due_date),
       completed = COALESCE(?7, completed),
       updated_at = ?8
 WHERE id = ?1
   AND user_id = ?2
"#,
                    params![
                        id.to_string(),
                        user_id.to_string(),
                        patch.title,
                        patch.description,
                        patch.priority.map(|p| p.as_str()),
                        patch.due_date.map(format_ts),
                        patch.completed.map(|c| c as i64),
                        format_ts(Utc::now()),
                    ],
                )
                .map_err(db_err)?;
            if changed == 0 {
                return Err(StorageError::not_found("task", id));
            }
            conn.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.to_string()],
                |row| Ok(row_to_task(row)),
            )
            .map_err(db_err)?
        })
        .await
    }

    async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<(), StorageError> {
        self.blocking(move |conn| {
            let changed = conn
                .execute(
                    "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
                    params![id.to_string(), user_id.to_string()],
                )
                .map_err(db_err)?;
            if changed == 0 {
                return Err(StorageError::not_found("task", id));
            }
            Ok(())
        })
        .await
    }

    async fn list(&self, user_id: Uuid, filter: TaskFilter) -> Result<Vec<Task>, StorageError> {
        self.blocking(move |conn| {
            let mut stmt = conn
                .prepare_cached(&format!(
                    r#"
SELECT {TASK_COLUMNS}
  FROM tasks
 WHERE user_id = ?1
   AND (?2 IS NULL OR priority = ?2)
   AND (?3 IS NULL OR completed = ?3)
   AND (?4 IS NULL OR (due_date IS NOT NULL AND due_date <= ?4))
   AND (?5 IS NULL OR (due_date IS NOT NULL AND due_date >= ?5))
 ORDER BY created_at DESC
"#
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(
                    params![
                        user_id.to_string(),
                        filter.priority.map(|p| p.as_str()),
                        filter.completed.map(|c| c as i64),
                        filter.due_before.map(format_ts),
                        filter.due_after.map(format_ts),
                    ],
                    |row| Ok(row_to_task(row)),
                )
                .map_err(db_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(db_err)??);
            }
            Ok(out)
        })
        .await
    }

    async fn delete_completed(&self, user_id: Uuid) -> Result<u64, StorageError> {
        self.blocking(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM tasks WHERE user_id = ?1 AND completed = 1",
                    params![user_id.to_string()],
                )
                .map_err(db_err)?;
            Ok(deleted as u64)
        })
        .await
    }
}

#[async_trait]
impl ThreadStore for SqliteStore {
    async fn create_thread(&self, user_id: Uuid) -> Result<Thread, StorageError> {
        let now = Utc::now();
        let thread = Thread {
            id: Uuid::new_v4(),
            user_id,
            created_at: now,
            updated_at: now,
        };
        let insert = thread.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO threads (id, user_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    insert.id.to_string(),
                    insert.user_id.to_string(),
                    format_ts(insert.created_at),
                    format_ts(insert.updated_at),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await?;
        Ok(thread)
    }

    async fn get_thread(&self, user_id: Uuid, id: Uuid) -> Result<Option<Thread>, StorageError> {
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, user_id, created_at, updated_at FROM threads WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), user_id.to_string()],
                |row| {
                    let id: String = row.get(0)?;
                    let user_id: String = row.get(1)?;
                    let created_at: String = row.get(2)?;
                    let updated_at: String = row.get(3)?;
                    Ok((id, user_id, created_at, updated_at))
                },
            )
            .optional()
            .map_err(db_err)?
            .map(|(id, user_id, created_at, updated_at)| {
                Ok(Thread {
                    id: parse_id(&id)?,
                    user_id: parse_id(&user_id)?,
                    created_at: parse_ts(&created_at)?,
                    updated_at: parse_ts(&updated_at)?,
                })
            })
            .transpose()
        })
        .await
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
        let insert = record.clone();
        self.blocking(move |conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM threads WHERE id = ?1",
                    params![insert.thread_id.to_string()],
                    |_| Ok(true),
                )
                .optional()
                .map_err(db_err)?
                .unwrap_or(false);
            if !exists {
                return Err(StorageError::not_found("thread", insert.thread_id));
            }

            let message_json = serde_json::to_string(&insert.message)
                .map_err(|e| StorageError::Internal(e.to_string()))?;
            conn.execute(
                "INSERT INTO thread_messages (id, thread_id, message_json, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    insert.id.to_string(),
                    insert.thread_id.to_string(),
                    message_json,
                    format_ts(insert.created_at),
                ],
            )
            .map_err(db_err)?;
            conn.execute(
                "UPDATE threads SET updated_at = ?2 WHERE id = ?1",
                params![insert.thread_id.to_string(), format_ts(insert.created_at)],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await?;
        Ok(record)
    }

    async fn history(&self, thread_id: Uuid) -> Result<Vec<ThreadMessage>, StorageError> {
        self.blocking(move |conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM threads WHERE id = ?1",
                    params![thread_id.to_string()],
                    |_| Ok(true),
                )
                .optional()
                .map_err(db_err)?
                .unwrap_or(false);
            if !exists {
                return Err(StorageError::not_found("thread", thread_id));
            }

            let mut stmt = conn
                .prepare_cached(
                    r#"
SELECT id, thread_id, message_json, created_at
  FROM thread_messages
 WHERE thread_id = ?1
 ORDER BY rowid ASC
"#,
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![thread_id.to_string()], |row| {
                    let id: String = row.get(0)?;
                    let thread_id: String = row.get(1)?;
                    let message_json: String = row.get(2)?;
                    let created_at: String = row.get(3)?;
                    Ok((id, thread_id, message_json, created_at))
                })
                .map_err(db_err)?;

            let mut out = Vec::new();
            for row in rows {
                let (id, thread_id, message_json, created_at) = row.map_err(db_err)?;
                out.push(ThreadMessage {
                    id: parse_id(&id)?,
                    thread_id: parse_id(&thread_id)?,
                    message: serde_json::from_str(&message_json)
                        .map_err(|e| StorageError::Internal(e.to_string()))?,
                    created_at: parse_ts(&created_at)?,
                });
            }
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl PendingCallStore for SqliteStore {
    async fn insert(&self, call: NewPendingCall) -> Result<PendingCall, StorageError> {
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
        let insert = record.clone();
        self.blocking(move |conn| {
            let result = conn.execute(
                r#"
INSERT INTO pending_calls (id, user_id, thread_id, run_id, tool_call_id, function_name, function_args, status, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
"#,
                params![
                    insert.id.to_string(),
                    insert.user_id.to_string(),
                    insert.thread_id.to_string(),
                    insert.run_id.to_string(),
                    insert.tool_call_id,
                    insert.function_name,
                    insert.function_args,
                    insert.status.as_str(),
                    format_ts(insert.created_at),
                    format_ts(insert.updated_at),
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(StorageError::DuplicateToolCall {
                    tool_call_id: insert.tool_call_id.clone(),
                }),
                Err(e) => Err(db_err(e)),
            }
        })
        .await?;
        Ok(record)
    }

    async fn get_call(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<Option<PendingCall>, StorageError> {
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {CALL_COLUMNS} FROM pending_calls WHERE id = ?1 AND user_id = ?2"),
                params![id.to_string(), user_id.to_string()],
                |row| Ok(row_to_call(row)),
            )
            .optional()
            .map_err(db_err)?
            .transpose()
        })
        .await
    }

    async fn list_pending(&self, user_id: Uuid) -> Result<Vec<PendingCall>, StorageError> {
        self.blocking(move |conn| {
            let mut stmt = conn
                .prepare_cached(&format!(
                    r#"
SELECT {CALL_COLUMNS}
  FROM pending_calls
 WHERE user_id = ?1
   AND status = 'pending'
 ORDER BY created_at ASC, rowid ASC
"#
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![user_id.to_string()], |row| Ok(row_to_call(row)))
                .map_err(db_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(db_err)??);
            }
            Ok(out)
        })
        .await
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

        self.blocking(move |conn| {
            // Conditional update: only one concurrent caller can win this.
            let changed = conn
                .execute(
                    r#"
UPDATE pending_calls
   SET status = ?3,
       updated_at = ?4
 WHERE id = ?1
   AND user_id = ?2
   AND status = 'pending'
"#,
                    params![
                        id.to_string(),
                        user_id.to_string(),
                        status.as_str(),
                        format_ts(Utc::now()),
                    ],
                )
                .map_err(db_err)?;

            let current = conn
                .query_row(
                    &format!(
                        "SELECT {CALL_COLUMNS} FROM pending_calls WHERE id = ?1 AND user_id = ?2"
                    ),
                    params![id.to_string(), user_id.to_string()],
                    |row| Ok(row_to_call(row)),
                )
                .optional()
                .map_err(db_err)?
                .transpose()?;

            match current {
                None => Err(StorageError::not_found("pending call", id)),
                Some(call) if changed == 1 => Ok(call),
                Some(call) => Err(StorageError::AlreadyResolved {
                    id,
                    status: call.status,
                }),
            }
        })
        .await
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn create_user(
        &self,
        email: &str,
        display_name: &str,
        token_hash: &str,
    ) -> Result<User, StorageError> {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: display_name.to_string(),
            token_hash: token_hash.to_string(),
            created_at: Utc::now(),
        };
        let insert = user.clone();
        self.blocking(move |conn| {
            let result = conn.execute(
                "INSERT INTO users (id, email, display_name, token_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    insert.id.to_string(),
                    insert.email,
                    insert.display_name,
                    insert.token_hash,
                    format_ts(insert.created_at),
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => {
                    Err(StorageError::EmailTaken(insert.email.clone()))
                }
                Err(e) => Err(db_err(e)),
            }
        })
        .await?;
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StorageError> {
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, email, display_name, token_hash, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    let id: String = row.get(0)?;
                    let email: String = row.get(1)?;
                    let display_name: String = row.get(2)?;
                    let token_hash: String = row.get(3)?;
                    let created_at: String = row.get(4)?;
                    Ok((id, email, display_name, token_hash, created_at))
                },
            )
            .optional()
            .map_err(db_err)?
            .map(row_to_user)
            .transpose()
        })
        .await
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, StorageError> {
        let token_hash = token_hash.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, email, display_name, token_hash, created_at FROM users WHERE token_hash = ?1",
                params![token_hash],
                |row| {
                    let id: String = row.get(0)?;
                    let email: String = row.get(1)?;
                    let display_name: String = row.get(2)?;
                    let token_hash: String = row.get(3)?;
                    let created_at: String = row.get(4)?;
                    Ok((id, email, display_name, token_hash, created_at))
                },
            )
            .optional()
            .map_err(db_err)?
            .map(row_to_user)
            .transpose()
        })
        .await
    }
}

fn row_to_user(
    (id, email, display_name, token_hash, created_at): (String, String, String, String, String),
) -> Result<User, StorageError> {
    Ok(User {
        id: parse_id(&id)?,
        email,
        display_name,
        token_hash,
        created_at: parse_ts(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tp_llm::{ChatMessage, Role};

    fn new_call(user_id: Uuid, thread_id: Uuid, tool_call_id: &str) -> NewPendingCall {
        NewPendingCall {
            user_id,
            thread_id,
            run_id: Uuid::new_v4(),
            tool_call_id: tool_call_id.to_string(),
            function_name: "create_task".to_string(),
            function_args: "{\"title\":\"Buy milk\"}".to_string(),
        }
    }

    #[tokio::test]
    async fn resolve_is_a_conditional_update() {
        let store = SqliteStore::open_in_memory().expect("open");
        let user = Uuid::new_v4();
        let call = store
            .insert(new_call(user, Uuid::new_v4(), "call_1"))
            .await
            .expect("insert");

        let won = store
            .resolve(user, call.id, CallStatus::Approved)
            .await
            .expect("first resolve");
        assert_eq!(won.status, CallStatus::Approved);

        let err = store
            .resolve(user, call.id, CallStatus::Approved)
            .await
            .expect_err("second resolve must lose");
        assert!(matches!(err, StorageError::AlreadyResolved { .. }));
    }

    #[tokio::test]
    async fn unique_index_blocks_duplicate_pending_rows() {
        let store = SqliteStore::open_in_memory().expect("open");
        let user = Uuid::new_v4();
        let thread = Uuid::new_v4();
        let first = store
            .insert(new_call(user, thread, "call_1"))
            .await
            .expect("insert");

        let err = store
            .insert(new_call(user, thread, "call_1"))
            .await
            .expect_err("duplicate pending row");
        assert!(matches!(err, StorageError::DuplicateToolCall { .. }));

        store
            .resolve(user, first.id, CallStatus::Rejected)
            .await
            .expect("resolve");
        store
            .insert(new_call(user, thread, "call_1"))
            .await
            .expect("terminal rows do not block re-proposal");
    }

    #[tokio::test]
    async fn thread_history_round_trips_messages_in_order() {
        let store = SqliteStore::open_in_memory().expect("open");
        let user = Uuid::new_v4();
        let thread = store.create_thread(user).await.expect("thread");

        for content in ["first", "second"] {
            store
                .append_message(
                    thread.id,
                    ChatMessage {
                        role: Role::User,
                        content: content.to_string(),
                        tool_calls: vec![],
                        tool_call_id: None,
                    },
                )
                .await
                .expect("append");
        }

        let history = store.history(thread.id).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message.content, "first");
        assert_eq!(history[1].message.content, "second");
    }

    #[tokio::test]
    async fn task_patch_updates_only_provided_fields() {
        let store = SqliteStore::open_in_memory().expect("open");
        let user = Uuid::new_v4();
        let task = store
            .create(
                user,
                NewTask {
                    title: "Water plants".to_string(),
                    description: Some("the ficus too".to_string()),
                    ..NewTask::default()
                },
            )
            .await
            .expect("create");

        let updated = store
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
        assert!(updated.completed);
        assert_eq!(updated.title, "Water plants");
        assert_eq!(updated.description.as_deref(), Some("the ficus too"));
    }

    #[tokio::test]
    async fn email_uniqueness_is_enforced() {
        let store = SqliteStore::open_in_memory().expect("open");
        store
            .create_user("a@example.com", "A", "hash-a")
            .await
            .expect("create");
        let err = store
            .create_user("a@example.com", "A again", "hash-b")
            .await
            .expect_err("duplicate email");
        assert!(matches!(err, StorageError::EmailTaken(_)));
    }
}
