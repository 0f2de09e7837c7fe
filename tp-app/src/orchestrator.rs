//! Assistant orchestrator: LLM + function catalog + approval gate.
//!
//! One turn per user message. Read-only functions execute inline and
//! their results feed the next model call; side-effecting functions are
//! recorded in the pending-call ledger and the run stays blocked until
//! the approval API reports the outcome back via
//! [`Orchestrator::resume_with_tool_result`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tp_llm::{ChatClient, ChatMessage, ChatResponse, Role, ToolDefinition};
use tp_store::{NewPendingCall, PendingCallStore, StorageError, ThreadStore};
use tp_tools::{Executor, FunctionCall};
use uuid::Uuid;

const APPROVAL_NOTICE: &str =
    "This action needs your approval. Review the pending request to continue.";
const LOOP_LIMIT_NOTICE: &str =
    "I had to stop before finishing; please send a follow-up message to continue.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("thread not found: {0}")]
    ThreadNotFound(Uuid),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutedFunction {
    pub name: String,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub thread_id: Uuid,
    pub reply: String,
    pub executed_functions: Vec<ExecutedFunction>,
    pub has_pending_calls: bool,
    pub pending_calls_count: usize,
}

pub struct Orchestrator {
    llm: Arc<dyn ChatClient>,
    threads: Arc<dyn ThreadStore>,
    calls: Arc<dyn PendingCallStore>,
    executor: Arc<dyn Executor>,
    system_prompt: String,
    llm_timeout: Duration,
    tool_loops_max: usize,
    turn_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn ChatClient>,
        threads: Arc<dyn ThreadStore>,
        calls: Arc<dyn PendingCallStore>,
        executor: Arc<dyn Executor>,
        system_prompt: String,
        llm_timeout: Duration,
        tool_loops_max: usize,
    ) -> Self {
        Self {
            llm,
            threads,
            calls,
            executor,
            system_prompt,
            llm_timeout,
            tool_loops_max,
            turn_locks: DashMap::new(),
        }
    }

    pub async fn create_thread(&self, user_id: Uuid) -> Result<Uuid, ChatError> {
        let thread = self.threads.create_thread(user_id).await?;
        tracing::info!(thread_id = %thread.id, "thread created");
        Ok(thread.id)
    }

    #[tracing::instrument(level = "info", skip_all, fields(user_id = %user_id))]
    pub async fn handle_user_message(
        &self,
        user_id: Uuid,
        message: &str,
        thread_id: Option<Uuid>,
    ) -> Result<ChatOutcome, ChatError> {
        let thread = match thread_id {
            Some(id) => self
                .threads
                .get_thread(user_id, id)
                .await?
                .ok_or(ChatError::ThreadNotFound(id))?,
            None => self.threads.create_thread(user_id).await?,
        };

        let _guard = self.lock_thread(thread.id).await;

        let mut messages = self.load_context(thread.id).await?;
        self.append(
            thread.id,
            ChatMessage {
                role: Role::User,
                content: message.to_string(),
                tool_calls: vec![],
                tool_call_id: None,
            },
            &mut messages,
        )
        .await?;

        self.run_turn(user_id, thread.id, messages).await
    }

    /// Report a tool outcome back into a blocked run and let the model
    /// continue the turn. Used by the approval API after a human decision.
    #[tracing::instrument(level = "info", skip_all, fields(thread_id = %thread_id, tool_call_id = %tool_call_id))]
    pub async fn resume_with_tool_result(
        &self,
        user_id: Uuid,
        thread_id: Uuid,
        tool_call_id: &str,
        payload: serde_json::Value,
    ) -> Result<ChatOutcome, ChatError> {
        let _guard = self.lock_thread(thread_id).await;

        let mut messages = self.load_context(thread_id).await?;
        self.append(
            thread_id,
            ChatMessage {
                role: Role::Tool,
                content: payload.to_string(),
                tool_calls: vec![],
                tool_call_id: Some(tool_call_id.to_string()),
            },
            &mut messages,
        )
        .await?;

        self.run_turn(user_id, thread_id, messages).await
    }

    /// One thread processes one turn at a time; other threads are untouched.
    async fn lock_thread(&self, thread_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .turn_locks
            .entry(thread_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    async fn load_context(&self, thread_id: Uuid) -> Result<Vec<ChatMessage>, ChatError> {
        let mut messages = vec![ChatMessage {
            role: Role::System,
            content: self.system_prompt.clone(),
            tool_calls: vec![],
            tool_call_id: None,
        }];
        messages.extend(
            self.threads
                .history(thread_id)
                .await?
                .into_iter()
                .map(|m| m.message),
        );
        Ok(messages)
    }

    async fn append(
        &self,
        thread_id: Uuid,
        message: ChatMessage,
        messages: &mut Vec<ChatMessage>,
    ) -> Result<(), ChatError> {
        self.threads.append_message(thread_id, message.clone()).await?;
        messages.push(message);
        Ok(())
    }

    async fn chat_with_timeout(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, ChatError> {
        let started = Instant::now();
        let response = tokio::time::timeout(self.llm_timeout, self.llm.chat(messages, tools))
            .await
            .map_err(|_| ChatError::Upstream("llm request timed out".to_string()))?
            .map_err(|e| ChatError::Upstream(e.to_string()))?;
        tracing::info!(
            latency_ms = started.elapsed().as_millis() as u64,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            tool_calls = response.message.tool_calls.len(),
            content_len = response.message.content.len(),
            "llm call completed"
        );
        Ok(response)
    }

    async fn run_turn(
        &self,
        user_id: Uuid,
        thread_id: Uuid,
        mut messages: Vec<ChatMessage>,
    ) -> Result<ChatOutcome, ChatError> {
        let run_id = Uuid::new_v4();
        let tool_defs = FunctionCall::definitions();
        let mut executed: Vec<ExecutedFunction> = Vec::new();
        let mut tool_loops = 0usize;

        loop {
            tool_loops += 1;
            if tool_loops > self.tool_loops_max {
                tracing::error!(
                    tool_loops_max = self.tool_loops_max,
                    "assistant tool loop limit reached"
                );
                self.append(
                    thread_id,
                    ChatMessage {
                        role: Role::Assistant,
                        content: LOOP_LIMIT_NOTICE.to_string(),
                        tool_calls: vec![],
                        tool_call_id: None,
                    },
                    &mut messages,
                )
                .await?;
                return Ok(ChatOutcome {
                    thread_id,
                    reply: LOOP_LIMIT_NOTICE.to_string(),
                    executed_functions: executed,
                    has_pending_calls: false,
                    pending_calls_count: 0,
                });
            }

            let response = self.chat_with_timeout(&messages, &tool_defs).await?;

            if response.message.tool_calls.is_empty() {
                let reply = response.message.content.clone();
                self.append(thread_id, response.message, &mut messages).await?;
                tracing::info!(
                    reply_len = reply.len(),
                    executed_functions = executed.len(),
                    "assistant turn completed"
                );
                return Ok(ChatOutcome {
                    thread_id,
                    reply,
                    executed_functions: executed,
                    has_pending_calls: false,
                    pending_calls_count: 0,
                });
            }

            let assistant = response.message;
            self.append(thread_id, assistant.clone(), &mut messages).await?;

            let mut pending_created = 0usize;
            for tool_call in &assistant.tool_calls {
                tracing::info!(
                    tool_call_id = %tool_call.id,
                    function = %tool_call.name,
                    "assistant requested function"
                );

                let call = match FunctionCall::parse(&tool_call.name, &tool_call.arguments) {
                    Ok(call) => call,
                    Err(e) => {
                        tracing::warn!(
                            tool_call_id = %tool_call.id,
                            function = %tool_call.name,
                            error = %e,
                            "function request rejected at validation"
                        );
                        self.append(
                            thread_id,
                            tool_result(&tool_call.id, json!({ "error": e.to_string() })),
                            &mut messages,
                        )
                        .await?;
                        continue;
                    }
                };

                if call.requires_approval() {
                    let inserted = self
                        .calls
                        .insert(NewPendingCall {
                            user_id,
                            thread_id,
                            run_id,
                            tool_call_id: tool_call.id.clone(),
                            function_name: call.name().to_string(),
                            function_args: tool_call.arguments.clone(),
                        })
                        .await;
                    match inserted {
                        Ok(pending) => {
                            pending_created += 1;
                            tracing::info!(
                                call_id = %pending.id,
                                function = %pending.function_name,
                                "function recorded for approval"
                            );
                        }
                        Err(StorageError::DuplicateToolCall { tool_call_id }) => {
                            // Already on the ledger from an earlier attempt.
                            pending_created += 1;
                            tracing::warn!(%tool_call_id, "pending call already recorded");
                        }
                        Err(e) => return Err(e.into()),
                    }
                    continue;
                }

                let result = match self.executor.execute(user_id, &call).await {
                    Ok(value) => {
                        executed.push(ExecutedFunction {
                            name: call.name().to_string(),
                            result: value.clone(),
                        });
                        value
                    }
                    Err(e) => {
                        tracing::warn!(
                            function = call.name(),
                            error = %e,
                            "auto-executed function failed"
                        );
                        json!({ "error": e.to_string() })
                    }
                };
                self.append(thread_id, tool_result(&tool_call.id, result), &mut messages)
                    .await?;
            }

            if pending_created > 0 {
                // The run is blocked on a human decision; approve/reject
                // will resume it with the tool outcome.
                let reply = if assistant.content.trim().is_empty() {
                    APPROVAL_NOTICE.to_string()
                } else {
                    assistant.content.clone()
                };
                tracing::info!(
                    pending_calls = pending_created,
                    run_id = %run_id,
                    "assistant turn blocked on approval"
                );
                return Ok(ChatOutcome {
                    thread_id,
                    reply,
                    executed_functions: executed,
                    has_pending_calls: true,
                    pending_calls_count: pending_created,
                });
            }
        }
    }
}

fn tool_result(tool_call_id: &str, payload: serde_json::Value) -> ChatMessage {
    ChatMessage {
        role: Role::Tool,
        content: payload.to_string(),
        tool_calls: vec![],
        tool_call_id: Some(tool_call_id.to_string()),
    }
}
