//! Shared fixtures for orchestrator and approval tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tp_llm::{
    ChatClient, ChatMessage, ChatResponse, LlmError, Role, ToolCall, ToolDefinition, Usage,
};
use tp_store::{MemoryStore, TaskStore};
use tp_tools::{Executor, FunctionCall, FunctionExecutor};
use uuid::Uuid;

use crate::approvals::ApprovalService;
use crate::orchestrator::Orchestrator;

/// Scripted chat backend: pops one queued response per call. An empty
/// script yields a plain reply so best-effort resumptions never panic.
#[derive(Default)]
pub struct ScriptedChat {
    script: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
}

impl ScriptedChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, text: &str) {
        self.push(Ok(plain_response(text)));
    }

    pub fn push_tool_call(&self, id: &str, name: &str, arguments: &str) {
        self.push(Ok(ChatResponse {
            message: ChatMessage {
                role: Role::Assistant,
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                }],
                tool_call_id: None,
            },
            usage: zero_usage(),
            finish_reason: "tool_calls".to_string(),
        }));
    }

    pub fn push_error(&self, err: LlmError) {
        self.push(Err(err));
    }

    fn push(&self, entry: Result<ChatResponse, LlmError>) {
        self.script.lock().expect("script lock").push_back(entry);
    }
}

fn plain_response(text: &str) -> ChatResponse {
    ChatResponse {
        message: ChatMessage {
            role: Role::Assistant,
            content: text.to_string(),
            tool_calls: vec![],
            tool_call_id: None,
        },
        usage: zero_usage(),
        finish_reason: "stop".to_string(),
    }
}

fn zero_usage() -> Usage {
    Usage {
        prompt_tokens: 0,
        completion_tokens: 0,
    }
}

#[async_trait]
impl ChatClient for ScriptedChat {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> tp_llm::Result<ChatResponse> {
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Ok(plain_response("Okay.")))
    }
}

/// Counts executions on the way into the real dispatcher.
pub struct SpyExecutor {
    inner: FunctionExecutor,
    invocations: AtomicUsize,
}

impl SpyExecutor {
    pub fn new(tasks: Arc<dyn TaskStore>) -> Self {
        Self {
            inner: FunctionExecutor::new(tasks),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for SpyExecutor {
    async fn execute(
        &self,
        user_id: Uuid,
        call: &FunctionCall,
    ) -> tp_tools::Result<serde_json::Value> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(user_id, call).await
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub chat: Arc<ScriptedChat>,
    pub spy: Arc<SpyExecutor>,
    pub orchestrator: Arc<Orchestrator>,
    pub approvals: ApprovalService,
    pub user_id: Uuid,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let chat = Arc::new(ScriptedChat::new());
    let spy = Arc::new(SpyExecutor::new(store.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        chat.clone(),
        store.clone(),
        store.clone(),
        spy.clone(),
        "You are a test assistant.".to_string(),
        Duration::from_secs(5),
        4,
    ));
    let approvals = ApprovalService::new(store.clone(), spy.clone(), orchestrator.clone());
    Harness {
        store,
        chat,
        spy,
        orchestrator,
        approvals,
        user_id: Uuid::new_v4(),
    }
}
