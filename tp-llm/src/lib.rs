//! BYO-key LLM client for TaskPilot.
//!
//! Pure HTTP client against an OpenAI-compatible chat-completions API,
//! with a `ChatClient` trait seam so the orchestrator can be tested
//! against a scripted backend.

mod client;
mod error;
mod openai;
mod types;

pub use client::{ChatClient, validate_tool_name};
pub use error::{LlmError, Result};
pub use openai::OpenAiClient;
pub use types::{ChatMessage, ChatResponse, Role, ToolCall, ToolDefinition, Usage};
