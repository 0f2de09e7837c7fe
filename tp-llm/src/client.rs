use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatResponse, ToolDefinition};
use async_trait::async_trait;

/// One round-trip to a chat-completions model.
///
/// The orchestrator only depends on this trait; production wires in
/// [`crate::OpenAiClient`], tests wire in a scripted backend.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse>;
}

const TOOL_NAME_MAX_LEN: usize = 64;

/// Tool names must match `^[a-zA-Z0-9_-]{1,64}$`.
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LlmError::InvalidInput("tool name is empty".to_string()));
    }
    if name.len() > TOOL_NAME_MAX_LEN {
        return Err(LlmError::InvalidInput(format!(
            "tool name {name:?} exceeds {TOOL_NAME_MAX_LEN} characters"
        )));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_' && *c != '-')
    {
        return Err(LlmError::InvalidInput(format!(
            "tool name {name:?} contains invalid character {ch:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_snake_case_names() {
        validate_tool_name("create_task").expect("valid name");
        validate_tool_name("delete_completed_tasks").expect("valid name");
    }

    #[test]
    fn rejects_empty_and_punctuated_names() {
        assert!(validate_tool_name("").is_err());
        assert!(validate_tool_name("tasks.create").is_err());
        assert!(validate_tool_name("tasks create").is_err());
    }

    #[test]
    fn rejects_overlong_names() {
        let name = "t".repeat(TOOL_NAME_MAX_LEN + 1);
        assert!(validate_tool_name(&name).is_err());
    }
}
