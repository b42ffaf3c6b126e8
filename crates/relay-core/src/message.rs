// The orchestrator's working message list.
//
// One canonical shape for a conversation entry, used both as the list passed
// to the LLM stream adapter and as the persistence writer's input. Tool
// calls/results are carried as structured fields rather than as a separate
// message-content sum type, so the invariant that a tool-result entry is
// preceded by a matching tool-call entry is just a field lookup.

use chrono::{DateTime, Utc};
use relay_contracts::tools::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry in the running message list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    /// Assistant-only chain-of-thought trace, kept separate from `content`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Tool calls requested by an assistant entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Id of the tool call this entry answers (tool-role entries only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Context snapshot assembled for this entry — tool invocations, memory
    /// hits, retrieval hits — or `None` for entries with no such context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content.into())
    }

    pub fn assistant(content: impl Into<String>, reasoning: Option<String>) -> Self {
        let mut msg = Self::new(MessageRole::Assistant, content.into());
        msg.reasoning = reasoning;
        msg
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        reasoning: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        let mut msg = Self::assistant(content, reasoning);
        msg.tool_calls = Some(tool_calls);
        msg
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageRole::Tool, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    fn new(role: MessageRole, content: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            role,
            content,
            reasoning: None,
            tool_calls: None,
            tool_call_id: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }

    /// Attaches a context snapshot (tool invocations, memory hits, retrieval
    /// hits) to this entry, builder-style.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_carries_call_id() {
        let msg = Message::tool_result("call_1", "42");
        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_assistant_with_tool_calls_invariant() {
        let tc = ToolCall {
            id: "a".into(),
            name: "echo".into(),
            arguments: serde_json::json!({}),
        };
        let msg = Message::assistant_with_tool_calls("", None, vec![tc.clone()]);
        assert!(msg.has_tool_calls());
        assert_eq!(msg.tool_calls.unwrap()[0].id, tc.id);
    }
}
