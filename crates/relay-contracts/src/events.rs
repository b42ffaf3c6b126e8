// Server-sent event payloads streamed to the client during a turn.
//
// Each variant matches one of the event kinds in the external interface:
// meta, memory_recall, rag_source, reasoning, content, tool_call,
// tool_result, done, error. `ChatEvent::to_sse_line` renders the
// `data: <json>\n\n` framing directly.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MemoryItem {
    pub id: String,
    pub content: String,
    pub relevance: f32,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PreferenceItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct MemoryRecallData {
    pub memories: Vec<MemoryItem>,
    pub preferences: Vec<PreferenceItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RagSourceItem {
    pub content: String,
    pub score: f32,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Calling,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToolCallEventData {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub status: ToolCallStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToolResultEventData {
    pub id: String,
    pub name: String,
    pub status: ToolResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
}

/// One event in the chat SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Meta {
        conversation_id: Uuid,
    },
    MemoryRecall {
        data: MemoryRecallData,
    },
    RagSource {
        data: Vec<RagSourceItem>,
    },
    Reasoning {
        data: String,
    },
    Content {
        data: String,
    },
    ToolCall {
        data: ToolCallEventData,
    },
    ToolResult {
        data: ToolResultEventData,
    },
    Done {
        usage: UsageInfo,
        model: String,
    },
    Error {
        data: String,
    },
}

impl ChatEvent {
    /// Render as a single `data: <json>\n\n` SSE frame.
    pub fn to_sse_line(&self) -> String {
        format!(
            "data: {}\n\n",
            serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_event_shape() {
        let id = Uuid::now_v7();
        let event = ChatEvent::Meta { conversation_id: id };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "meta");
        assert_eq!(json["conversation_id"], id.to_string());
    }

    #[test]
    fn test_content_event_line() {
        let event = ChatEvent::Content {
            data: "hello".into(),
        };
        let line = event.to_sse_line();
        assert!(line.starts_with("data: "));
        assert!(line.ends_with("\n\n"));
        assert!(line.contains("\"type\":\"content\""));
    }

    #[test]
    fn test_tool_result_error_omits_result_field() {
        let event = ChatEvent::ToolResult {
            data: ToolResultEventData {
                id: "a".into(),
                name: "echo".into(),
                status: ToolResultStatus::Error,
                result: None,
                error: Some("boom".into()),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["data"].get("result").is_none());
        assert_eq!(json["data"]["error"], "boom");
    }
}
