// Database models (internal, may differ from public DTOs)

use chrono::{DateTime, Utc};
use relay_core::message::{Message, MessageRole};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

// ============================================
// Users (minimal: owner reference only, full auth CRUD is out of scope)
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateUser {
    pub email: String,
    pub name: String,
}

// ============================================
// Tenants (read-only from the core's perspective: quota + model allowlist)
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct TenantRow {
    pub id: Uuid,
    pub name: String,
    pub monthly_token_quota: i64,
    #[sqlx(json)]
    pub model_allowlist: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTenant {
    pub name: String,
    pub monthly_token_quota: i64,
    pub model_allowlist: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTenant {
    pub name: Option<String>,
    pub monthly_token_quota: Option<i64>,
    pub model_allowlist: Option<Vec<String>>,
}

impl TenantRow {
    /// `0` means unlimited, matching the billing semantics this quota check is ported from.
    pub fn quota(&self) -> Option<i64> {
        if self.monthly_token_quota <= 0 {
            None
        } else {
            Some(self.monthly_token_quota)
        }
    }
}

// ============================================
// Conversations
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct ConversationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub title: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateConversation {
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub title: String,
    pub model: String,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateConversation {
    pub title: Option<String>,
    pub model: Option<String>,
}

pub const DEFAULT_CONVERSATION_TITLE: &str = "New conversation";

// ============================================
// Messages (PRIMARY conversation data)
// ============================================

/// `tool_calls` holds the raw `ToolCall` array (id, name, arguments) for an
/// assistant message that requested tool invocations; absent otherwise.
/// `metadata` carries the context snapshot (tool invocations, memory hits,
/// retrieval hits) the orchestrator assembled for this entry, if any.
#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub reasoning: Option<String>,
    pub tool_calls: Option<Value>,
    pub tool_call_id: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMessageRow {
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub reasoning: Option<String>,
    pub tool_calls: Option<Value>,
    pub tool_call_id: Option<String>,
    pub metadata: Option<Value>,
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        let role = match self.role.as_str() {
            "system" => MessageRole::System,
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            "tool" => MessageRole::Tool,
            other => unreachable!("unknown message role in storage: {other}"),
        };
        let tool_calls = self.tool_calls.and_then(|v| serde_json::from_value(v).ok());
        Message {
            id: self.id,
            role,
            content: self.content,
            reasoning: self.reasoning,
            tool_calls,
            tool_call_id: self.tool_call_id,
            metadata: self.metadata,
            created_at: self.created_at,
        }
    }

    pub fn from_message(conversation_id: Uuid, message: &Message) -> CreateMessageRow {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        let tool_calls = message
            .tool_calls
            .as_ref()
            .filter(|tc| !tc.is_empty())
            .and_then(|tc| serde_json::to_value(tc).ok());
        CreateMessageRow {
            conversation_id,
            role: role.to_string(),
            content: message.content.clone(),
            reasoning: message.reasoning.clone(),
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
            metadata: message.metadata.clone(),
        }
    }
}

// ============================================
// Remote-process tool servers (user-registered MCP-style servers)
// ============================================

/// `config` holds the launch command (stdio transport) or endpoint URL (http
/// transport). `env_encrypted` holds the process-launch environment
/// (credentials included), encrypted at rest. `tools_cache` holds the last
/// successful `tools/list` discovery, refreshed by the tool catalogue loader
/// when absent or stale.
#[derive(Debug, Clone, FromRow)]
pub struct RemoteServerRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub transport: String,
    pub config: String,
    pub env_encrypted: Option<Vec<u8>>,
    pub enabled: bool,
    pub tools_cache: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateRemoteServer {
    pub user_id: Uuid,
    pub name: String,
    pub transport: String,
    pub config: String,
    pub env_encrypted: Option<Vec<u8>>,
}

// ============================================
// Custom (webhook) tools
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct CustomToolRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub http_url: String,
    pub http_method: String,
    pub http_headers_encrypted: Option<Vec<u8>>,
    pub http_body_template: Option<Value>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateCustomTool {
    pub user_id: Uuid,
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub http_url: String,
    pub http_method: String,
    pub http_headers_encrypted: Option<Vec<u8>>,
    pub http_body_template: Option<Value>,
}

// ============================================
// Usage Records (append-only accounting)
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct UsageRecordRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub trigger_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateUsageRecord {
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub trigger_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_contracts::tools::ToolCall;

    fn tenant(monthly_token_quota: i64) -> TenantRow {
        TenantRow {
            id: Uuid::now_v7(),
            name: "acme".to_string(),
            monthly_token_quota,
            model_allowlist: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_quota_zero_means_unlimited() {
        assert_eq!(tenant(0).quota(), None);
        assert_eq!(tenant(-1).quota(), None);
    }

    #[test]
    fn test_quota_positive_value_passes_through() {
        assert_eq!(tenant(50_000).quota(), Some(50_000));
    }

    #[test]
    fn test_message_round_trip_preserves_tool_calls() {
        let conversation_id = Uuid::now_v7();
        let message = Message {
            id: Uuid::now_v7(),
            role: MessageRole::Assistant,
            content: String::new(),
            reasoning: Some("thinking...".to_string()),
            tool_calls: Some(vec![ToolCall {
                id: "call_1".to_string(),
                name: "get_weather".to_string(),
                arguments: serde_json::json!({"city": "Paris"}),
            }]),
            tool_call_id: None,
            metadata: Some(serde_json::json!({"memory_hits": 1})),
            created_at: Utc::now(),
        };

        let row = MessageRow::from_message(conversation_id, &message);
        assert_eq!(row.role, "assistant");
        assert!(row.tool_calls.is_some());
        assert!(row.metadata.is_some());

        let rebuilt = MessageRow {
            id: message.id,
            conversation_id,
            role: row.role,
            content: row.content,
            reasoning: row.reasoning,
            tool_calls: row.tool_calls,
            tool_call_id: row.tool_call_id,
            metadata: row.metadata,
            created_at: message.created_at,
        }
        .into_message();

        assert_eq!(rebuilt.role, MessageRole::Assistant);
        let calls = rebuilt.tool_calls.expect("tool calls should round-trip");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(rebuilt.metadata.unwrap()["memory_hits"], 1);
    }

    #[test]
    fn test_message_with_empty_tool_calls_serializes_to_none() {
        let message = Message {
            id: Uuid::now_v7(),
            role: MessageRole::Assistant,
            content: "hello".to_string(),
            reasoning: None,
            tool_calls: Some(vec![]),
            tool_call_id: None,
            metadata: None,
            created_at: Utc::now(),
        };

        let row = MessageRow::from_message(Uuid::now_v7(), &message);
        assert!(row.tool_calls.is_none());
    }
}
