// Tool descriptors and call/result DTOs shared by the orchestrator, the
// registry, and the HTTP layer.
//
// Three origins are supported, matching the three tool-dispatch backends:
// process-wide built-ins, per-request remote-process (JSON-RPC) servers,
// and per-request HTTP webhooks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tool policy determines how tool calls are handled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolPolicy {
    /// Execute immediately without user approval
    #[default]
    Auto,
    /// Require user approval before execution (HITL)
    RequiresApproval,
}

/// Tool definition in the active registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDefinition {
    /// Process-wide built-in, implemented in-process.
    Builtin(BuiltinTool),
    /// User-scoped remote-process tool, dispatched over JSON-RPC.
    RemoteProcess(RemoteProcessTool),
    /// User-scoped HTTP webhook tool.
    Webhook(WebhookTool),
}

impl ToolDefinition {
    pub fn name(&self) -> &str {
        match self {
            ToolDefinition::Builtin(t) => &t.name,
            ToolDefinition::RemoteProcess(t) => &t.name,
            ToolDefinition::Webhook(t) => &t.name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            ToolDefinition::Builtin(t) => &t.description,
            ToolDefinition::RemoteProcess(t) => &t.description,
            ToolDefinition::Webhook(t) => &t.description,
        }
    }

    pub fn parameters(&self) -> &serde_json::Value {
        match self {
            ToolDefinition::Builtin(t) => &t.parameters,
            ToolDefinition::RemoteProcess(t) => &t.parameters,
            ToolDefinition::Webhook(t) => &t.parameters,
        }
    }

    pub fn origin(&self) -> ToolOrigin {
        match self {
            ToolDefinition::Builtin(_) => ToolOrigin::Builtin,
            ToolDefinition::RemoteProcess(t) => ToolOrigin::RemoteProcess {
                server_id: t.server_id.clone(),
            },
            ToolDefinition::Webhook(t) => ToolOrigin::Webhook {
                tool_id: t.tool_id.clone(),
            },
        }
    }

    /// Render as the industry-standard OpenAI-style function-calling schema.
    pub fn to_function_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters(),
            }
        })
    }
}

/// Dispatch origin of a tool, used to resolve which backend executes a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOrigin {
    Builtin,
    RemoteProcess { server_id: String },
    Webhook { tool_id: String },
}

/// Built-in tool configuration. Execution is looked up by name in the
/// process-wide builtin registry, not encoded here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinTool {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub policy: ToolPolicy,
}

/// A remote-process tool backed by a JSON-RPC server the user has registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteProcessTool {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    /// Id of the server record this tool was discovered from.
    pub server_id: String,
    #[serde(default)]
    pub policy: ToolPolicy,
}

/// Webhook tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookTool {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    /// Id of the user's custom-tool record this descriptor came from.
    pub tool_id: String,
    /// Webhook endpoint URL; may contain `{{arg}}` placeholders.
    pub url: String,
    /// HTTP method (default: POST)
    #[serde(default = "default_http_method")]
    pub method: String,
    /// Request headers, values may contain `{{arg}}` placeholders.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Optional JSON body template; placeholders substituted from arguments.
    /// When absent, the argument object itself is sent as the JSON body.
    pub body_template: Option<serde_json::Value>,
    /// Timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub policy: ToolPolicy,
}

fn default_http_method() -> String {
    "POST".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Tool call as accumulated from an LLM's streamed function-calling deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Outcome of dispatching a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, result: impl Into<serde_json::Value>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn failure(tool_call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Text representation fed back to the LLM as the tool entry's content.
    pub fn as_text(&self) -> String {
        if let Some(err) = &self.error {
            err.clone()
        } else if let Some(result) = &self.result {
            serde_json::to_string(result).unwrap_or_default()
        } else {
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tool_defaults() {
        let json = r#"{
            "type": "builtin",
            "name": "current_time",
            "description": "Return the current time",
            "parameters": {"type": "object", "properties": {}}
        }"#;

        let tool: ToolDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(tool.name(), "current_time");
        assert_eq!(tool.origin(), ToolOrigin::Builtin);
    }

    #[test]
    fn test_remote_process_tool_origin() {
        let json = r#"{
            "type": "remote_process",
            "name": "search_docs",
            "description": "Search internal docs",
            "parameters": {"type": "object"},
            "server_id": "srv_1"
        }"#;

        let tool: ToolDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(
            tool.origin(),
            ToolOrigin::RemoteProcess {
                server_id: "srv_1".to_string()
            }
        );
    }

    #[test]
    fn test_webhook_tool_defaults() {
        let json = r#"{
            "type": "webhook",
            "name": "send_email",
            "description": "Send an email",
            "parameters": {"type": "object"},
            "tool_id": "tool_1",
            "url": "https://example.com/webhook"
        }"#;

        let tool: ToolDefinition = serde_json::from_str(json).unwrap();
        match tool {
            ToolDefinition::Webhook(webhook) => {
                assert_eq!(webhook.method, "POST");
                assert_eq!(webhook.timeout_secs, 30);
                assert_eq!(webhook.policy, ToolPolicy::Auto);
            }
            _ => panic!("Expected webhook tool"),
        }
    }

    #[test]
    fn test_tool_result_text() {
        let ok = ToolResult::success("a", serde_json::json!({"x": 1}));
        assert_eq!(ok.as_text(), "{\"x\":1}");
        assert!(ok.is_success());

        let err = ToolResult::failure("b", "boom");
        assert_eq!(err.as_text(), "boom");
        assert!(!err.is_success());
    }

    #[test]
    fn test_function_schema_shape() {
        let tool = ToolDefinition::Builtin(BuiltinTool {
            name: "echo".into(),
            description: "Echo input".into(),
            parameters: serde_json::json!({"type": "object"}),
            policy: ToolPolicy::Auto,
        });
        let schema = tool.to_function_schema();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "echo");
    }
}
