// Tool Registry
//
// Three independently-managed partitions, matching the three tool-dispatch
// backends: a process-wide set of built-ins registered once at startup, and
// two per-request partitions (remote-process servers, webhooks) that are
// replaced wholesale whenever a turn's context assembly step re-discovers
// them. Builtins are callable in-process; the other two partitions hold only
// descriptors here — actual dispatch goes through `remote_tool`.

use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use relay_contracts::tools::{
    BuiltinTool, RemoteProcessTool, ToolCall, ToolDefinition, ToolOrigin, ToolPolicy, ToolResult,
    WebhookTool,
};

/// Caller identity and an opaque storage handle, threaded through to builtin
/// tools that need to act on the caller's behalf (querying their data,
/// looking up their settings) rather than purely on the call arguments.
/// `db` is `Any` rather than a concrete storage type since this crate has no
/// dependency on `relay-storage` — tools that need it downcast it themselves.
#[derive(Clone)]
pub struct ToolContext {
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub request_id: String,
    pub db: Arc<dyn Any + Send + Sync>,
}

impl ToolContext {
    pub fn new(user_id: impl Into<String>, request_id: impl Into<String>, db: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: None,
            request_id: request_id.into(),
            db,
        }
    }

    pub fn with_tenant_id(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }
}

/// Outcome of a built-in tool's execution, distinguishing errors safe to
/// show the model from internal failures that must not leak detail.
#[derive(Debug)]
pub enum ToolExecutionResult {
    Success(Value),
    ToolError(String),
    InternalError(ToolInternalError),
}

impl ToolExecutionResult {
    pub fn success(value: impl Into<Value>) -> Self {
        ToolExecutionResult::Success(value.into())
    }

    pub fn tool_error(message: impl Into<String>) -> Self {
        ToolExecutionResult::ToolError(message.into())
    }

    pub fn internal_error_msg(message: impl Into<String>) -> Self {
        ToolExecutionResult::InternalError(ToolInternalError::from_message(message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolExecutionResult::Success(_))
    }

    pub fn into_tool_result(self, tool_call_id: &str, tool_name: &str) -> ToolResult {
        match self {
            ToolExecutionResult::Success(value) => ToolResult::success(tool_call_id, value),
            ToolExecutionResult::ToolError(message) => ToolResult::failure(tool_call_id, message),
            ToolExecutionResult::InternalError(err) => {
                error!(
                    tool_name = %tool_name,
                    tool_call_id = %tool_call_id,
                    error = %err.message,
                    "tool internal error (details hidden from model)"
                );
                ToolResult::failure(
                    tool_call_id,
                    "an internal error occurred while executing the tool",
                )
            }
        }
    }
}

#[derive(Debug)]
pub struct ToolInternalError {
    pub message: String,
}

impl ToolInternalError {
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ToolInternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ToolInternalError {}

/// A process-wide built-in tool, callable directly by name.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, arguments: Value) -> ToolExecutionResult;

    /// Context-aware variant for tools that need caller identity or storage
    /// access. Defaults to forwarding to `execute`; only tools that actually
    /// need the context override this.
    async fn execute_with_context(&self, arguments: Value, _context: &ToolContext) -> ToolExecutionResult {
        self.execute(arguments).await
    }

    fn policy(&self) -> ToolPolicy {
        ToolPolicy::Auto
    }

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::Builtin(BuiltinTool {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
            policy: self.policy(),
        })
    }
}

/// Three-partition tool catalogue backing a turn's `tools/list` view.
///
/// Builtins are process-wide and never cleared. Remote-process tools are
/// grouped by the server that discovered them so a single server's tools
/// can be replaced without touching another's. Webhooks are keyed by the
/// user's custom-tool id. `clear_user_tools` drops both per-request
/// partitions while leaving builtins untouched.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    builtins: HashMap<String, Arc<dyn Tool>>,
    remote: HashMap<String, Vec<RemoteProcessTool>>,
    webhooks: HashMap<String, WebhookTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_builtin(&mut self, tool: impl Tool + 'static) {
        self.builtins.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_builtin_arc(&mut self, tool: Arc<dyn Tool>) {
        self.builtins.insert(tool.name().to_string(), tool);
    }

    /// Replace everything discovered from a given remote-process server.
    /// Idempotent across re-discovery: a server's prior tool set is dropped
    /// entirely before the new one is inserted.
    pub fn set_remote_tools(&mut self, server_id: &str, tools: Vec<RemoteProcessTool>) {
        self.remote.insert(server_id.to_string(), tools);
    }

    pub fn remove_remote_server(&mut self, server_id: &str) {
        self.remote.remove(server_id);
    }

    pub fn set_webhook_tool(&mut self, tool: WebhookTool) {
        self.webhooks.insert(tool.tool_id.clone(), tool);
    }

    /// Drop all remote-process and webhook tools, keeping builtins.
    pub fn clear_user_tools(&mut self) {
        self.remote.clear();
        self.webhooks.clear();
    }

    pub fn get_builtin(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.builtins.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.builtins.contains_key(name)
            || self.remote.values().flatten().any(|t| t.name == name)
            || self.webhooks.values().any(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.builtins.len()
            + self.remote.values().map(Vec::len).sum::<usize>()
            + self.webhooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All tool definitions currently in scope, across all three partitions.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .builtins
            .values()
            .map(|t| t.to_definition())
            .collect();
        defs.extend(
            self.remote
                .values()
                .flatten()
                .cloned()
                .map(ToolDefinition::RemoteProcess),
        );
        defs.extend(
            self.webhooks
                .values()
                .cloned()
                .map(ToolDefinition::Webhook),
        );
        defs
    }

    /// Render the catalogue as OpenAI-style function schemas, optionally
    /// restricted to an allowlist of tool names.
    pub fn to_function_schema(&self, allowlist: Option<&[String]>) -> Vec<Value> {
        self.tool_definitions()
            .iter()
            .filter(|def| match allowlist {
                Some(names) => names.iter().any(|n| n == def.name()),
                None => true,
            })
            .map(|def| def.to_function_schema())
            .collect()
    }

    pub fn definition(&self, name: &str) -> Option<ToolDefinition> {
        self.tool_definitions().into_iter().find(|d| d.name() == name)
    }

    pub fn origin(&self, name: &str) -> Option<ToolOrigin> {
        self.definition(name).map(|d| d.origin())
    }

    /// Dispatch a builtin tool call. Remote-process and webhook calls are
    /// handled by the orchestrator through `remote_tool`, since they need
    /// network transport state this registry doesn't hold.
    pub async fn execute_builtin(&self, tool_call: &ToolCall) -> ToolResult {
        let Some(tool) = self.builtins.get(&tool_call.name) else {
            return ToolResult::failure(
                &tool_call.id,
                format!("builtin tool not found: {}", tool_call.name),
            );
        };
        let result = tool.execute(tool_call.arguments.clone()).await;
        result.into_tool_result(&tool_call.id, &tool_call.name)
    }

    /// Same as `execute_builtin`, but gives the tool caller identity and
    /// storage access via `ToolContext`.
    pub async fn execute_builtin_with_context(
        &self,
        tool_call: &ToolCall,
        context: &ToolContext,
    ) -> ToolResult {
        let Some(tool) = self.builtins.get(&tool_call.name) else {
            return ToolResult::failure(
                &tool_call.id,
                format!("builtin tool not found: {}", tool_call.name),
            );
        };
        let result = tool
            .execute_with_context(tool_call.arguments.clone(), context)
            .await;
        result.into_tool_result(&tool_call.id, &tool_call.name)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("builtins", &self.builtins.keys().collect::<Vec<_>>())
            .field("remote_servers", &self.remote.keys().collect::<Vec<_>>())
            .field("webhooks", &self.webhooks.len())
            .finish()
    }
}

// ============================================================================
// Built-in tools
// ============================================================================

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time in ISO 8601 format."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        ToolExecutionResult::success(serde_json::json!({
            "datetime": chrono::Utc::now().to_rfc3339()
        }))
    }
}

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo back the provided text."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"}
            },
            "required": ["text"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let text = arguments.get("text").and_then(|v| v.as_str()).unwrap_or("");
        ToolExecutionResult::success(serde_json::json!({ "text": text }))
    }
}

/// Populate a registry with the process-wide built-ins.
pub fn register_default_builtins(registry: &mut ToolRegistry) {
    registry.register_builtin(CurrentTimeTool);
    registry.register_builtin(EchoTool);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_current_time_tool() {
        let tool = CurrentTimeTool;
        let result = tool.execute(serde_json::json!({})).await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_echo_tool() {
        let tool = EchoTool;
        let result = tool.execute(serde_json::json!({"text": "hi"})).await;
        match result {
            ToolExecutionResult::Success(value) => assert_eq!(value["text"], "hi"),
            _ => panic!("expected success"),
        }
    }

    #[test]
    fn test_registry_partitions_are_independent() {
        let mut registry = ToolRegistry::new();
        register_default_builtins(&mut registry);

        registry.set_remote_tools(
            "srv_1",
            vec![RemoteProcessTool {
                name: "search_docs".into(),
                description: "Search docs".into(),
                parameters: serde_json::json!({"type": "object"}),
                server_id: "srv_1".into(),
                policy: ToolPolicy::Auto,
            }],
        );

        assert!(registry.has("current_time"));
        assert!(registry.has("search_docs"));
        assert_eq!(registry.len(), 3);

        registry.clear_user_tools();
        assert!(registry.has("current_time"));
        assert!(!registry.has("search_docs"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_set_remote_tools_replaces_prior_set() {
        let mut registry = ToolRegistry::new();
        registry.set_remote_tools(
            "srv_1",
            vec![RemoteProcessTool {
                name: "old_tool".into(),
                description: "old".into(),
                parameters: serde_json::json!({}),
                server_id: "srv_1".into(),
                policy: ToolPolicy::Auto,
            }],
        );
        registry.set_remote_tools("srv_1", vec![]);
        assert!(!registry.has("old_tool"));
    }

    #[test]
    fn test_to_function_schema_allowlist() {
        let mut registry = ToolRegistry::new();
        register_default_builtins(&mut registry);

        let all = registry.to_function_schema(None);
        assert_eq!(all.len(), 2);

        let filtered = registry.to_function_schema(Some(&["echo".to_string()]));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0]["function"]["name"], "echo");
    }

    #[tokio::test]
    async fn test_execute_builtin_unknown_tool() {
        let registry = ToolRegistry::new();
        let call = ToolCall {
            id: "call_1".into(),
            name: "nonexistent".into(),
            arguments: serde_json::json!({}),
        };
        let result = registry.execute_builtin(&call).await;
        assert!(!result.is_success());
    }

    struct WhoAmITool;

    #[async_trait]
    impl Tool for WhoAmITool {
        fn name(&self) -> &str {
            "whoami"
        }

        fn description(&self) -> &str {
            "Return the caller's user id from the tool context."
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
            ToolExecutionResult::tool_error("no context available")
        }

        async fn execute_with_context(&self, _arguments: Value, context: &ToolContext) -> ToolExecutionResult {
            ToolExecutionResult::success(serde_json::json!({ "user_id": context.user_id }))
        }
    }

    #[tokio::test]
    async fn test_execute_builtin_with_context_uses_override() {
        let mut registry = ToolRegistry::new();
        registry.register_builtin(WhoAmITool);

        let call = ToolCall {
            id: "call_1".into(),
            name: "whoami".into(),
            arguments: serde_json::json!({}),
        };
        let context = ToolContext::new("user_42", "req_1", Arc::new(()));

        let result = registry.execute_builtin_with_context(&call, &context).await;
        assert!(result.is_success());
        assert_eq!(result.result.unwrap()["user_id"], "user_42");
    }

    #[tokio::test]
    async fn test_execute_builtin_without_context_falls_back_to_plain_execute() {
        let mut registry = ToolRegistry::new();
        registry.register_builtin(WhoAmITool);

        let call = ToolCall {
            id: "call_1".into(),
            name: "whoami".into(),
            arguments: serde_json::json!({}),
        };

        let result = registry.execute_builtin(&call).await;
        assert!(!result.is_success());
    }
}
