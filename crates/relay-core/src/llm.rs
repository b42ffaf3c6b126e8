// LLM Stream Adapter
//
// The only place that speaks a specific provider's wire format. Exposes one
// streaming operation yielding reasoning/content deltas and a single
// terminal `Done` chunk carrying usage, finish reason, and fully-accumulated
// tool calls.

use async_trait::async_trait;
use futures::Stream;
use relay_contracts::tools::{ToolCall, ToolDefinition};
use std::pin::Pin;

use crate::error::Result;
use crate::message::{Message, MessageRole};

pub type LlmResponseStream = Pin<Box<dyn Stream<Item = Result<LlmStreamEvent>> + Send>>;

/// One chunk of an LLM stream response.
#[derive(Debug, Clone)]
pub enum LlmStreamEvent {
    /// Chain-of-thought delta, only produced when reasoning mode is on and
    /// the provider exposes a dedicated reasoning field.
    Reasoning(String),
    /// Final-answer text delta.
    Content(String),
    /// Terminal chunk. Fires exactly once; anything the provider sends after
    /// this is discarded by the adapter.
    Done(DoneMetadata),
    Error(String),
}

#[derive(Debug, Clone, Default)]
pub struct DoneMetadata {
    pub reasoning: Option<String>,
    pub content: String,
    pub usage: Option<Usage>,
    pub model: String,
    pub finish_reason: String,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub reasoning_tokens: Option<u32>,
}

/// Configuration for a single LLM call.
#[derive(Debug, Clone)]
pub struct LlmCallConfig {
    pub model: String,
    pub thinking_enabled: bool,
    pub tools: Vec<ToolDefinition>,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat_completion_stream(
        &self,
        messages: &[Message],
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream>;
}

/// Provider-agnostic role label used by wire adapters.
pub fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    }
}
