// OpenAI-compatible chat-completions provider.
//
// SSE chunks of `choices[0].delta.{content, reasoning_content, tool_calls}`
// terminated by a `data: [DONE]` marker. Tool-call deltas are accumulated
// per-index and only parsed into whole tool calls when the stream itself
// ends, never at the first `finish_reason` sighting (see orchestrator
// design notes on the original's `deepseek.py` assembly pattern).

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::llm::{
    role_label, DoneMetadata, LlmCallConfig, LlmProvider, LlmResponseStream, LlmStreamEvent, Usage,
};
use crate::message::Message;
use relay_contracts::tools::{ToolCall, ToolDefinition};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    api_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: api_url.into(),
        }
    }

    pub fn with_default_url(api_key: impl Into<String>) -> Self {
        Self::new(api_key, DEFAULT_API_URL.to_string())
    }

    fn convert_message(msg: &Message) -> OpenAiMessage {
        OpenAiMessage {
            role: role_label(msg.role).to_string(),
            content: if msg.content.is_empty() && msg.has_tool_calls() {
                None
            } else {
                Some(msg.content.clone())
            },
            tool_calls: msg.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|tc| OpenAiToolCall {
                        id: tc.id.clone(),
                        r#type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: tc.name.clone(),
                            arguments: serde_json::to_string(&tc.arguments).unwrap_or_default(),
                        },
                    })
                    .collect()
            }),
            tool_call_id: msg.tool_call_id.clone(),
        }
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<OpenAiTool> {
        tools
            .iter()
            .map(|tool| OpenAiTool {
                r#type: "function".to_string(),
                function: OpenAiFunction {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters().clone(),
                },
            })
            .collect()
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat_completion_stream(
        &self,
        messages: &[Message],
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream> {
        let openai_messages: Vec<OpenAiMessage> =
            messages.iter().map(Self::convert_message).collect();

        let tools = if config.tools.is_empty() {
            None
        } else {
            Some(Self::convert_tools(&config.tools))
        };

        let request = OpenAiRequest {
            model: config.model.clone(),
            messages: openai_messages,
            stream: true,
            tools,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::llm(format!("failed to send request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::llm(format!("OpenAI API error ({status}): {error_text}")));
        }

        let model = config.model.clone();
        let event_stream = response.bytes_stream().eventsource();
        let acc = Arc::new(Mutex::new(Accumulator::new(model)));

        let converted: LlmResponseStream = Box::pin(event_stream.filter_map(move |result| {
            let acc = Arc::clone(&acc);
            async move {
                match result {
                    Ok(event) => {
                        if event.data == "[DONE]" {
                            let metadata = acc.lock().unwrap().finish();
                            return Some(Ok(LlmStreamEvent::Done(metadata)));
                        }
                        match serde_json::from_str::<OpenAiStreamChunk>(&event.data) {
                            Ok(chunk) => acc.lock().unwrap().ingest(chunk),
                            Err(e) => Some(Ok(LlmStreamEvent::Error(format!(
                                "failed to parse stream chunk: {e}"
                            )))),
                        }
                    }
                    Err(e) => Some(Ok(LlmStreamEvent::Error(format!("stream error: {e}")))),
                }
            }
        }));

        Ok(converted)
    }
}

/// Accumulates tool-call deltas across chunks and flushes only once, when
/// the provider signals the stream's end.
struct Accumulator {
    model: String,
    reasoning: String,
    content: String,
    tool_calls: BTreeMap<u32, PartialToolCall>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl Accumulator {
    fn new(model: String) -> Self {
        Self {
            model,
            reasoning: String::new(),
            content: String::new(),
            tool_calls: BTreeMap::new(),
            finish_reason: None,
            usage: None,
        }
    }

    fn ingest(&mut self, chunk: OpenAiStreamChunk) -> Option<Result<LlmStreamEvent>> {
        if let Some(usage) = chunk.usage {
            self.usage = Some(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
                reasoning_tokens: usage
                    .completion_tokens_details
                    .and_then(|d| d.reasoning_tokens),
            });
        }

        let choice = chunk.choices.first()?;

        if let Some(reason) = &choice.finish_reason {
            self.finish_reason = Some(reason.clone());
        }

        if let Some(reasoning) = &choice.delta.reasoning_content {
            if !reasoning.is_empty() {
                self.reasoning.push_str(reasoning);
                return Some(Ok(LlmStreamEvent::Reasoning(reasoning.clone())));
            }
        }

        if let Some(tool_calls) = &choice.delta.tool_calls {
            for tc in tool_calls {
                let entry = self.tool_calls.entry(tc.index).or_default();
                if let Some(id) = &tc.id {
                    entry.id = id.clone();
                }
                if let Some(function) = &tc.function {
                    if let Some(name) = &function.name {
                        entry.name.push_str(name);
                    }
                    if let Some(args) = &function.arguments {
                        entry.arguments.push_str(args);
                    }
                }
            }
            return None;
        }

        if let Some(content) = &choice.delta.content {
            if !content.is_empty() {
                self.content.push_str(content);
                return Some(Ok(LlmStreamEvent::Content(content.clone())));
            }
        }

        None
    }

    fn finish(&mut self) -> DoneMetadata {
        let tool_calls = std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(|partial| ToolCall {
                id: partial.id,
                name: partial.name,
                arguments: serde_json::from_str(&partial.arguments).unwrap_or(json!({})),
            })
            .collect();

        DoneMetadata {
            reasoning: (!self.reasoning.is_empty()).then(|| self.reasoning.clone()),
            content: self.content.clone(),
            usage: self.usage,
            model: self.model.clone(),
            finish_reason: self.finish_reason.clone().unwrap_or_else(|| "stop".to_string()),
            tool_calls,
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    id: String,
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<OpenAiStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
    #[serde(default)]
    completion_tokens_details: Option<OpenAiCompletionTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct OpenAiCompletionTokensDetails {
    #[serde(default)]
    reasoning_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_flushes_tool_calls_only_at_finish() {
        let mut acc = Accumulator::new("gpt-4o-mini".to_string());

        let chunk: OpenAiStreamChunk = serde_json::from_value(json!({
            "choices": [{
                "delta": {"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "echo", "arguments": "{\"x\":"}}]},
                "finish_reason": null
            }]
        }))
        .unwrap();
        assert!(acc.ingest(chunk).is_none());

        let chunk: OpenAiStreamChunk = serde_json::from_value(json!({
            "choices": [{
                "delta": {"tool_calls": [{"index": 0, "function": {"arguments": "1}"}}]},
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();
        assert!(acc.ingest(chunk).is_none());

        let metadata = acc.finish();
        assert_eq!(metadata.finish_reason, "tool_calls");
        assert_eq!(metadata.tool_calls.len(), 1);
        assert_eq!(metadata.tool_calls[0].name, "echo");
        assert_eq!(metadata.tool_calls[0].arguments, json!({"x": 1}));
    }

    #[test]
    fn test_accumulator_separates_reasoning_from_content() {
        let mut acc = Accumulator::new("deepseek-reasoner".to_string());

        let chunk: OpenAiStreamChunk = serde_json::from_value(json!({
            "choices": [{"delta": {"reasoning_content": "thinking..."}, "finish_reason": null}]
        }))
        .unwrap();
        assert!(matches!(
            acc.ingest(chunk),
            Some(Ok(LlmStreamEvent::Reasoning(_)))
        ));

        let chunk: OpenAiStreamChunk = serde_json::from_value(json!({
            "choices": [{"delta": {"content": "answer"}, "finish_reason": "stop"}]
        }))
        .unwrap();
        assert!(matches!(
            acc.ingest(chunk),
            Some(Ok(LlmStreamEvent::Content(_)))
        ));

        let metadata = acc.finish();
        assert_eq!(metadata.reasoning.as_deref(), Some("thinking..."));
        assert_eq!(metadata.content, "answer");
    }
}
