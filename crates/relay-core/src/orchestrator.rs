// Orchestrator Loop
//
// The bounded tool-calling state machine driving one turn: round cap,
// per-chunk event emission, tool-call dispatch across the three origins,
// and the message-list invariant that every tool entry is preceded by the
// assistant entry whose tool-call list names the same id.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;

use relay_contracts::events::{
    ChatEvent, ToolCallEventData, ToolCallStatus, ToolResultEventData, ToolResultStatus, UsageInfo,
};
use relay_contracts::tools::{ToolCall, ToolDefinition, ToolOrigin, ToolResult};

use crate::error::Result;
use crate::llm::{LlmCallConfig, LlmProvider, LlmStreamEvent, Usage};
use crate::message::Message;
use crate::remote_tool::{RemoteServerResolver, RemoteToolAdapter};
use crate::tools::{ToolContext, ToolRegistry};

/// Truncation cap applied to tool result text fed back into the
/// conversation and shown in `tool_result` events, keeping a single noisy
/// tool from blowing the context window.
const TOOL_RESULT_CAP: usize = 4096;

/// What the turn produced, handed to the persistence writer.
pub struct TurnOutcome {
    pub messages: Vec<Message>,
    pub usage: Option<Usage>,
    pub model: String,
    pub tool_calls_log: Vec<ToolCall>,
    /// False when the stream ended in an error or a client disconnect
    /// before any assistant content was produced — the caller should skip
    /// writing an assistant message in that case.
    pub assistant_produced: bool,
}

pub struct Orchestrator {
    llm_provider: Arc<dyn LlmProvider>,
    tool_registry: Arc<ToolRegistry>,
    remote_resolver: Arc<dyn RemoteServerResolver>,
    http: reqwest::Client,
    max_tool_rounds: u32,
    remote_tool_call_timeout: Duration,
    tool_context: Option<ToolContext>,
}

impl Orchestrator {
    pub fn new(
        llm_provider: Arc<dyn LlmProvider>,
        tool_registry: Arc<ToolRegistry>,
        remote_resolver: Arc<dyn RemoteServerResolver>,
        max_tool_rounds: u32,
        remote_tool_call_timeout: Duration,
    ) -> Self {
        Self {
            llm_provider,
            tool_registry,
            remote_resolver,
            http: reqwest::Client::new(),
            max_tool_rounds,
            remote_tool_call_timeout,
            tool_context: None,
        }
    }

    /// Attaches caller identity/storage access, used for builtin tools that
    /// act on the caller's behalf. Without this, builtins only ever see
    /// `execute`, never `execute_with_context`.
    pub fn with_tool_context(mut self, tool_context: ToolContext) -> Self {
        self.tool_context = Some(tool_context);
        self
    }

    /// Runs the bounded round loop for one turn, writing events to `events`
    /// as they're produced. `messages` is the fully-assembled working list
    /// (system prompt + history + the user's turn) on entry.
    pub async fn run_turn(
        &self,
        mut messages: Vec<Message>,
        config: LlmCallConfig,
        events: mpsc::Sender<ChatEvent>,
    ) -> Result<TurnOutcome> {
        let mut round = 0u32;
        let mut last_usage: Option<Usage> = None;
        let mut last_model = config.model.clone();
        let mut tool_calls_log: Vec<ToolCall> = Vec::new();

        loop {
            if round >= self.max_tool_rounds {
                tracing::warn!(round, "tool round cap reached, forcing done");
                let _ = events
                    .send(ChatEvent::Done {
                        usage: usage_info(last_usage),
                        model: last_model.clone(),
                    })
                    .await;
                break;
            }

            let mut stream = match self.llm_provider.chat_completion_stream(&messages, &config).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!(error = %e, round, "llm stream failed to start");
                    let _ = events.send(ChatEvent::Error { data: e.to_string() }).await;
                    return Ok(TurnOutcome {
                        messages,
                        usage: last_usage,
                        model: last_model,
                        tool_calls_log,
                        assistant_produced: false,
                    });
                }
            };

            let mut round_content = String::new();
            let mut round_reasoning = String::new();
            let mut terminal: Option<std::result::Result<crate::llm::DoneMetadata, String>> = None;

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(LlmStreamEvent::Reasoning(delta)) => {
                        round_reasoning.push_str(&delta);
                        if events.send(ChatEvent::Reasoning { data: delta }).await.is_err() {
                            return Ok(disconnected_outcome(messages, last_usage, last_model, tool_calls_log));
                        }
                    }
                    Ok(LlmStreamEvent::Content(delta)) => {
                        round_content.push_str(&delta);
                        if events.send(ChatEvent::Content { data: delta }).await.is_err() {
                            return Ok(disconnected_outcome(messages, last_usage, last_model, tool_calls_log));
                        }
                    }
                    Ok(LlmStreamEvent::Done(meta)) => {
                        terminal = Some(Ok(meta));
                        break;
                    }
                    Ok(LlmStreamEvent::Error(msg)) => {
                        terminal = Some(Err(msg));
                        break;
                    }
                    Err(e) => {
                        terminal = Some(Err(e.to_string()));
                        break;
                    }
                }
            }

            let meta = match terminal {
                Some(Ok(meta)) => meta,
                Some(Err(msg)) => {
                    tracing::error!(error = %msg, round, "llm stream error");
                    let _ = events.send(ChatEvent::Error { data: msg }).await;
                    return Ok(TurnOutcome {
                        messages,
                        usage: last_usage,
                        model: last_model,
                        tool_calls_log,
                        assistant_produced: false,
                    });
                }
                None => {
                    tracing::error!(round, "llm stream ended without a terminal chunk");
                    let _ = events
                        .send(ChatEvent::Error {
                            data: "LLM stream ended unexpectedly".to_string(),
                        })
                        .await;
                    return Ok(TurnOutcome {
                        messages,
                        usage: last_usage,
                        model: last_model,
                        tool_calls_log,
                        assistant_produced: false,
                    });
                }
            };

            last_usage = meta.usage;
            last_model = meta.model.clone();

            let reasoning = if round_reasoning.is_empty() { None } else { Some(round_reasoning) };
            let has_tool_calls = meta.finish_reason == "tool_calls" && !meta.tool_calls.is_empty();

            if has_tool_calls {
                messages.push(Message::assistant_with_tool_calls(
                    round_content,
                    reasoning,
                    meta.tool_calls.clone(),
                ));

                for call in &meta.tool_calls {
                    if events
                        .send(ChatEvent::ToolCall {
                            data: ToolCallEventData {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                                status: ToolCallStatus::Calling,
                            },
                        })
                        .await
                        .is_err()
                    {
                        return Ok(disconnected_outcome(messages, last_usage, last_model, tool_calls_log));
                    }

                    let result = self.dispatch(call).await;
                    let capped_text = cap_text(&result.as_text(), TOOL_RESULT_CAP);
                    messages.push(Message::tool_result(call.id.clone(), capped_text));

                    let result_event = if result.is_success() {
                        ToolResultEventData {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            status: ToolResultStatus::Success,
                            result: result.result.clone().map(|v| cap_json(v, TOOL_RESULT_CAP)),
                            error: None,
                        }
                    } else {
                        ToolResultEventData {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            status: ToolResultStatus::Error,
                            result: None,
                            error: result.error.clone().map(|e| cap_text(&e, TOOL_RESULT_CAP)),
                        }
                    };

                    if events
                        .send(ChatEvent::ToolResult { data: result_event })
                        .await
                        .is_err()
                    {
                        return Ok(disconnected_outcome(messages, last_usage, last_model, tool_calls_log));
                    }

                    tool_calls_log.push(call.clone());
                }

                round += 1;
                continue;
            }

            messages.push(Message::assistant(round_content, reasoning));
            let _ = events
                .send(ChatEvent::Done {
                    usage: usage_info(last_usage),
                    model: last_model.clone(),
                })
                .await;
            break;
        }

        Ok(TurnOutcome {
            messages,
            usage: last_usage,
            model: last_model,
            tool_calls_log,
            assistant_produced: true,
        })
    }

    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        match self.tool_registry.origin(&call.name) {
            Some(ToolOrigin::Builtin) => match &self.tool_context {
                Some(ctx) => self.tool_registry.execute_builtin_with_context(call, ctx).await,
                None => self.tool_registry.execute_builtin(call).await,
            },
            Some(ToolOrigin::RemoteProcess { server_id }) => self.dispatch_remote(&server_id, call).await,
            Some(ToolOrigin::Webhook { tool_id }) => self.dispatch_webhook(&tool_id, call).await,
            None => ToolResult::failure(&call.id, format!("unknown tool: {}", call.name)),
        }
    }

    async fn dispatch_remote(&self, server_id: &str, call: &ToolCall) -> ToolResult {
        let transport = match self.remote_resolver.resolve(server_id).await {
            Ok(t) => t,
            Err(e) => return ToolResult::failure(&call.id, e.to_string()),
        };

        let adapter = RemoteToolAdapter::new(transport, self.remote_tool_call_timeout);
        match adapter.call_tool(&call.name, call.arguments.clone()).await {
            Ok(text) => ToolResult::success(&call.id, serde_json::Value::String(text)),
            Err(e) => ToolResult::failure(&call.id, e.to_string()),
        }
    }

    async fn dispatch_webhook(&self, tool_id: &str, call: &ToolCall) -> ToolResult {
        let Some(ToolDefinition::Webhook(tool)) = self.tool_registry.definition(&call.name) else {
            return ToolResult::failure(&call.id, format!("webhook tool record not found: {tool_id}"));
        };

        match crate::webhook::invoke(&self.http, &tool, &call.arguments).await {
            Ok(body) => ToolResult::success(&call.id, serde_json::Value::String(body)),
            Err(e) => ToolResult::failure(&call.id, e.to_string()),
        }
    }
}

fn disconnected_outcome(
    messages: Vec<Message>,
    usage: Option<Usage>,
    model: String,
    tool_calls_log: Vec<ToolCall>,
) -> TurnOutcome {
    tracing::info!("client disconnected mid-turn, abandoning remaining work");
    TurnOutcome {
        messages,
        usage,
        model,
        tool_calls_log,
        assistant_produced: false,
    }
}

fn usage_info(usage: Option<Usage>) -> UsageInfo {
    match usage {
        Some(u) => UsageInfo {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
            reasoning_tokens: u.reasoning_tokens,
        },
        None => UsageInfo::default(),
    }
}

fn cap_text(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &text[..end])
}

fn cap_json(value: serde_json::Value, cap: usize) -> serde_json::Value {
    let text = value.to_string();
    if text.len() <= cap {
        value
    } else {
        serde_json::Value::String(cap_text(&text, cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DEFAULT_SYSTEM_PREAMBLE;
    use crate::llm::{DoneMetadata, LlmResponseStream};
    use crate::remote_tool::NullRemoteServerResolver;
    use crate::tools::{register_default_builtins, ToolRegistry};
    use async_trait::async_trait;
    use futures::stream;

    struct ScriptedProvider {
        rounds: std::sync::Mutex<Vec<Vec<LlmStreamEvent>>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat_completion_stream(
            &self,
            _messages: &[Message],
            _config: &LlmCallConfig,
        ) -> Result<LlmResponseStream> {
            let mut rounds = self.rounds.lock().unwrap();
            let round = rounds.remove(0);
            let items: Vec<Result<LlmStreamEvent>> = round.into_iter().map(Ok).collect();
            Ok(Box::pin(stream::iter(items)))
        }
    }

    fn done(content: &str, finish_reason: &str, tool_calls: Vec<ToolCall>) -> LlmStreamEvent {
        LlmStreamEvent::Done(DoneMetadata {
            reasoning: None,
            content: content.to_string(),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
                reasoning_tokens: None,
            }),
            model: "test-model".to_string(),
            finish_reason: finish_reason.to_string(),
            tool_calls,
        })
    }

    #[tokio::test]
    async fn test_plain_turn_emits_content_then_done() {
        let provider = Arc::new(ScriptedProvider {
            rounds: std::sync::Mutex::new(vec![vec![
                LlmStreamEvent::Content("hello".to_string()),
                done("hello", "stop", vec![]),
            ]]),
        });

        let mut registry = ToolRegistry::new();
        register_default_builtins(&mut registry);

        let orchestrator = Orchestrator::new(
            provider,
            Arc::new(registry),
            Arc::new(NullRemoteServerResolver),
            10,
            Duration::from_secs(5),
        );

        let (tx, mut rx) = mpsc::channel(32);
        let messages = vec![Message::system(DEFAULT_SYSTEM_PREAMBLE), Message::user("hi")];
        let config = LlmCallConfig {
            model: "test-model".into(),
            thinking_enabled: false,
            tools: vec![],
        };

        let outcome = orchestrator.run_turn(messages, config, tx).await.unwrap();
        drop(outcome);

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }

        assert_eq!(received.len(), 2);
        assert!(matches!(received[0], ChatEvent::Content { .. }));
        assert!(matches!(received[1], ChatEvent::Done { .. }));
    }

    #[tokio::test]
    async fn test_single_tool_round_dispatches_echo() {
        let tool_call = ToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            arguments: serde_json::json!({"text": "hi"}),
        };

        let provider = Arc::new(ScriptedProvider {
            rounds: std::sync::Mutex::new(vec![
                vec![done("", "tool_calls", vec![tool_call.clone()])],
                vec![LlmStreamEvent::Content("ok".to_string()), done("ok", "stop", vec![])],
            ]),
        });

        let mut registry = ToolRegistry::new();
        register_default_builtins(&mut registry);

        let orchestrator = Orchestrator::new(
            provider,
            Arc::new(registry),
            Arc::new(NullRemoteServerResolver),
            10,
            Duration::from_secs(5),
        );

        let (tx, mut rx) = mpsc::channel(32);
        let messages = vec![Message::system(DEFAULT_SYSTEM_PREAMBLE), Message::user("echo hi")];
        let config = LlmCallConfig {
            model: "test-model".into(),
            thinking_enabled: false,
            tools: vec![],
        };

        let outcome = orchestrator.run_turn(messages, config, tx).await.unwrap();

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }

        assert!(matches!(received[0], ChatEvent::ToolCall { .. }));
        assert!(matches!(received[1], ChatEvent::ToolResult { .. }));
        assert!(matches!(received[2], ChatEvent::Content { .. }));
        assert!(matches!(received[3], ChatEvent::Done { .. }));

        assert_eq!(outcome.tool_calls_log.len(), 1);
        assert!(outcome
            .messages
            .iter()
            .any(|m| m.tool_call_id.as_deref() == Some("call_1")));
    }

    #[tokio::test]
    async fn test_round_cap_forces_done() {
        let looping_call = ToolCall {
            id: "call_x".into(),
            name: "echo".into(),
            arguments: serde_json::json!({"text": "again"}),
        };

        let rounds: Vec<Vec<LlmStreamEvent>> = (0..10)
            .map(|_| vec![done("", "tool_calls", vec![looping_call.clone()])])
            .collect();

        let provider = Arc::new(ScriptedProvider {
            rounds: std::sync::Mutex::new(rounds),
        });

        let mut registry = ToolRegistry::new();
        register_default_builtins(&mut registry);

        let orchestrator = Orchestrator::new(
            provider,
            Arc::new(registry),
            Arc::new(NullRemoteServerResolver),
            10,
            Duration::from_secs(5),
        );

        let (tx, mut rx) = mpsc::channel(256);
        let messages = vec![Message::system(DEFAULT_SYSTEM_PREAMBLE), Message::user("loop forever")];
        let config = LlmCallConfig {
            model: "test-model".into(),
            thinking_enabled: false,
            tools: vec![],
        };

        orchestrator.run_turn(messages, config, tx).await.unwrap();

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }

        assert!(matches!(received.last().unwrap(), ChatEvent::Done { .. }));
    }

    #[test]
    fn test_cap_text_truncates_on_char_boundary() {
        let long = "a".repeat(5000);
        let capped = cap_text(&long, 100);
        assert!(capped.len() <= 100 + "... [truncated]".len());
        assert!(capped.ends_with("[truncated]"));
    }
}
