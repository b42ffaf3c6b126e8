// POST /v1/chat — the chat orchestrator's single HTTP surface.
//
// Validates the request, resolves or creates the conversation, checks the
// tenant quota, then streams the turn as `text/event-stream`. The
// orchestrator loop runs in a detached task that owns the event sender; this
// handler only wires up state and turns the receiver into the response body.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use relay_contracts::events::ChatEvent;
use relay_core::context::{assemble_context, AssembledContext, MemoryClient, NullMemoryClient, NullRagRetriever};
use relay_core::llm::LlmCallConfig;
use relay_core::message::Message;
use relay_core::orchestrator::{Orchestrator, TurnOutcome};
use relay_core::quota::{check_quota, record_usage};
use relay_core::tools::{register_default_builtins, ToolContext, ToolRegistry};
use relay_storage::{
    CreateConversation, CreateUsageRecord, DbRemoteServerResolver, MessageRow,
    DEFAULT_CONVERSATION_TITLE,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::tool_catalogue::load_user_tools;
use crate::AppState;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const TITLE_PREFIX_LEN: usize = 50;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatRequest {
    pub conversation_id: Option<String>,
    pub model: Option<String>,
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub thinking_enabled: bool,
    #[serde(default)]
    pub kb_ids: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

/// Streams one conversation turn as `text/event-stream`.
#[utoipa::path(
    post,
    path = "/v1/chat",
    request_body = ChatRequest,
    responses((status = 200, description = "SSE stream of chat events")),
    tag = "chat"
)]
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let tenant_id = tenant_id_from_headers(&headers)?;

    let turn_content = request
        .messages
        .first()
        .map(|m| m.content.trim())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing or empty first message content".into()))?
        .to_string();

    let model = request
        .model
        .clone()
        .unwrap_or_else(|| state.config.default_model.clone());

    let conversation_id = match &request.conversation_id {
        Some(raw) => Some(
            raw.parse::<Uuid>()
                .map_err(|_| ApiError::BadRequest("invalid conversation id".into()))?,
        ),
        None => None,
    };

    let conversation = match conversation_id {
        Some(id) => {
            let row = state
                .db
                .get_conversation(id)
                .await?
                .ok_or_else(|| ApiError::NotFound("conversation not found".into()))?;
            if row.user_id != user_id {
                return Err(ApiError::NotFound("conversation not found".into()));
            }
            row
        }
        None => {
            state
                .db
                .create_conversation(CreateConversation {
                    user_id,
                    tenant_id,
                    title: DEFAULT_CONVERSATION_TITLE.to_string(),
                    model: model.clone(),
                })
                .await?
        }
    };

    let tenant = match conversation.tenant_id {
        Some(tenant_id) => state.db.get_tenant(tenant_id).await?,
        None => None,
    };

    if let Some(tenant) = &tenant {
        if !tenant.model_allowlist.is_empty() && !tenant.model_allowlist.contains(&model) {
            return Err(ApiError::BadRequest(format!("unknown model id: {model}")));
        }
    }

    let tenant_id_str = conversation.tenant_id.map(|id| id.to_string());
    if let Some(tenant) = &tenant {
        check_quota(state.quota_store.as_ref(), tenant_id_str.as_deref(), tenant.quota())
            .await
            .map_err(|e| match e {
                relay_core::Error::QuotaExceeded { used, quota } => {
                    ApiError::QuotaExceeded { used, quota }
                }
                other => ApiError::Internal(other.into()),
            })?;
    }

    let user_message = Message::user(turn_content.clone());
    state
        .db
        .append_messages(conversation.id, std::slice::from_ref(&user_message))
        .await?;

    let history_rows = state
        .db
        .list_recent_messages(conversation.id, state.config.max_tool_rounds as i64 * 4 + 20)
        .await?;
    let full_history: Vec<Message> = history_rows.into_iter().map(MessageRow::into_message).collect();

    let (tx, rx) = mpsc::channel::<ChatEvent>(EVENT_CHANNEL_CAPACITY);

    let app_state = state.clone();
    let conversation_id = conversation.id;
    let turn_model = model.clone();
    let thinking_enabled = request.thinking_enabled;
    let kb_ids = request.kb_ids.clone();
    tokio::spawn(async move {
        run_turn_and_persist(
            app_state,
            conversation_id,
            tenant_id_str,
            turn_model,
            thinking_enabled,
            user_id,
            kb_ids,
            user_message,
            full_history,
            turn_content,
            tx,
        )
        .await;
    });

    let stream = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(event.to_sse_line()));

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream))
        .unwrap())
}

#[allow(clippy::too_many_arguments)]
async fn run_turn_and_persist(
    state: AppState,
    conversation_id: Uuid,
    tenant_id_str: Option<String>,
    model: String,
    thinking_enabled: bool,
    user_id: Uuid,
    kb_ids: Vec<String>,
    user_message: Message,
    full_history: Vec<Message>,
    turn_content: String,
    tx: mpsc::Sender<ChatEvent>,
) {
    if tx
        .send(ChatEvent::Meta { conversation_id })
        .await
        .is_err()
    {
        return;
    }

    let context = assemble_context(
        &NullMemoryClient::new(),
        &NullRagRetriever::new(),
        &user_id.to_string(),
        &turn_content,
        &kb_ids,
        &full_history,
        state.config.history_size,
        state.config.memory_recall_timeout,
        5,
    )
    .await;

    if !context.memory.memories.is_empty() || !context.memory.preferences.is_empty() {
        if tx
            .send(ChatEvent::MemoryRecall {
                data: context.memory.clone(),
            })
            .await
            .is_err()
        {
            return;
        }
    }
    if !context.rag_sources.is_empty() {
        if tx
            .send(ChatEvent::RagSource {
                data: context.rag_sources.clone(),
            })
            .await
            .is_err()
        {
            return;
        }
    }

    let mut working_messages = vec![Message::system(context.system_prompt.clone())];
    working_messages.extend(context.history.clone());
    working_messages.push(user_message);

    let mut registry = ToolRegistry::new();
    register_default_builtins(&mut registry);
    load_user_tools(
        &state.db,
        &state.encryption,
        user_id,
        state.config.remote_tool_discovery_timeout,
        &mut registry,
    )
    .await;

    let remote_resolver = Arc::new(DbRemoteServerResolver::new(
        (*state.db).clone(),
        user_id,
        state.encryption.clone(),
    ));
    let tool_context = ToolContext::new(
        user_id.to_string(),
        conversation_id.to_string(),
        state.db.clone(),
    );

    let orchestrator = Orchestrator::new(
        state.llm_provider.clone(),
        Arc::new(registry.clone()),
        remote_resolver,
        state.config.max_tool_rounds,
        state.config.remote_tool_call_timeout,
    )
    .with_tool_context(tool_context);

    let call_config = LlmCallConfig {
        model: model.clone(),
        thinking_enabled,
        tools: registry.tool_definitions(),
    };

    let mut outcome = match orchestrator.run_turn(working_messages, call_config, tx).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(conversation_id = %conversation_id, error = %e, "turn failed");
            return;
        }
    };

    if !outcome.assistant_produced {
        tracing::info!(conversation_id = %conversation_id, "client disconnected, skipping persistence");
        return;
    }

    attach_turn_metadata(&mut outcome, &context);

    if let Err(e) = persist_turn(&state, conversation_id, tenant_id_str, &outcome, &turn_content).await {
        tracing::error!(conversation_id = %conversation_id, error = %e, "failed to persist turn");
        return;
    }

    let memory_client = NullMemoryClient::new();
    let user_id_str = user_id.to_string();
    let conversation_id_str = conversation_id.to_string();
    let turn_messages = outcome.messages.clone();
    tokio::spawn(async move {
        if let Err(e) = memory_client
            .save(&user_id_str, &conversation_id_str, &turn_messages)
            .await
        {
            tracing::warn!(conversation_id = %conversation_id_str, error = %e, "memory write-back submission failed");
        }
    });
}

/// Attaches a context snapshot (tool invocations, memory hits, retrieval
/// hits) to the turn's final assistant entry, so it's available to anyone
/// reading the conversation back later without re-deriving it.
fn attach_turn_metadata(outcome: &mut TurnOutcome, context: &AssembledContext) {
    if outcome.tool_calls_log.is_empty()
        && context.memory.memories.is_empty()
        && context.memory.preferences.is_empty()
        && context.rag_sources.is_empty()
    {
        return;
    }

    let metadata = serde_json::json!({
        "tool_calls": outcome.tool_calls_log,
        "memory_hits": context.memory.memories.len() + context.memory.preferences.len(),
        "rag_hits": context.rag_sources.len(),
    });

    if let Some(last_assistant) = outcome
        .messages
        .iter_mut()
        .rev()
        .find(|m| m.role == relay_core::message::MessageRole::Assistant)
    {
        last_assistant.metadata = Some(metadata);
    }
}

async fn persist_turn(
    state: &AppState,
    conversation_id: Uuid,
    tenant_id_str: Option<String>,
    outcome: &TurnOutcome,
    turn_content: &str,
) -> anyhow::Result<()> {
    state
        .db
        .append_messages(conversation_id, &outcome.messages)
        .await?;

    let title = title_prefix(turn_content);
    state
        .db
        .touch_conversation(conversation_id, Some(&title))
        .await?;

    if let Some(usage) = &outcome.usage {
        if usage.prompt_tokens != 0 || usage.completion_tokens != 0 {
            let tenant_id = tenant_id_str.as_deref().and_then(|s| s.parse::<Uuid>().ok());
            let conversation_row = state.db.get_conversation(conversation_id).await?;
            let user_id = conversation_row.map(|c| c.user_id);
            if let Some(user_id) = user_id {
                state
                    .db
                    .create_usage_record(CreateUsageRecord {
                        user_id,
                        tenant_id,
                        conversation_id: Some(conversation_id),
                        model: outcome.model.clone(),
                        input_tokens: usage.prompt_tokens as i64,
                        output_tokens: usage.completion_tokens as i64,
                        total_tokens: usage.total_tokens as i64,
                        trigger_type: "chat".to_string(),
                    })
                    .await?;
            }

            record_usage(
                state.quota_store.as_ref(),
                tenant_id_str.as_deref(),
                usage.total_tokens as i64,
            )
            .await?;
        }
    }

    Ok(())
}

fn title_prefix(content: &str) -> String {
    if content.chars().count() <= TITLE_PREFIX_LEN {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(TITLE_PREFIX_LEN).collect();
        format!("{truncated}…")
    }
}

fn user_id_from_headers(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing X-User-Id header".into()))?
        .parse::<Uuid>()
        .map_err(|_| ApiError::BadRequest("invalid X-User-Id header".into()))
}

fn tenant_id_from_headers(headers: &HeaderMap) -> Result<Option<Uuid>, ApiError> {
    match headers.get("x-tenant-id").and_then(|v| v.to_str().ok()) {
        Some(raw) => raw
            .parse::<Uuid>()
            .map(Some)
            .map_err(|_| ApiError::BadRequest("invalid X-Tenant-Id header".into())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_prefix_short_content_unchanged() {
        assert_eq!(title_prefix("hello"), "hello");
    }

    #[test]
    fn test_title_prefix_truncates_long_content() {
        let content = "a".repeat(80);
        let title = title_prefix(&content);
        assert_eq!(title.chars().count(), TITLE_PREFIX_LEN + 1);
        assert!(title.ends_with('…'));
    }
}
