// Context Assembler
//
// Fans out the independent lookups a turn needs before the first LLM call:
// memory recall, passage retrieval, a history slice, and the tool catalogue.
// Memory recall and passage retrieval are wrapped so any failure or timeout
// degrades to an empty result rather than failing the turn.

use async_trait::async_trait;
use relay_contracts::events::{MemoryRecallData, MemoryItem, PreferenceItem, RagSourceItem};
use std::time::Duration;

use crate::message::Message;

/// Recalls memories and stated preferences for a user, and submits turns for
/// asynchronous memory write-back. An adjacent subsystem; this crate only
/// defines the shape and an always-empty fake.
#[async_trait]
pub trait MemoryClient: Send + Sync {
    async fn search_memory(&self, user_id: &str, query: &str) -> anyhow::Result<MemoryRecallData>;

    /// Submits a turn's messages for background memory extraction. Returns
    /// the write-back service's task id, if any — the caller never waits for
    /// the task to complete.
    async fn save(
        &self,
        user_id: &str,
        conversation_id: &str,
        messages: &[Message],
    ) -> anyhow::Result<Option<String>>;
}

/// Retrieves top-k passages from a vector store, optionally reranked. An
/// adjacent subsystem; this crate only defines the shape and an
/// always-empty fake.
#[async_trait]
pub trait RagRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        collection_names: &[String],
        top_k: usize,
    ) -> anyhow::Result<Vec<RagSourceItem>>;
}

/// Always returns an empty recall; stands in for the real memory service.
#[derive(Default)]
pub struct NullMemoryClient {
    fixed: Option<MemoryRecallData>,
}

impl NullMemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fixed_response(data: MemoryRecallData) -> Self {
        Self { fixed: Some(data) }
    }
}

#[async_trait]
impl MemoryClient for NullMemoryClient {
    async fn search_memory(&self, _user_id: &str, _query: &str) -> anyhow::Result<MemoryRecallData> {
        Ok(self.fixed.clone().unwrap_or_default())
    }

    async fn save(
        &self,
        _user_id: &str,
        _conversation_id: &str,
        _messages: &[Message],
    ) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// Always returns no passages; stands in for the real vector store.
#[derive(Default)]
pub struct NullRagRetriever {
    fixed: Option<Vec<RagSourceItem>>,
}

impl NullRagRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fixed_response(items: Vec<RagSourceItem>) -> Self {
        Self { fixed: Some(items) }
    }
}

#[async_trait]
impl RagRetriever for NullRagRetriever {
    async fn retrieve(
        &self,
        _query: &str,
        _collection_names: &[String],
        _top_k: usize,
    ) -> anyhow::Result<Vec<RagSourceItem>> {
        Ok(self.fixed.clone().unwrap_or_default())
    }
}

/// The four independent outputs a turn needs before calling the LLM.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub memory: MemoryRecallData,
    pub rag_sources: Vec<RagSourceItem>,
    pub history: Vec<Message>,
    pub system_prompt: String,
}

pub const DEFAULT_SYSTEM_PREAMBLE: &str =
    "You are a helpful assistant. Use the tools available to you when they would help answer the user's request.";

/// Recalls memory with a timeout, retrieves passages (if any knowledge-base
/// ids are configured), slices recent history, and composes the system
/// prompt — concurrently where the underlying calls allow it.
pub async fn assemble_context(
    memory_client: &dyn MemoryClient,
    rag_retriever: &dyn RagRetriever,
    user_id: &str,
    query: &str,
    collection_names: &[String],
    full_history: &[Message],
    history_size: usize,
    memory_recall_timeout: Duration,
    rag_top_k: usize,
) -> AssembledContext {
    let memory_fut = recall_with_timeout(memory_client, user_id, query, memory_recall_timeout);
    let rag_fut = retrieve_with_fallback(rag_retriever, query, collection_names, rag_top_k);

    let (memory, rag_sources) = tokio::join!(memory_fut, rag_fut);

    let history = recent_history(full_history, history_size);
    let system_prompt = build_system_prompt(&memory, &rag_sources);

    AssembledContext {
        memory,
        rag_sources,
        history,
        system_prompt,
    }
}

async fn recall_with_timeout(
    client: &dyn MemoryClient,
    user_id: &str,
    query: &str,
    timeout: Duration,
) -> MemoryRecallData {
    match tokio::time::timeout(timeout, client.search_memory(user_id, query)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "memory recall failed, degrading to empty");
            MemoryRecallData::default()
        }
        Err(_) => {
            tracing::warn!(timeout_secs = timeout.as_secs(), "memory recall timed out, degrading to empty");
            MemoryRecallData::default()
        }
    }
}

async fn retrieve_with_fallback(
    retriever: &dyn RagRetriever,
    query: &str,
    collection_names: &[String],
    top_k: usize,
) -> Vec<RagSourceItem> {
    if collection_names.is_empty() {
        return Vec::new();
    }
    match retriever.retrieve(query, collection_names, top_k).await {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!(error = %e, "passage retrieval failed, degrading to empty");
            Vec::new()
        }
    }
}

fn recent_history(full_history: &[Message], n: usize) -> Vec<Message> {
    let start = full_history.len().saturating_sub(n);
    full_history[start..].to_vec()
}

fn build_system_prompt(memory: &MemoryRecallData, rag_sources: &[RagSourceItem]) -> String {
    let mut parts = vec![DEFAULT_SYSTEM_PREAMBLE.to_string()];

    if !memory.memories.is_empty() || !memory.preferences.is_empty() {
        parts.push(build_memory_block(memory));
    }

    if !rag_sources.is_empty() {
        parts.push(build_passages_block(rag_sources));
    }

    parts.join("\n\n")
}

fn build_memory_block(memory: &MemoryRecallData) -> String {
    let mut lines = vec!["## Known facts about this user".to_string()];
    for MemoryItem { content, .. } in &memory.memories {
        lines.push(format!("- {content}"));
    }
    if !memory.preferences.is_empty() {
        lines.push("## Stated preferences".to_string());
        for PreferenceItem { content, .. } in &memory.preferences {
            lines.push(format!("- {content}"));
        }
    }
    lines.join("\n")
}

fn build_passages_block(sources: &[RagSourceItem]) -> String {
    let mut lines = vec!["## Reference material\nCite these sources where relevant.".to_string()];
    for (i, source) in sources.iter().enumerate() {
        let mut loc = source.source.clone();
        if let Some(page) = source.page {
            loc.push_str(&format!(" (page {page})"));
        }
        lines.push(format!("[{}] {}\n— source: {}", i + 1, source.content, loc));
    }
    lines.join("\n")
}
