// Conversation Orchestrator
//
// A bounded tool-calling loop driving one conversation turn against a
// streaming LLM: concurrent context assembly, heterogeneous tool dispatch
// (built-in, remote-process over JSON-RPC, HTTP webhook), and ordered SSE
// event emission.

pub mod context;
pub mod error;
pub mod llm;
pub mod message;
pub mod orchestrator;
pub mod quota;
pub mod remote_tool;
pub mod openai;
pub mod tools;
pub mod webhook;

pub use error::{Error, Result};
pub use message::{Message, MessageRole};
pub use orchestrator::{Orchestrator, TurnOutcome};

pub use llm::{DoneMetadata, LlmCallConfig, LlmProvider, LlmResponseStream, LlmStreamEvent, Usage};

pub use tools::{register_default_builtins, Tool, ToolContext, ToolExecutionResult, ToolRegistry};

pub use context::{assemble_context, AssembledContext, MemoryClient, NullMemoryClient, NullRagRetriever, RagRetriever};

pub use quota::{check_quota, record_usage, InProcessQuotaStore, QuotaStore};

pub use remote_tool::{NullRemoteServerResolver, RemoteServerResolver, RemoteToolAdapter, Transport};

pub use relay_contracts::tools::{ToolCall, ToolDefinition, ToolResult};
