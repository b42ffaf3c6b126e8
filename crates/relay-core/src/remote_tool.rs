// Remote-Tool Adapter
//
// A minimal JSON-RPC 2.0 client for the two transports a user-registered
// tool server can use: a long-lived child process speaking newline-framed
// JSON over stdio, or a Streamable-HTTP endpoint (JSON or SSE response,
// session id carried in a response/request header pair). Both transports
// go through the same `initialize` / `notifications/initialized` handshake
// before `tools/list` or `tools/call` is valid.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Looks up the transport configuration for a user's registered
/// remote-process server by id. An adjacent subsystem (backed by the
/// server-record table in storage); this crate only defines the interface.
#[async_trait]
pub trait RemoteServerResolver: Send + Sync {
    async fn resolve(&self, server_id: &str) -> Result<Transport>;
}

/// Resolver with nothing registered; every lookup fails. Useful as a
/// default when no remote-process servers are configured.
#[derive(Default)]
pub struct NullRemoteServerResolver;

#[async_trait]
impl RemoteServerResolver for NullRemoteServerResolver {
    async fn resolve(&self, server_id: &str) -> Result<Transport> {
        Err(Error::remote_tool(format!(
            "no remote-process server registered with id {server_id}"
        )))
    }
}

const PROTOCOL_VERSION: &str = "2025-03-26";
const CLIENT_NAME: &str = "relay-tool-client";
const CLIENT_VERSION: &str = "1.0.0";

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: String,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[allow(dead_code)]
    code: i64,
    message: String,
}

fn request(method: &str, params: Option<Value>) -> JsonRpcRequest<'_> {
    JsonRpcRequest {
        jsonrpc: "2.0",
        id: uuid::Uuid::now_v7().to_string(),
        method,
        params,
    }
}

fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {"name": CLIENT_NAME, "version": CLIENT_VERSION},
    })
}

/// A remote tool description as returned by a server's `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "default_schema")]
    pub parameters: Value,
}

fn default_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Transport configuration for a registered remote-tool server.
pub enum Transport {
    ChildProcess { command: String, env: HashMap<String, String> },
    Http { url: String },
}

/// A JSON-RPC client for one remote-tool server, lazily establishing its
/// transport on first call and reusing it across `tools/list`/`tools/call`.
pub struct RemoteToolAdapter {
    transport: Transport,
    call_timeout: Duration,
    http: reqwest::Client,
    session_id: Mutex<Option<String>>,
    http_initialized: AtomicBool,
    process: Mutex<Option<ProcessHandle>>,
}

struct ProcessHandle {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl RemoteToolAdapter {
    pub fn new(transport: Transport, call_timeout: Duration) -> Self {
        Self {
            transport,
            call_timeout,
            http: reqwest::Client::new(),
            session_id: Mutex::new(None),
            http_initialized: AtomicBool::new(false),
            process: Mutex::new(None),
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<RemoteToolDescriptor>> {
        let result = self.call("tools/list", None).await?;
        let tools = result
            .and_then(|v| v.get("tools").cloned())
            .unwrap_or(Value::Array(vec![]));
        serde_json::from_value(tools)
            .map_err(|e| Error::remote_tool(format!("invalid tools/list response: {e}")))
    }

    /// Calls `tools/call` and flattens the MCP content-block result into a
    /// single string, the way the registry's dispatcher expects.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let result = self.call("tools/call", Some(params)).await?;
        let Some(result) = result else {
            return Ok(String::new());
        };
        Ok(flatten_content(&result))
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Option<Value>> {
        match &self.transport {
            Transport::Http { .. } => self.http_call(method, params).await,
            Transport::ChildProcess { .. } => self.stdio_call(method, params).await,
        }
    }

    // ------------------------------------------------------------------
    // Streamable HTTP transport
    // ------------------------------------------------------------------

    async fn http_init(&self) -> Result<()> {
        if self.http_initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let Transport::Http { url } = &self.transport else {
            unreachable!("http_init only called for Http transport")
        };

        let req = request("initialize", Some(initialize_params()));
        let resp = tokio::time::timeout(
            self.call_timeout,
            self.http
                .post(url)
                .header("Content-Type", "application/json")
                .header("Accept", "application/json, text/event-stream")
                .json(&req)
                .send(),
        )
        .await
        .map_err(|_| Error::remote_tool("initialize timed out"))?
        .map_err(|e| Error::remote_tool(format!("initialize request failed: {e}")))?;

        let session_id = resp
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = parse_http_response(resp).await?;
        if let Some(body) = &body {
            if let Some(err) = &body.error {
                return Err(Error::remote_tool(format!("initialize error: {}", err.message)));
            }
        }
        *self.session_id.lock().await = session_id;

        let notif = JsonRpcNotification {
            jsonrpc: "2.0",
            method: "notifications/initialized",
            params: None,
        };
        let mut builder = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream");
        if let Some(session_id) = self.session_id.lock().await.as_ref() {
            builder = builder.header("Mcp-Session-Id", session_id.as_str());
        }
        let _ = builder.json(&notif).send().await;

        self.http_initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn http_call(&self, method: &str, params: Option<Value>) -> Result<Option<Value>> {
        self.http_init().await?;
        let Transport::Http { url } = &self.transport else {
            unreachable!("http_call only called for Http transport")
        };

        let req = request(method, params);
        let mut builder = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream");
        if let Some(session_id) = self.session_id.lock().await.as_ref() {
            builder = builder.header("Mcp-Session-Id", session_id.as_str());
        }

        let resp = tokio::time::timeout(self.call_timeout, builder.json(&req).send())
            .await
            .map_err(|_| Error::remote_tool(format!("{method} timed out")))?
            .map_err(|e| Error::remote_tool(format!("{method} request failed: {e}")))?;

        let body = parse_http_response(resp).await?;
        let Some(body) = body else { return Ok(None) };
        if let Some(err) = &body.error {
            return Err(Error::remote_tool(format!("{method} error: {}", err.message)));
        }
        Ok(body.result)
    }

    // ------------------------------------------------------------------
    // stdio transport
    // ------------------------------------------------------------------

    async fn ensure_process(&self) -> Result<()> {
        let mut guard = self.process.lock().await;
        if let Some(handle) = guard.as_mut() {
            if handle.child.try_wait().ok().flatten().is_none() {
                return Ok(());
            }
        }

        let Transport::ChildProcess { command, env } = &self.transport else {
            unreachable!("ensure_process only called for ChildProcess transport")
        };

        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::remote_tool("empty command"))?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(parts)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::remote_tool(format!("failed to spawn tool server: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::remote_tool("child process has no stdin"))?;
        let stdout = BufReader::new(
            child
                .stdout
                .take()
                .ok_or_else(|| Error::remote_tool("child process has no stdout"))?,
        );

        *guard = Some(ProcessHandle { child, stdin, stdout });
        drop(guard);

        self.stdio_send_only("initialize", Some(initialize_params()))
            .await?;
        let notif = JsonRpcNotification {
            jsonrpc: "2.0",
            method: "notifications/initialized",
            params: None,
        };
        let mut guard = self.process.lock().await;
        let handle = guard
            .as_mut()
            .ok_or_else(|| Error::remote_tool("tool server process vanished"))?;
        write_line(&mut handle.stdin, &notif).await?;
        Ok(())
    }

    async fn stdio_send_only(&self, method: &str, params: Option<Value>) -> Result<Option<Value>> {
        let req = request(method, params);
        let mut guard = self.process.lock().await;
        let handle = guard
            .as_mut()
            .ok_or_else(|| Error::remote_tool("tool server process not started"))?;
        write_line(&mut handle.stdin, &req).await?;

        let line = tokio::time::timeout(self.call_timeout, read_line(&mut handle.stdout))
            .await
            .map_err(|_| Error::remote_tool(format!("{method} timed out")))??;
        let body: JsonRpcResponse = serde_json::from_str(&line)
            .map_err(|e| Error::remote_tool(format!("invalid JSON-RPC response: {e}")))?;
        if let Some(err) = &body.error {
            return Err(Error::remote_tool(format!("{method} error: {}", err.message)));
        }
        Ok(body.result)
    }

    async fn stdio_call(&self, method: &str, params: Option<Value>) -> Result<Option<Value>> {
        self.ensure_process().await?;
        self.stdio_send_only(method, params).await
    }
}

async fn write_line<T: Serialize>(stdin: &mut ChildStdin, payload: &T) -> Result<()> {
    let mut line = serde_json::to_string(payload)
        .map_err(|e| Error::remote_tool(format!("failed to encode JSON-RPC payload: {e}")))?;
    line.push('\n');
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| Error::remote_tool(format!("failed to write to tool server stdin: {e}")))?;
    stdin
        .flush()
        .await
        .map_err(|e| Error::remote_tool(format!("failed to flush tool server stdin: {e}")))
}

/// Reads lines until one parses as a JSON-RPC message carrying an `id`
/// (skipping any stray notifications the server might emit first).
async fn read_line(stdout: &mut BufReader<ChildStdout>) -> Result<String> {
    loop {
        let mut line = String::new();
        let n = stdout
            .read_line(&mut line)
            .await
            .map_err(|e| Error::remote_tool(format!("failed to read tool server stdout: {e}")))?;
        if n == 0 {
            return Err(Error::remote_tool("tool server closed stdout"));
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if serde_json::from_str::<JsonRpcResponse>(trimmed)
            .map(|r| r.id.is_some())
            .unwrap_or(false)
        {
            return Ok(trimmed.to_string());
        }
    }
}

async fn parse_http_response(resp: reqwest::Response) -> Result<Option<JsonRpcResponse>> {
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let text = resp
        .text()
        .await
        .map_err(|e| Error::remote_tool(format!("failed to read response body: {e}")))?;

    if content_type.contains("text/event-stream") {
        for line in text.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }
                if let Ok(body) = serde_json::from_str::<JsonRpcResponse>(data) {
                    return Ok(Some(body));
                }
            }
        }
        Ok(None)
    } else {
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| Error::remote_tool(format!("invalid JSON-RPC response: {e}")))
    }
}

fn flatten_content(result: &Value) -> String {
    let Some(contents) = result.get("content").and_then(|c| c.as_array()) else {
        return result.to_string();
    };
    let texts: Vec<String> = contents
        .iter()
        .filter_map(|c| {
            if let Some(text) = c.as_str() {
                Some(text.to_string())
            } else if c.get("type").and_then(|t| t.as_str()) == Some("text") {
                c.get("text").and_then(|t| t.as_str()).map(str::to_string)
            } else {
                None
            }
        })
        .collect();
    if texts.is_empty() {
        result.to_string()
    } else {
        texts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_content_joins_text_blocks() {
        let result = serde_json::json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "second"}
            ]
        });
        assert_eq!(flatten_content(&result), "first\nsecond");
    }

    #[test]
    fn test_flatten_content_falls_back_to_raw_json() {
        let result = serde_json::json!({"content": []});
        assert_eq!(flatten_content(&result), result.to_string());
    }

    #[test]
    fn test_parse_sse_data_line() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":\"1\",\"result\":{\"ok\":true}}\n\n";
        let parsed: Option<JsonRpcResponse> = body.lines().find_map(|line| {
            line.trim()
                .strip_prefix("data:")
                .and_then(|d| serde_json::from_str(d.trim()).ok())
        });
        assert!(parsed.is_some());
    }
}
