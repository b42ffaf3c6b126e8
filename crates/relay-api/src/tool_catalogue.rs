// Per-request tool catalogue loader.
//
// Populates a registry's remote-process and webhook partitions for one
// user, on top of the process-wide builtins `register_default_builtins`
// already installed. Remote-process tool lists are cache-first: a server's
// `tools_cache` column is used if present, and only refreshed with a live
// `tools/list` call (bounded by the discovery timeout, distinct from the
// per-call timeout used once a tool is actually invoked) when the cache is
// empty or fails to parse. A freshly-discovered list is written back so the
// next turn skips the live call.

use std::time::Duration;

use relay_contracts::tools::{RemoteProcessTool, ToolPolicy, WebhookTool};
use relay_core::remote_tool::{RemoteToolAdapter, RemoteToolDescriptor, Transport};
use relay_core::tools::ToolRegistry;
use relay_storage::{CustomToolRow, Database, EncryptionService, RemoteServerRow};
use uuid::Uuid;

/// Loads every enabled remote-process server and custom webhook tool a user
/// has registered into `registry`. Failures for an individual server are
/// logged and skipped rather than failing the whole turn.
pub async fn load_user_tools(
    db: &Database,
    encryption: &EncryptionService,
    user_id: Uuid,
    discovery_timeout: Duration,
    registry: &mut ToolRegistry,
) {
    let servers = match db.list_enabled_remote_servers_for_user(user_id).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "failed to list remote-process servers");
            Vec::new()
        }
    };

    for server in servers {
        let server_id = server.id.to_string();
        match tools_for_server(db, &server, discovery_timeout).await {
            Ok(tools) => {
                let remote_tools: Vec<RemoteProcessTool> = tools
                    .into_iter()
                    .map(|t| RemoteProcessTool {
                        name: t.name,
                        description: t.description,
                        parameters: t.parameters,
                        server_id: server_id.clone(),
                        policy: ToolPolicy::Auto,
                    })
                    .collect();
                registry.set_remote_tools(&server_id, remote_tools);
            }
            Err(e) => {
                tracing::warn!(
                    server_id = %server_id,
                    server_name = %server.name,
                    error = %e,
                    "failed to discover tools for remote-process server, skipping"
                );
            }
        }
    }

    let custom_tools = match db.list_enabled_custom_tools_for_user(user_id).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "failed to list custom webhook tools");
            Vec::new()
        }
    };

    for tool in custom_tools {
        registry.set_webhook_tool(into_webhook_tool(tool, encryption));
    }
}

/// Cache-first resolution of one server's tool list: use `tools_cache` if it
/// parses, otherwise discover live and persist the result back.
async fn tools_for_server(
    db: &Database,
    server: &RemoteServerRow,
    discovery_timeout: Duration,
) -> anyhow::Result<Vec<RemoteToolDescriptor>> {
    if let Some(cached) = &server.tools_cache {
        if let Ok(tools) = serde_json::from_value::<Vec<RemoteToolDescriptor>>(cached.clone()) {
            return Ok(tools);
        }
        tracing::warn!(server_id = %server.id, "tools_cache present but unparseable, discovering live");
    }

    let transport = match server.transport.as_str() {
        "http" => Transport::Http {
            url: server.config.clone(),
        },
        "child_process" => Transport::ChildProcess {
            command: server.config.clone(),
            env: Default::default(),
        },
        other => anyhow::bail!("unknown transport kind: {other}"),
    };

    let adapter = RemoteToolAdapter::new(transport, discovery_timeout);
    let tools = adapter.list_tools().await?;

    if let Ok(cache_value) = serde_json::to_value(&tools) {
        if let Err(e) = db.cache_remote_server_tools(server.id, cache_value).await {
            tracing::warn!(server_id = %server.id, error = %e, "failed to cache discovered tools");
        }
    }

    Ok(tools)
}

fn into_webhook_tool(row: CustomToolRow, encryption: &EncryptionService) -> WebhookTool {
    let headers = row
        .http_headers_encrypted
        .as_ref()
        .and_then(|encrypted| encryption.decrypt_to_string(encrypted).ok())
        .and_then(|plaintext| serde_json::from_str(&plaintext).ok())
        .unwrap_or_default();

    WebhookTool {
        tool_id: row.id.to_string(),
        name: row.name,
        description: row.description,
        parameters: row.parameters,
        url: row.http_url,
        method: row.http_method,
        headers,
        body_template: row.http_body_template,
        timeout_secs: 30,
        policy: ToolPolicy::Auto,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_encryption() -> EncryptionService {
        EncryptionService::new("k1:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=", &[])
            .expect("test key should be valid")
    }

    fn custom_tool_row(headers_encrypted: Option<Vec<u8>>) -> CustomToolRow {
        CustomToolRow {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            name: "lookup".to_string(),
            description: "Looks something up".to_string(),
            parameters: serde_json::json!({"type": "object"}),
            http_url: "https://example.com/hook".to_string(),
            http_method: "POST".to_string(),
            http_headers_encrypted: headers_encrypted,
            http_body_template: None,
            enabled: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_into_webhook_tool_decrypts_headers() {
        let encryption = test_encryption();
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer secret".to_string());
        let encrypted = encryption
            .encrypt_string(&serde_json::to_string(&headers).unwrap())
            .unwrap();

        let row = custom_tool_row(Some(encrypted));
        let tool = into_webhook_tool(row, &encryption);

        assert_eq!(tool.headers.get("Authorization").unwrap(), "Bearer secret");
    }

    #[test]
    fn test_into_webhook_tool_without_headers_defaults_empty() {
        let encryption = test_encryption();
        let row = custom_tool_row(None);
        let tool = into_webhook_tool(row, &encryption);
        assert!(tool.headers.is_empty());
    }
}
