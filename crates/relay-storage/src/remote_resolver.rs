// Storage-backed remote-tool server resolver.
//
// Implements `relay_core::remote_tool::RemoteServerResolver` against the
// `remote_servers` table, scoped to a single user at construction time so a
// resolved server can never leak across tenants.

use async_trait::async_trait;
use relay_core::remote_tool::{RemoteServerResolver, Transport};
use relay_core::error::{Error as CoreError, Result as CoreResult};
use uuid::Uuid;

use crate::encryption::EncryptionService;
use crate::repositories::Database;

pub struct DbRemoteServerResolver {
    db: Database,
    user_id: Uuid,
    encryption: std::sync::Arc<EncryptionService>,
}

impl DbRemoteServerResolver {
    pub fn new(db: Database, user_id: Uuid, encryption: std::sync::Arc<EncryptionService>) -> Self {
        Self {
            db,
            user_id,
            encryption,
        }
    }
}

#[async_trait]
impl RemoteServerResolver for DbRemoteServerResolver {
    async fn resolve(&self, server_id: &str) -> CoreResult<Transport> {
        let id = Uuid::parse_str(server_id)
            .map_err(|e| CoreError::remote_tool(format!("invalid server id {server_id}: {e}")))?;

        let row = self
            .db
            .get_remote_server(id)
            .await
            .map_err(|e| CoreError::remote_tool(format!("failed to look up server {server_id}: {e}")))?
            .ok_or_else(|| CoreError::remote_tool(format!("no remote-process server registered with id {server_id}")))?;

        if row.user_id != self.user_id || !row.enabled {
            return Err(CoreError::remote_tool(format!(
                "no remote-process server registered with id {server_id}"
            )));
        }

        let env = match &row.env_encrypted {
            Some(encrypted) => {
                let plaintext = self
                    .encryption
                    .decrypt_to_string(encrypted)
                    .map_err(|e| CoreError::remote_tool(format!("failed to decrypt server env: {e}")))?;
                serde_json::from_str(&plaintext)
                    .map_err(|e| CoreError::remote_tool(format!("invalid decrypted server env: {e}")))?
            }
            None => Default::default(),
        };

        match row.transport.as_str() {
            "http" => Ok(Transport::Http { url: row.config }),
            "child_process" => Ok(Transport::ChildProcess {
                command: row.config,
                env,
            }),
            other => Err(CoreError::remote_tool(format!(
                "unknown transport kind for server {server_id}: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    // `DbRemoteServerResolver` requires a live database connection and is
    // exercised by the storage integration suite, not here.
}
