// Repository layer for database operations

use relay_core::message::Message;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ============================================
    // Users
    // ============================================

    pub async fn create_user(&self, input: CreateUser) -> Result<UserRow> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (email, name)
            VALUES ($1, $2)
            RETURNING id, email, name, created_at, updated_at
            "#,
        )
        .bind(&input.email)
        .bind(&input.name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, name, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, name, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Tenants (read-mostly: quota + model allowlist consumed by the core)
    // ============================================

    pub async fn create_tenant(&self, input: CreateTenant) -> Result<TenantRow> {
        let allowlist_json = serde_json::to_value(&input.model_allowlist)?;

        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            INSERT INTO tenants (name, monthly_token_quota, model_allowlist)
            VALUES ($1, $2, $3)
            RETURNING id, name, monthly_token_quota, model_allowlist, created_at, updated_at
            "#,
        )
        .bind(&input.name)
        .bind(input.monthly_token_quota)
        .bind(&allowlist_json)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_tenant(&self, id: Uuid) -> Result<Option<TenantRow>> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT id, name, monthly_token_quota, model_allowlist, created_at, updated_at
            FROM tenants
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn update_tenant(&self, id: Uuid, input: UpdateTenant) -> Result<Option<TenantRow>> {
        let allowlist_json = match &input.model_allowlist {
            Some(list) => Some(serde_json::to_value(list)?),
            None => None,
        };

        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            UPDATE tenants
            SET
                name = COALESCE($2, name),
                monthly_token_quota = COALESCE($3, monthly_token_quota),
                model_allowlist = COALESCE($4, model_allowlist),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, monthly_token_quota, model_allowlist, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(input.monthly_token_quota)
        .bind(&allowlist_json)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Conversations
    // ============================================

    pub async fn create_conversation(&self, input: CreateConversation) -> Result<ConversationRow> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            INSERT INTO conversations (user_id, tenant_id, title, model)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, tenant_id, title, model, created_at, updated_at
            "#,
        )
        .bind(input.user_id)
        .bind(input.tenant_id)
        .bind(&input.title)
        .bind(&input.model)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_conversation(&self, id: Uuid) -> Result<Option<ConversationRow>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, user_id, tenant_id, title, model, created_at, updated_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_conversations_for_user(&self, user_id: Uuid) -> Result<Vec<ConversationRow>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, user_id, tenant_id, title, model, created_at, updated_at
            FROM conversations
            WHERE user_id = $1
            ORDER BY updated_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Sets the title only if it is still the default placeholder, and always
    /// bumps `updated_at` — the two per-turn conversation mutations the
    /// orchestrator needs after every turn.
    pub async fn touch_conversation(
        &self,
        id: Uuid,
        title_if_default: Option<&str>,
    ) -> Result<Option<ConversationRow>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            UPDATE conversations
            SET
                title = CASE WHEN title = $2 THEN COALESCE($3, title) ELSE title END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, user_id, tenant_id, title, model, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(DEFAULT_CONVERSATION_TITLE)
        .bind(title_if_default)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn update_conversation(
        &self,
        id: Uuid,
        input: UpdateConversation,
    ) -> Result<Option<ConversationRow>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            UPDATE conversations
            SET
                title = COALESCE($2, title),
                model = COALESCE($3, model),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, user_id, tenant_id, title, model, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&input.title)
        .bind(&input.model)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Messages (PRIMARY conversation data)
    // ============================================

    pub async fn create_message(&self, input: CreateMessageRow) -> Result<MessageRow> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (conversation_id, role, content, reasoning, tool_calls, tool_call_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, conversation_id, role, content, reasoning, tool_calls, tool_call_id, metadata, created_at
            "#,
        )
        .bind(input.conversation_id)
        .bind(&input.role)
        .bind(&input.content)
        .bind(&input.reasoning)
        .bind(&input.tool_calls)
        .bind(&input.tool_call_id)
        .bind(&input.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Persists one turn's worth of new entries (the messages appended to the
    /// working list since the turn started) in the order given.
    pub async fn append_messages(
        &self,
        conversation_id: Uuid,
        messages: &[Message],
    ) -> Result<Vec<MessageRow>> {
        let mut rows = Vec::with_capacity(messages.len());
        for message in messages {
            let input = MessageRow::from_message(conversation_id, message);
            rows.push(self.create_message(input).await?);
        }
        Ok(rows)
    }

    pub async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<MessageRow>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, conversation_id, role, content, reasoning, tool_calls, tool_call_id, metadata, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn list_recent_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<MessageRow>> {
        let mut rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, conversation_id, role, content, reasoning, tool_calls, tool_call_id, metadata, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.reverse();
        Ok(rows)
    }

    // ============================================
    // Usage Records (append-only accounting)
    // ============================================

    pub async fn create_usage_record(&self, input: CreateUsageRecord) -> Result<UsageRecordRow> {
        let row = sqlx::query_as::<_, UsageRecordRow>(
            r#"
            INSERT INTO usage_records
                (user_id, tenant_id, conversation_id, model, input_tokens, output_tokens, total_tokens, trigger_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, user_id, tenant_id, conversation_id, model, input_tokens, output_tokens, total_tokens, trigger_type, created_at
            "#,
        )
        .bind(input.user_id)
        .bind(input.tenant_id)
        .bind(input.conversation_id)
        .bind(&input.model)
        .bind(input.input_tokens)
        .bind(input.output_tokens)
        .bind(input.total_tokens)
        .bind(&input.trigger_type)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn monthly_usage_total(&self, tenant_id: Uuid, year_month: &str) -> Result<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT SUM(total_tokens)
            FROM usage_records
            WHERE tenant_id = $1
              AND to_char(created_at, 'YYYY-MM') = $2
            "#,
        )
        .bind(tenant_id)
        .bind(year_month)
        .fetch_one(&self.pool)
        .await?;

        Ok(total.unwrap_or(0))
    }

    // ============================================
    // Remote-process tool servers (user-registered MCP-style servers)
    // ============================================

    pub async fn create_remote_server(&self, input: CreateRemoteServer) -> Result<RemoteServerRow> {
        let row = sqlx::query_as::<_, RemoteServerRow>(
            r#"
            INSERT INTO remote_servers (user_id, name, transport, config, env_encrypted, enabled)
            VALUES ($1, $2, $3, $4, $5, true)
            RETURNING id, user_id, name, transport, config, env_encrypted, enabled, tools_cache, created_at, updated_at
            "#,
        )
        .bind(input.user_id)
        .bind(&input.name)
        .bind(&input.transport)
        .bind(&input.config)
        .bind(&input.env_encrypted)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_remote_server(&self, id: Uuid) -> Result<Option<RemoteServerRow>> {
        let row = sqlx::query_as::<_, RemoteServerRow>(
            r#"
            SELECT id, user_id, name, transport, config, env_encrypted, enabled, tools_cache, created_at, updated_at
            FROM remote_servers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_enabled_remote_servers_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<RemoteServerRow>> {
        let rows = sqlx::query_as::<_, RemoteServerRow>(
            r#"
            SELECT id, user_id, name, transport, config, env_encrypted, enabled, tools_cache, created_at, updated_at
            FROM remote_servers
            WHERE user_id = $1 AND enabled = true
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Persists a fresh `tools/list` discovery so the next per-turn load can
    /// skip the live round trip.
    pub async fn cache_remote_server_tools(
        &self,
        id: Uuid,
        tools_cache: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE remote_servers
            SET tools_cache = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&tools_cache)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ============================================
    // Custom (webhook) tools
    // ============================================

    pub async fn create_custom_tool(&self, input: CreateCustomTool) -> Result<CustomToolRow> {
        let row = sqlx::query_as::<_, CustomToolRow>(
            r#"
            INSERT INTO custom_tools
                (user_id, name, description, parameters, http_url, http_method, http_headers_encrypted, http_body_template, enabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, true)
            RETURNING id, user_id, name, description, parameters, http_url, http_method, http_headers_encrypted, http_body_template, enabled, created_at, updated_at
            "#,
        )
        .bind(input.user_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.parameters)
        .bind(&input.http_url)
        .bind(&input.http_method)
        .bind(&input.http_headers_encrypted)
        .bind(&input.http_body_template)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_enabled_custom_tools_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<CustomToolRow>> {
        let rows = sqlx::query_as::<_, CustomToolRow>(
            r#"
            SELECT id, user_id, name, description, parameters, http_url, http_method, http_headers_encrypted, http_body_template, enabled, created_at, updated_at
            FROM custom_tools
            WHERE user_id = $1 AND enabled = true
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_conversation_title_constant() {
        assert_eq!(DEFAULT_CONVERSATION_TITLE, "New conversation");
    }
}
