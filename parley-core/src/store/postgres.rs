use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{AgentRepository, ConversationRepository, Store, StoreResult};
use crate::models::{
    Agent, AgentPatch, AgentStatistics, Conversation, Message, NewAgent, NewConversation,
    NewMessage,
};

const AGENT_COLUMNS: &str = "id, user_id, name, role, instructions, model, temperature, \
     max_tokens, top_p, api_key, is_active, created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, role, content, tokens_used, response_time_ms, created_at";

/// PostgreSQL-backed store. Tables are described in `schema.sql`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentRepository for PgStore {
    async fn resolve_credential(&self, api_key: &str) -> StoreResult<Option<Agent>> {
        let agent = sqlx::query_as::<_, Agent>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE api_key = $1 AND is_active = TRUE"
        ))
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(agent)
    }

    async fn list_agents(&self, owner: Uuid) -> StoreResult<Vec<Agent>> {
        let agents = sqlx::query_as::<_, Agent>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(agents)
    }

    async fn get_agent(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Agent>> {
        let agent = sqlx::query_as::<_, Agent>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        Ok(agent)
    }

    async fn create_agent(&self, agent: &NewAgent) -> StoreResult<Agent> {
        let row = sqlx::query_as::<_, Agent>(&format!(
            r#"
            INSERT INTO agents
                (user_id, name, role, instructions, model, temperature, max_tokens, top_p, api_key, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE)
            RETURNING {AGENT_COLUMNS}
            "#
        ))
        .bind(agent.user_id)
        .bind(&agent.name)
        .bind(&agent.role)
        .bind(&agent.instructions)
        .bind(&agent.model)
        .bind(agent.temperature)
        .bind(agent.max_tokens)
        .bind(agent.top_p)
        .bind(&agent.api_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_agent(
        &self,
        owner: Uuid,
        id: Uuid,
        patch: &AgentPatch,
    ) -> StoreResult<Option<Agent>> {
        let row = sqlx::query_as::<_, Agent>(&format!(
            r#"
            UPDATE agents SET
                name         = COALESCE($3, name),
                role         = COALESCE($4, role),
                instructions = CASE
                                   WHEN $5::TEXT IS NULL THEN instructions
                                   WHEN btrim($5::TEXT) = '' THEN NULL
                                   ELSE $5::TEXT
                               END,
                model        = COALESCE($6, model),
                temperature  = COALESCE($7, temperature),
                max_tokens   = COALESCE($8, max_tokens),
                top_p        = COALESCE($9, top_p),
                is_active    = COALESCE($10, is_active),
                updated_at   = now()
            WHERE id = $1 AND user_id = $2
            RETURNING {AGENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner)
        .bind(&patch.name)
        .bind(&patch.role)
        .bind(&patch.instructions)
        .bind(&patch.model)
        .bind(patch.temperature)
        .bind(patch.max_tokens)
        .bind(patch.top_p)
        .bind(patch.is_active)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_agent(&self, owner: Uuid, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM agents WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn agent_statistics(&self, agent_id: Uuid) -> StoreResult<AgentStatistics> {
        let stats = sqlx::query_as::<_, AgentStatistics>(
            r#"
            SELECT
                $1::UUID AS agent_id,
                (SELECT COUNT(*) FROM conversations WHERE agent_id = $1) AS total_conversations,
                COUNT(m.id) AS total_messages,
                COUNT(m.id) FILTER (WHERE m.role = 'user') AS user_messages,
                COUNT(m.id) FILTER (WHERE m.role = 'assistant') AS assistant_messages,
                COALESCE(SUM(m.tokens_used), 0)::BIGINT AS total_tokens_used,
                AVG(m.response_time_ms)::FLOAT8 AS avg_response_time_ms,
                (SELECT MAX(created_at) FROM conversations WHERE agent_id = $1) AS last_conversation_at
            FROM messages m
            JOIN conversations c ON c.id = m.conversation_id
            WHERE c.agent_id = $1
            "#,
        )
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}

#[async_trait]
impl ConversationRepository for PgStore {
    async fn create_conversation(
        &self,
        conversation: &NewConversation,
    ) -> StoreResult<Conversation> {
        let row = sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (agent_id, session_id, visitor_id, metadata)
            VALUES ($1, $2, $3, $4)
            RETURNING id, agent_id, session_id, visitor_id, metadata, created_at, updated_at
            "#,
        )
        .bind(conversation.agent_id)
        .bind(&conversation.session_id)
        .bind(&conversation.visitor_id)
        .bind(&conversation.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_conversation(
        &self,
        agent_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<Conversation>> {
        let row = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT id, agent_id, session_id, visitor_id, metadata, created_at, updated_at
            FROM conversations
            WHERE id = $1 AND agent_id = $2
            "#,
        )
        .bind(id)
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn append_message(&self, message: &NewMessage) -> StoreResult<Message> {
        let row = sqlx::query_as::<_, Message>(&format!(
            r#"
            INSERT INTO messages (conversation_id, role, content, tokens_used, response_time_ms)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.tokens_used)
        .bind(message.response_time_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, Message>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM (
                SELECT {MESSAGE_COLUMNS}, seq
                FROM messages
                WHERE conversation_id = $1
                ORDER BY created_at DESC, seq DESC
                LIMIT $2
            ) recent
            ORDER BY created_at ASC, seq ASC
            "#
        ))
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn health(&self) -> StoreResult<String> {
        let version = crate::db::health_check(&self.pool).await?;
        crate::db::check_schema(&self.pool).await?;
        Ok(version)
    }
}
