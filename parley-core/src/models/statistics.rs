use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aggregate activity for one agent across all of its conversations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AgentStatistics {
    pub agent_id: Uuid,
    pub total_conversations: i64,
    pub total_messages: i64,
    pub user_messages: i64,
    pub assistant_messages: i64,
    pub total_tokens_used: i64,
    pub avg_response_time_ms: Option<f64>,
    pub last_conversation_at: Option<DateTime<Utc>>,
}
