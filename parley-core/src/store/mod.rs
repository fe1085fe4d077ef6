//! Persistence ports for agents, conversations and messages.
//!
//! Two adapters are provided: [`PgStore`] over PostgreSQL and [`InMemoryStore`]
//! for tests and local runs. Neither caches: every read reflects all writes
//! committed before it.
//!
//! Implementations must ensure:
//! - agent credentials are unique
//! - messages are never updated after insert
//! - message history is ordered by insertion time

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Agent, AgentPatch, AgentStatistics, Conversation, Message, NewAgent, NewConversation,
    NewMessage,
};

pub mod memory;
pub mod postgres;

pub use memory::{FailPoint, InMemoryStore};
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Exact credential match among active agents only.
    async fn resolve_credential(&self, api_key: &str) -> StoreResult<Option<Agent>>;

    /// The owner's agents, newest first.
    async fn list_agents(&self, owner: Uuid) -> StoreResult<Vec<Agent>>;

    async fn get_agent(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Agent>>;

    async fn create_agent(&self, agent: &NewAgent) -> StoreResult<Agent>;

    /// Returns `None` when no agent with this id belongs to `owner`.
    async fn update_agent(
        &self,
        owner: Uuid,
        id: Uuid,
        patch: &AgentPatch,
    ) -> StoreResult<Option<Agent>>;

    /// Hard delete; conversations and messages go with it. Returns whether a row was removed.
    async fn delete_agent(&self, owner: Uuid, id: Uuid) -> StoreResult<bool>;

    async fn agent_statistics(&self, agent_id: Uuid) -> StoreResult<AgentStatistics>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create_conversation(&self, conversation: &NewConversation)
        -> StoreResult<Conversation>;

    /// Only returns the conversation if it belongs to `agent_id`.
    async fn find_conversation(
        &self,
        agent_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<Conversation>>;

    /// Single-row insert.
    async fn append_message(&self, message: &NewMessage) -> StoreResult<Message>;

    /// The newest `limit` messages of a conversation, oldest first.
    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<Message>>;
}

#[async_trait]
pub trait Store: AgentRepository + ConversationRepository {
    /// Backend description for health reporting.
    async fn health(&self) -> StoreResult<String>;
}
