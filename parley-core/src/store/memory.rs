use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use uuid::Uuid;

use super::{AgentRepository, ConversationRepository, Store, StoreError, StoreResult};
use crate::models::{
    Agent, AgentPatch, AgentStatistics, Conversation, Message, MessageRole, NewAgent,
    NewConversation, NewMessage,
};

/// Operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    ResolveCredential,
    CreateConversation,
    FindConversation,
    AppendUserMessage,
    AppendAssistantMessage,
    RecentMessages,
}

#[derive(Debug, Default)]
struct Tables {
    agents: Vec<Agent>,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
}

/// Process-local store with the same contract as [`super::PgStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    failures: Mutex<HashSet<FailPoint>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call at `point` fail with `StoreError::Unavailable`.
    pub fn fail_on(&self, point: FailPoint) {
        self.failures.lock().insert(point);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    fn check(&self, point: FailPoint) -> StoreResult<()> {
        if self.failures.lock().contains(&point) {
            return Err(StoreError::Unavailable(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    pub fn conversation_count(&self) -> usize {
        self.tables.lock().conversations.len()
    }

    pub fn message_count(&self) -> usize {
        self.tables.lock().messages.len()
    }

    /// All messages of a conversation in insertion order.
    pub fn messages_of(&self, conversation_id: Uuid) -> Vec<Message> {
        self.tables
            .lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.tables.lock().conversations.clone()
    }

    pub fn conversation(&self, id: Uuid) -> Option<Conversation> {
        self.tables
            .lock()
            .conversations
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }
}

#[async_trait]
impl AgentRepository for InMemoryStore {
    async fn resolve_credential(&self, api_key: &str) -> StoreResult<Option<Agent>> {
        self.check(FailPoint::ResolveCredential)?;
        Ok(self
            .tables
            .lock()
            .agents
            .iter()
            .find(|a| a.api_key == api_key && a.is_active)
            .cloned())
    }

    async fn list_agents(&self, owner: Uuid) -> StoreResult<Vec<Agent>> {
        let tables = self.tables.lock();
        // Vec order is creation order, so reverse for newest first.
        Ok(tables
            .agents
            .iter()
            .rev()
            .filter(|a| a.user_id == owner)
            .cloned()
            .collect())
    }

    async fn get_agent(&self, owner: Uuid, id: Uuid) -> StoreResult<Option<Agent>> {
        Ok(self
            .tables
            .lock()
            .agents
            .iter()
            .find(|a| a.id == id && a.user_id == owner)
            .cloned())
    }

    async fn create_agent(&self, agent: &NewAgent) -> StoreResult<Agent> {
        let mut tables = self.tables.lock();
        if tables.agents.iter().any(|a| a.api_key == agent.api_key) {
            return Err(StoreError::Unavailable("duplicate api_key".to_string()));
        }
        let now = Utc::now();
        let row = Agent {
            id: Uuid::new_v4(),
            user_id: agent.user_id,
            name: agent.name.clone(),
            role: agent.role.clone(),
            instructions: agent.instructions.clone(),
            model: agent.model.clone(),
            temperature: agent.temperature,
            max_tokens: agent.max_tokens,
            top_p: agent.top_p,
            api_key: agent.api_key.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        tables.agents.push(row.clone());
        Ok(row)
    }

    async fn update_agent(
        &self,
        owner: Uuid,
        id: Uuid,
        patch: &AgentPatch,
    ) -> StoreResult<Option<Agent>> {
        let mut tables = self.tables.lock();
        Ok(tables
            .agents
            .iter_mut()
            .find(|a| a.id == id && a.user_id == owner)
            .map(|agent| {
                patch.apply_to(agent);
                agent.clone()
            }))
    }

    async fn delete_agent(&self, owner: Uuid, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        let before = tables.agents.len();
        tables.agents.retain(|a| !(a.id == id && a.user_id == owner));
        if tables.agents.len() == before {
            return Ok(false);
        }

        let removed: HashSet<Uuid> = tables
            .conversations
            .iter()
            .filter(|c| c.agent_id == id)
            .map(|c| c.id)
            .collect();
        tables.conversations.retain(|c| c.agent_id != id);
        tables.messages.retain(|m| !removed.contains(&m.conversation_id));
        Ok(true)
    }

    async fn agent_statistics(&self, agent_id: Uuid) -> StoreResult<AgentStatistics> {
        let tables = self.tables.lock();
        let conversations: Vec<&Conversation> = tables
            .conversations
            .iter()
            .filter(|c| c.agent_id == agent_id)
            .collect();
        let ids: HashSet<Uuid> = conversations.iter().map(|c| c.id).collect();
        let messages: Vec<&Message> = tables
            .messages
            .iter()
            .filter(|m| ids.contains(&m.conversation_id))
            .collect();

        let timings: Vec<i32> = messages.iter().filter_map(|m| m.response_time_ms).collect();
        let avg_response_time_ms = if timings.is_empty() {
            None
        } else {
            Some(timings.iter().map(|&t| f64::from(t)).sum::<f64>() / timings.len() as f64)
        };

        Ok(AgentStatistics {
            agent_id,
            total_conversations: conversations.len() as i64,
            total_messages: messages.len() as i64,
            user_messages: messages.iter().filter(|m| m.role == MessageRole::User).count() as i64,
            assistant_messages: messages
                .iter()
                .filter(|m| m.role == MessageRole::Assistant)
                .count() as i64,
            total_tokens_used: messages
                .iter()
                .filter_map(|m| m.tokens_used)
                .map(i64::from)
                .sum(),
            avg_response_time_ms,
            last_conversation_at: conversations.iter().map(|c| c.created_at).max(),
        })
    }
}

#[async_trait]
impl ConversationRepository for InMemoryStore {
    async fn create_conversation(
        &self,
        conversation: &NewConversation,
    ) -> StoreResult<Conversation> {
        self.check(FailPoint::CreateConversation)?;
        let now = Utc::now();
        let row = Conversation {
            id: Uuid::new_v4(),
            agent_id: conversation.agent_id,
            session_id: conversation.session_id.clone(),
            visitor_id: conversation.visitor_id.clone(),
            metadata: conversation.metadata.clone(),
            created_at: now,
            updated_at: now,
        };
        self.tables.lock().conversations.push(row.clone());
        Ok(row)
    }

    async fn find_conversation(
        &self,
        agent_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<Conversation>> {
        self.check(FailPoint::FindConversation)?;
        Ok(self
            .tables
            .lock()
            .conversations
            .iter()
            .find(|c| c.id == id && c.agent_id == agent_id)
            .cloned())
    }

    async fn append_message(&self, message: &NewMessage) -> StoreResult<Message> {
        self.check(match message.role {
            MessageRole::User => FailPoint::AppendUserMessage,
            MessageRole::Assistant => FailPoint::AppendAssistantMessage,
        })?;
        let mut tables = self.tables.lock();
        if !tables.conversations.iter().any(|c| c.id == message.conversation_id) {
            return Err(StoreError::Unavailable(format!(
                "conversation {} does not exist",
                message.conversation_id
            )));
        }
        let row = Message {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            role: message.role,
            content: message.content.clone(),
            tokens_used: message.tokens_used,
            response_time_ms: message.response_time_ms,
            created_at: Utc::now(),
        };
        tables.messages.push(row.clone());
        Ok(row)
    }

    async fn recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<Message>> {
        self.check(FailPoint::RecentMessages)?;
        let all = self.messages_of(conversation_id);
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).collect())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn health(&self) -> StoreResult<String> {
        Ok("in-memory".to_string())
    }
}
