pub mod agent;
pub mod conversation;
pub mod message;
pub mod statistics;

pub use agent::{
    generate_api_key, is_supported_model, Agent, AgentPatch, CreateAgentInput, NewAgent,
    DEFAULT_MODEL, SUPPORTED_MODELS,
};
pub use conversation::{Conversation, NewConversation};
pub use message::{Message, MessageRole, NewMessage, UnknownRole};
pub use statistics::AgentStatistics;
