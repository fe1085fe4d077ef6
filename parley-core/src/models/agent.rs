use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;

/// Models an agent may be configured with.
pub const SUPPORTED_MODELS: &[&str] = &["open-mistral-7b", "mistral-small-2402", "open-mixtral-8x22b"];

pub const DEFAULT_MODEL: &str = "mistral-small-2402";

const API_KEY_PREFIX: &str = "agent_";
const API_KEY_LEN: usize = 32;

const DEFAULT_ROLE: &str = "assistant";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: i32 = 1000;
const DEFAULT_TOP_P: f32 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Agent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub role: String,
    pub instructions: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: i32,
    pub top_p: f32,
    pub api_key: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fully-resolved values for an agent insert.
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub user_id: Uuid,
    pub name: String,
    pub role: String,
    pub instructions: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: i32,
    pub top_p: f32,
    pub api_key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateAgentInput {
    pub name: Option<String>,
    pub role: Option<String>,
    pub instructions: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    pub top_p: Option<f32>,
}

/// Partial update. Absent fields are left untouched; an empty `instructions`
/// string clears the stored instructions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentPatch {
    pub name: Option<String>,
    pub role: Option<String>,
    pub instructions: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    pub top_p: Option<f32>,
    pub is_active: Option<bool>,
}

pub fn is_supported_model(model: &str) -> bool {
    SUPPORTED_MODELS.contains(&model)
}

/// `agent_` followed by 32 random alphanumerics.
pub fn generate_api_key() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LEN)
        .map(char::from)
        .collect();
    format!("{}{}", API_KEY_PREFIX, suffix)
}

fn check_model(model: &str) -> Result<(), ServiceError> {
    if is_supported_model(model) {
        Ok(())
    } else {
        Err(ServiceError::invalid(format!(
            "Model not allowed. Supported models: {}",
            SUPPORTED_MODELS.join(", ")
        )))
    }
}

fn check_generation_params(
    temperature: Option<f32>,
    max_tokens: Option<i32>,
    top_p: Option<f32>,
) -> Result<(), ServiceError> {
    if let Some(t) = temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(ServiceError::invalid("temperature must be between 0 and 2"));
        }
    }
    if let Some(m) = max_tokens {
        if m <= 0 {
            return Err(ServiceError::invalid("max_tokens must be positive"));
        }
    }
    if let Some(p) = top_p {
        if !(p > 0.0 && p <= 1.0) {
            return Err(ServiceError::invalid("top_p must be in (0, 1]"));
        }
    }
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl CreateAgentInput {
    /// Validate and fill defaults. The credential is always generated here.
    pub fn into_new_agent(self, user_id: Uuid) -> Result<NewAgent, ServiceError> {
        let name = non_blank(self.name).ok_or_else(|| ServiceError::invalid("Name is required"))?;
        let model = self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        check_model(&model)?;
        check_generation_params(self.temperature, self.max_tokens, self.top_p)?;

        Ok(NewAgent {
            user_id,
            name,
            role: non_blank(self.role).unwrap_or_else(|| DEFAULT_ROLE.to_string()),
            instructions: non_blank(self.instructions),
            model,
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            top_p: self.top_p.unwrap_or(DEFAULT_TOP_P),
            api_key: generate_api_key(),
        })
    }
}

impl AgentPatch {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if let Some(model) = &self.model {
            check_model(model)?;
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(ServiceError::invalid("Name cannot be empty"));
            }
        }
        check_generation_params(self.temperature, self.max_tokens, self.top_p)
    }

    /// Apply onto an existing agent in memory (used by the in-memory store).
    pub fn apply_to(&self, agent: &mut Agent) {
        if let Some(name) = &self.name {
            agent.name = name.clone();
        }
        if let Some(role) = &self.role {
            agent.role = role.clone();
        }
        if let Some(instructions) = &self.instructions {
            agent.instructions = non_blank(Some(instructions.clone()));
        }
        if let Some(model) = &self.model {
            agent.model = model.clone();
        }
        if let Some(t) = self.temperature {
            agent.temperature = t;
        }
        if let Some(m) = self.max_tokens {
            agent.max_tokens = m;
        }
        if let Some(p) = self.top_p {
            agent.top_p = p;
        }
        if let Some(active) = self.is_active {
            agent.is_active = active;
        }
        agent.updated_at = Utc::now();
    }
}
