//! Widget message pipeline
//!
//! Turns one inbound visitor message into one persisted exchange and one reply:
//! resolve the agent by credential, create or continue the conversation, store
//! the user message, read the recent history, call the model once, store the
//! assistant message.
//!
//! Every step is terminal on failure. Earlier writes are not rolled back: a
//! provider failure leaves the user message stored without a reply.

use std::time::Instant;

use parley_core::inference::{
    CompletionRequest, InferenceProvider, MessageContent, PromptMessage, PromptRole,
};
use parley_core::models::{Agent, Message, MessageRole, NewConversation, NewMessage};
use parley_core::store::{AgentRepository, ConversationRepository};
use parley_core::{ServiceError, Store};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of stored messages sent to the model as context.
pub const HISTORY_LIMIT: usize = 10;

/// Reply used when the provider returns no usable text.
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't generate a response.";

/// Widget request body. Every field is optional at the wire level so that
/// missing values map to `InvalidRequest` instead of a deserialization error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: Option<String>,
    pub session_id: Option<String>,
    pub visitor_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub message: String,
    pub conversation_id: Uuid,
    pub message_id: Uuid,
}

/// Where the message goes, decided once before any store access. The
/// conversation id stays raw until the credential has been resolved, so a bad
/// credential is always reported as such.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationTarget {
    New {
        session_id: String,
        visitor_id: Option<String>,
        metadata: Option<serde_json::Value>,
    },
    Continue(String),
}

#[derive(Debug)]
struct ValidatedRequest {
    credential: String,
    message: String,
    target: ConversationTarget,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// A blank or absent credential is rejected before anything else is looked at.
pub fn require_credential(credential: Option<&str>) -> Result<&str, ServiceError> {
    present(credential).ok_or_else(|| ServiceError::unauthenticated("API key is required"))
}

fn validate(credential: Option<&str>, request: ChatRequest) -> Result<ValidatedRequest, ServiceError> {
    let credential = require_credential(credential)?.to_string();

    let (message, session_id) = match (
        present(request.message.as_deref()),
        present(request.session_id.as_deref()),
    ) {
        (Some(_), Some(_)) => (
            request.message.unwrap_or_default(),
            request.session_id.unwrap_or_default(),
        ),
        _ => return Err(ServiceError::invalid("Message and sessionId are required")),
    };

    let target = match present(request.conversation_id.as_deref()) {
        Some(raw) => ConversationTarget::Continue(raw.trim().to_string()),
        None => ConversationTarget::New {
            session_id,
            visitor_id: request.visitor_id,
            metadata: request.metadata,
        },
    };

    Ok(ValidatedRequest {
        credential,
        message,
        target,
    })
}

/// System entry followed by the stored history, in order.
pub fn build_prompt(agent: &Agent, history: &[Message]) -> Vec<PromptMessage> {
    let system = match agent.instructions.as_deref() {
        Some(instructions) if !instructions.trim().is_empty() => instructions.to_string(),
        _ => format!("You are {}. Respond clearly and helpfully.", agent.role),
    };

    std::iter::once(PromptMessage::new(PromptRole::System, system))
        .chain(history.iter().map(|m| {
            let role = match m.role {
                MessageRole::User => PromptRole::User,
                MessageRole::Assistant => PromptRole::Assistant,
            };
            PromptMessage::new(role, m.content.clone())
        }))
        .collect()
}

/// Reply text, or [`FALLBACK_REPLY`] when nothing could be extracted.
pub fn reply_text(content: Option<&MessageContent>) -> String {
    let text = content.map(MessageContent::extract_text).unwrap_or_default();
    if text.is_empty() {
        FALLBACK_REPLY.to_string()
    } else {
        text
    }
}

/// Run the pipeline for one widget message.
pub async fn handle(
    store: &dyn Store,
    provider: &dyn InferenceProvider,
    credential: Option<&str>,
    request: ChatRequest,
) -> Result<ChatReply, ServiceError> {
    let req = validate(credential, request).map_err(|e| {
        tracing::warn!(error = %e, "Rejected widget chat request");
        e
    })?;

    let started = Instant::now();

    let agent = store
        .resolve_credential(&req.credential)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Credential lookup failed");
            ServiceError::dependency("Failed to look up agent")
        })?
        .ok_or_else(|| {
            tracing::warn!("Unknown or inactive agent credential");
            ServiceError::unauthenticated("Invalid API key or agent not found")
        })?;

    let conversation_id = match req.target {
        ConversationTarget::New {
            session_id,
            visitor_id,
            metadata,
        } => {
            let conversation = store
                .create_conversation(&NewConversation {
                    agent_id: agent.id,
                    session_id,
                    visitor_id,
                    metadata,
                })
                .await
                .map_err(|e| {
                    tracing::error!(agent_id = %agent.id, error = %e, "Failed to create conversation");
                    ServiceError::dependency("Failed to create conversation")
                })?;
            tracing::info!(agent_id = %agent.id, conversation_id = %conversation.id, "Started conversation");
            conversation.id
        }
        ConversationTarget::Continue(raw) => {
            let id = Uuid::parse_str(&raw).map_err(|_| {
                tracing::warn!(agent_id = %agent.id, "Malformed conversationId");
                ServiceError::invalid("conversationId is not a valid identifier")
            })?;
            store
                .find_conversation(agent.id, id)
                .await
                .map_err(|e| {
                    tracing::error!(agent_id = %agent.id, conversation_id = %id, error = %e, "Conversation lookup failed");
                    ServiceError::dependency("Failed to load conversation")
                })?
                .ok_or_else(|| {
                    tracing::warn!(agent_id = %agent.id, conversation_id = %id, "Conversation not owned by agent");
                    ServiceError::invalid("Unknown conversation")
                })?
                .id
        }
    };

    store
        .append_message(&NewMessage::user(conversation_id, req.message))
        .await
        .map_err(|e| {
            tracing::error!(conversation_id = %conversation_id, error = %e, "Failed to save user message");
            ServiceError::dependency("Failed to save user message")
        })?;

    let history = store
        .recent_messages(conversation_id, HISTORY_LIMIT)
        .await
        .map_err(|e| {
            tracing::error!(conversation_id = %conversation_id, error = %e, "Failed to load history");
            ServiceError::dependency("Failed to load conversation history")
        })?;

    let completion_request = CompletionRequest {
        model: agent.model.clone(),
        messages: build_prompt(&agent, &history),
        temperature: agent.temperature,
        max_tokens: agent.max_tokens,
        top_p: agent.top_p,
    };

    let completion = provider.complete(&completion_request).await.map_err(|e| {
        tracing::error!(
            conversation_id = %conversation_id,
            provider = provider.name(),
            model = %agent.model,
            error = %e,
            "Inference call failed"
        );
        ServiceError::from(e)
    })?;

    let reply = reply_text(completion.content.as_ref());
    let tokens_used = completion
        .total_tokens
        .map(|t| i32::try_from(t).unwrap_or(i32::MAX))
        .unwrap_or(0);
    let response_time_ms = i32::try_from(started.elapsed().as_millis()).unwrap_or(i32::MAX);

    let saved = store
        .append_message(&NewMessage::assistant(
            conversation_id,
            reply.clone(),
            tokens_used,
            response_time_ms,
        ))
        .await
        .map_err(|e| {
            tracing::error!(conversation_id = %conversation_id, error = %e, "Failed to save assistant message");
            ServiceError::dependency("Failed to save assistant message")
        })?;

    tracing::info!(
        agent_id = %agent.id,
        conversation_id = %conversation_id,
        tokens_used,
        response_time_ms,
        history = history.len(),
        "Widget exchange completed"
    );

    Ok(ChatReply {
        message: reply,
        conversation_id,
        message_id: saved.id,
    })
}

// ============================================================================
// TESTS
// ============================================================================
