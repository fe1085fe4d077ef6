//! Owner-scoped agent management.
//!
//! Every operation takes the authenticated owner's id. Agents belonging to
//! someone else are indistinguishable from missing ones.

use parley_core::models::{Agent, AgentPatch, AgentStatistics, CreateAgentInput};
use parley_core::store::AgentRepository;
use parley_core::{ServiceError, Store};
use uuid::Uuid;

fn agent_not_found() -> ServiceError {
    ServiceError::not_found("Agent not found")
}

fn storage(op: &'static str) -> impl Fn(parley_core::StoreError) -> ServiceError {
    move |e| {
        tracing::error!(operation = op, error = %e, "Agent store operation failed");
        ServiceError::from(e)
    }
}

pub async fn list(store: &dyn Store, owner: Uuid) -> Result<Vec<Agent>, ServiceError> {
    store.list_agents(owner).await.map_err(storage("list"))
}

pub async fn create(
    store: &dyn Store,
    owner: Uuid,
    input: CreateAgentInput,
) -> Result<Agent, ServiceError> {
    let new_agent = input.into_new_agent(owner)?;
    let agent = store.create_agent(&new_agent).await.map_err(storage("create"))?;
    tracing::info!(agent_id = %agent.id, owner = %owner, model = %agent.model, "Agent created");
    Ok(agent)
}

pub async fn get(store: &dyn Store, owner: Uuid, id: Uuid) -> Result<Agent, ServiceError> {
    store
        .get_agent(owner, id)
        .await
        .map_err(storage("get"))?
        .ok_or_else(agent_not_found)
}

pub async fn update(
    store: &dyn Store,
    owner: Uuid,
    id: Uuid,
    patch: AgentPatch,
) -> Result<Agent, ServiceError> {
    patch.validate()?;
    let agent = store
        .update_agent(owner, id, &patch)
        .await
        .map_err(storage("update"))?
        .ok_or_else(agent_not_found)?;
    tracing::info!(agent_id = %agent.id, active = agent.is_active, "Agent updated");
    Ok(agent)
}

pub async fn delete(store: &dyn Store, owner: Uuid, id: Uuid) -> Result<(), ServiceError> {
    if store.delete_agent(owner, id).await.map_err(storage("delete"))? {
        tracing::info!(agent_id = %id, "Agent deleted");
        Ok(())
    } else {
        Err(agent_not_found())
    }
}

pub async fn statistics(
    store: &dyn Store,
    owner: Uuid,
    id: Uuid,
) -> Result<AgentStatistics, ServiceError> {
    let agent = get(store, owner, id).await?;
    store
        .agent_statistics(agent.id)
        .await
        .map_err(storage("statistics"))
}
