//! Startup agent sync: a static agents file is the source of truth for which
//! backends exist; rows are upserted so redeploys pick up endpoint changes
//! without losing health/liveness state.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::store::{AgentUpsert, ChatStore};

#[derive(Debug, Deserialize)]
pub struct AgentsConfigFile {
    pub agents: Vec<AgentUpsert>,
}

/// Parse the agents config file (JSON: `{"agents": [...]}`).
pub fn load_agents_config(path: &Path) -> Result<Vec<AgentUpsert>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read agents config at '{}'", path.display()))?;
    let config: AgentsConfigFile = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse agents config at '{}'", path.display()))?;
    Ok(config.agents)
}

/// Upsert every configured agent into the store.
pub async fn sync_agents(store: &ChatStore, agents: &[AgentUpsert]) -> Result<()> {
    for agent in agents {
        store.upsert_agent(agent).await?;
    }
    info!("Synced {} agent(s) from config", agents.len());
    Ok(())
}
