//! Per-agent JSON config loader (spec §6 "Persisted state layout",
//! `agents/*.json`). Read-only from the core's point of view — agent
//! weights are mutated only by the out-of-scope optimizer.

use anyhow::{Context, Result};
use std::path::Path;

use crate::domain::agent::Agent;

pub fn load_agents_dir(dir: impl AsRef<Path>) -> Result<Vec<Agent>> {
    let dir = dir.as_ref();
    let mut agents = Vec::new();
    if !dir.exists() {
        return Ok(agents);
    }
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading agents dir {dir:?}"))? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading agent file {path:?}"))?;
        let agent: Agent =
            serde_json::from_str(&raw).with_context(|| format!("parsing agent file {path:?}"))?;
        agents.push(agent);
    }
    agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
    Ok(agents)
}
