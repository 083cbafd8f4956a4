use std::collections::HashMap;

use crate::error::{Result, WeftError};
use crate::task::HUMAN_AGENT;
use crate::types::AgentDefinition;

/// Registry of agents by id.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentDefinition>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent, replacing any previous definition with the same id.
    pub fn register(&mut self, agent: AgentDefinition) -> Result<()> {
        if agent.id.trim().is_empty() {
            return Err(WeftError::Validation("agent id must not be empty".into()));
        }
        if agent.id == HUMAN_AGENT {
            return Err(WeftError::Validation(format!(
                "'{}' is reserved for human nodes",
                HUMAN_AGENT
            )));
        }
        self.agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&AgentDefinition> {
        self.agents.get(id)
    }

    /// Look up an agent, failing with `NotFound`.
    pub fn require(&self, id: &str) -> Result<&AgentDefinition> {
        self.get(id)
            .ok_or_else(|| WeftError::NotFound(format!("agent '{}'", id)))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// All registered agent ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.agents.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
