use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use weft_core::agents::AgentRegistry;
use weft_core::error::{Result, WeftError};
use weft_core::task::HUMAN_AGENT;
use weft_core::traits::ToolHandler;
use weft_core::types::{AgentDefinition, ToolContext, ToolDefinition};

use crate::schema;

/// How the driver treats a tool call. Resolved once, at registration.
#[derive(Clone)]
pub enum ToolKind {
    /// Runs an external handler; the node keeps its turn.
    Ordinary(Arc<dyn ToolHandler>),
    /// Spawns a child node for `target` and blocks on it.
    Delegate { target: String },
    /// Spawns a human node and suspends on it.
    AskHuman,
    /// Completes the node with the call's arguments.
    Handoff,
}

impl ToolKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ordinary(_) => "ordinary",
            Self::Delegate { .. } => "delegate",
            Self::AskHuman => "ask_human",
            Self::Handoff => "handoff",
        }
    }
}

impl std::fmt::Debug for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delegate { target } => f.debug_struct("Delegate").field("target", target).finish(),
            other => f.write_str(other.label()),
        }
    }
}

/// A registered tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub kind: ToolKind,
}

impl ToolSpec {
    pub fn ordinary(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        handler: impl ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            kind: ToolKind::Ordinary(Arc::new(handler)),
        }
    }

    pub fn delegate(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            kind: ToolKind::Delegate {
                target: target.into(),
            },
        }
    }

    pub fn ask_human(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            kind: ToolKind::AskHuman,
        }
    }

    pub fn handoff(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            kind: ToolKind::Handoff,
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, ToolSpec>,
    default_timeout_secs: u64,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            default_timeout_secs: 30,
        }
    }

    /// Set the timeout used by handlers without their own override.
    pub fn with_default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    /// Register a tool, replacing any previous tool with the same name.
    ///
    /// Fails if the name is empty, the schema is malformed, or a delegate
    /// tool points at an agent that is not registered.
    pub fn register(&mut self, spec: ToolSpec, agents: &AgentRegistry) -> Result<()> {
        if spec.name.trim().is_empty() {
            return Err(WeftError::Validation("tool name must not be empty".into()));
        }
        schema::check_schema(&spec.input_schema).map_err(|e| {
            WeftError::Validation(format!("tool '{}' has a malformed schema: {}", spec.name, e))
        })?;
        if let ToolKind::Delegate { ref target } = spec.kind {
            if target == HUMAN_AGENT {
                return Err(WeftError::Validation(format!(
                    "tool '{}' cannot delegate to '{}'; use an ask-human tool",
                    spec.name, HUMAN_AGENT
                )));
            }
            if !agents.contains(target) {
                return Err(WeftError::Validation(format!(
                    "tool '{}' delegates to unregistered agent '{}'",
                    spec.name, target
                )));
            }
        }

        self.tools.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    /// List all registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Definitions of the tools an agent may call, in the agent's order.
    ///
    /// Names the registry does not know are skipped.
    pub fn definitions_for(&self, agent: &AgentDefinition) -> Vec<ToolDefinition> {
        agent
            .allowed_tools
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(ToolSpec::definition)
            .collect()
    }

    /// Resolve a tool call for an agent and check its arguments.
    pub fn resolve(
        &self,
        agent: &AgentDefinition,
        name: &str,
        args: &serde_json::Value,
    ) -> Result<&ToolSpec> {
        if !agent.allows(name) {
            return Err(WeftError::ToolValidation(format!(
                "agent '{}' is not allowed to call '{}'",
                agent.id, name
            )));
        }
        let spec = self
            .get(name)
            .ok_or_else(|| WeftError::ToolValidation(format!("unknown tool '{}'", name)))?;
        schema::validate(args, &spec.input_schema)
            .map_err(|e| WeftError::ToolValidation(format!("{}: {}", name, e)))?;
        Ok(spec)
    }

    /// Execute an ordinary tool by name.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<serde_json::Value> {
        let spec = self
            .get(name)
            .ok_or_else(|| WeftError::ToolValidation(format!("unknown tool '{}'", name)))?;
        let ToolKind::Ordinary(ref handler) = spec.kind else {
            return Err(WeftError::Validation(format!(
                "tool '{}' is a {} tool and has no handler",
                name,
                spec.kind.label()
            )));
        };

        let timeout_secs = handler.timeout_secs().unwrap_or(self.default_timeout_secs);
        let timeout = Duration::from_secs(timeout_secs);

        match tokio::time::timeout(timeout, handler.invoke(args, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(WeftError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
