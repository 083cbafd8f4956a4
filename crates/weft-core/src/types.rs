use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{HistoryEntry, NodeId, TaskError};

/// Persistence scope for one task-graph forest.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: String,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_id(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.run_id)
    }
}

/// An agent's capability set. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Tool names this agent may call, in declaration order.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Opaque instruction text for the agent collaborator.
    #[serde(default)]
    pub instructions: String,
    /// Opaque model hint for the agent collaborator.
    #[serde(default)]
    pub model_preference: Option<String>,
}

impl AgentDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            allowed_tools: Vec::new(),
            instructions: String::new(),
            model_preference: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the tools this agent can use. Duplicates are dropped.
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools.clear();
        for tool in tools {
            let tool = tool.into();
            if !self.allowed_tools.contains(&tool) {
                self.allowed_tools.push(tool);
            }
        }
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_preference = Some(model.into());
        self
    }

    pub fn allows(&self, tool: &str) -> bool {
        self.allowed_tools.iter().any(|t| t == tool)
    }
}

/// The single tool an agent chose on its turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Tool definition handed to the agent collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// One ancestor (or the node itself) in a node's lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEntry {
    pub node_id: NodeId,
    pub agent_id: String,
    pub payload: serde_json::Value,
    /// That node's tool record up to now.
    pub history: Vec<HistoryEntry>,
}

/// Everything an agent sees when it takes a turn on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnContext {
    pub run_id: String,
    pub node_id: NodeId,
    pub payload: serde_json::Value,
    /// Root first, ending with this node.
    pub lineage: Vec<LineageEntry>,
    /// This node's own tool calls, tool results, and child results.
    pub history: Vec<HistoryEntry>,
    /// The tools this agent may call.
    pub tools: Vec<ToolDefinition>,
}

impl TurnContext {
    /// Agent turns already taken on this node.
    pub fn turns_taken(&self) -> usize {
        self.history
            .iter()
            .filter(|e| matches!(e, HistoryEntry::ToolCall { .. }))
            .count()
    }

    /// The most recent entry in the node's history.
    pub fn last_entry(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }
}

/// Context passed to ordinary tool handlers.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub run_id: String,
    pub node_id: NodeId,
    pub agent_id: String,
}

/// Engine event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A driver invocation started or resumed a root.
    RunStarted { run_id: String, root_id: NodeId, resumed: bool },
    /// A node was added to the graph.
    NodeCreated { node_id: NodeId, agent_id: String, parent_id: Option<NodeId> },
    /// A node was handed to its agent.
    NodeStarted { node_id: NodeId, agent_id: String },
    /// An agent chose a tool.
    ToolInvoked { node_id: NodeId, tool: String },
    /// A node handed off its result.
    NodeCompleted { node_id: NodeId },
    /// A node failed.
    NodeFailed { node_id: NodeId, error: TaskError },
    /// A node is waiting on a human question.
    NodeSuspended { node_id: NodeId, human_id: NodeId },
    /// A human question was answered.
    HumanAnswered { node_id: NodeId },
    /// The run yielded back to the caller for human input.
    RunSuspended { run_id: String, root_id: NodeId, pending: Vec<NodeId> },
    /// The root reached a terminal state.
    RunFinished { run_id: String, root_id: NodeId, succeeded: bool },
}

impl EngineEvent {
    /// Whether this is the last event a driver invocation publishes.
    pub fn ends_run(&self) -> bool {
        matches!(self, Self::RunSuspended { .. } | Self::RunFinished { .. })
    }
}
