use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent id reserved for nodes answered by an external human.
pub const HUMAN_AGENT: &str = "human";

/// Task node identifier. Allocated in creation order and never reused.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse().map(NodeId)
    }
}

/// Lifecycle status of a task node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Suspended,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a node failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The agent picked no tool, an unknown or disallowed tool, or bad arguments.
    ToolValidation,
    /// An ordinary tool handler returned an error or timed out.
    ToolExecution,
    /// The agent collaborator itself failed or returned garbage.
    AgentResponse,
    /// The node used up its turn allowance without finishing.
    MaxTurnsExceeded,
    Cancelled,
}

/// Failure payload recorded on a failed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "cancelled")
    }

    /// JSON shape handed back to callers when a run ends in failure.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({ "error": { "kind": self.kind, "message": self.message } })
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = serde_json::to_value(self.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        write!(f, "{}: {}", kind, self.message)
    }
}

/// What a finished child handed back to its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ChildOutcome {
    Completed { result: serde_json::Value },
    Failed { error: TaskError },
}

/// One entry in a node's own conversation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEntry {
    /// The agent chose a tool.
    ToolCall {
        name: String,
        args: serde_json::Value,
    },
    /// An ordinary tool returned.
    ToolResult {
        name: String,
        output: serde_json::Value,
    },
    /// A delegated child or human question finished.
    ChildResult {
        child_id: NodeId,
        agent_id: String,
        outcome: ChildOutcome,
    },
}

/// A unit of work owned by one agent or by the human actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: NodeId,
    pub agent_id: String,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    #[serde(default)]
    pub children: Vec<NodeId>,
    /// Child this node is waiting on (a delegate or a human question).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_on: Option<NodeId>,
    /// Who started the run. Only set on roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskNode {
    pub fn new(
        id: NodeId,
        agent_id: impl Into<String>,
        payload: serde_json::Value,
        parent_id: Option<NodeId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            agent_id: agent_id.into(),
            payload,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            parent_id,
            children: Vec::new(),
            blocked_on: None,
            initiator: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_human(&self) -> bool {
        self.agent_id == HUMAN_AGENT
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// A human node nobody has answered yet.
    pub fn is_pending_for_human(&self) -> bool {
        self.is_human() && self.status == TaskStatus::Pending
    }

    /// Number of agent turns this node has taken.
    pub fn turns_taken(&self) -> usize {
        self.history
            .iter()
            .filter(|e| matches!(e, HistoryEntry::ToolCall { .. }))
            .count()
    }

    /// The payload rendered as plain text (strings unquoted).
    pub fn payload_text(&self) -> String {
        match &self.payload {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// What this node hands to its parent, if it is finished.
    pub fn outcome(&self) -> Option<ChildOutcome> {
        match self.status {
            TaskStatus::Completed => Some(ChildOutcome::Completed {
                result: self.result.clone().unwrap_or(serde_json::Value::Null),
            }),
            TaskStatus::Failed => Some(ChildOutcome::Failed {
                error: self
                    .error
                    .clone()
                    .unwrap_or_else(|| TaskError::new(FailureKind::AgentResponse, "unknown failure")),
            }),
            _ => None,
        }
    }
}
