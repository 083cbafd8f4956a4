use thiserror::Error;

use crate::task::{NodeId, TaskStatus};

#[derive(Debug, Error)]
pub enum WeftError {
    // Registration errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Graph errors
    #[error("Invalid transition for node {node}: {from} -> {to}")]
    InvalidTransition {
        node: NodeId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    // Tool errors
    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    // Agent errors
    #[error("Agent responded without selecting a tool")]
    NoToolSelected,

    #[error("Agent response error: {0}")]
    AgentResponse(String),

    #[error("Agent turn timeout after {0}s")]
    TurnTimeout(u64),

    // Storage errors
    #[error("Snapshot conflict for run {run_id}: expected version {expected}, found {found}")]
    Conflict {
        run_id: String,
        expected: u64,
        found: u64,
    },

    #[error("Store error: {0}")]
    Store(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WeftError {
    /// Whether this error belongs to a single node rather than the caller.
    ///
    /// Node-local errors are recorded on the failing node and surfaced to its
    /// parent; everything else aborts the operation that raised it.
    pub fn is_node_local(&self) -> bool {
        matches!(
            self,
            Self::ToolValidation(_)
                | Self::ToolExecution { .. }
                | Self::ToolTimeout { .. }
                | Self::NoToolSelected
                | Self::AgentResponse(_)
                | Self::TurnTimeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_local_classification() {
        assert!(WeftError::NoToolSelected.is_node_local());
        assert!(WeftError::ToolExecution {
            tool: "search_web".into(),
            message: "boom".into()
        }
        .is_node_local());
        assert!(!WeftError::NotFound("node 7".into()).is_node_local());
        assert!(!WeftError::Validation("bad schema".into()).is_node_local());
    }

    #[test]
    fn transition_message_names_states() {
        let err = WeftError::InvalidTransition {
            node: NodeId(3),
            from: TaskStatus::Completed,
            to: TaskStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for node 3: completed -> running"
        );
    }
}
