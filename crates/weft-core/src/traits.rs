use futures::future::BoxFuture;

use crate::error::Result;
use crate::graph::GraphSnapshot;
use crate::types::{AgentDefinition, ToolCall, ToolContext, TurnContext};

/// The model-calling collaborator: picks one tool call per turn.
///
/// Must return exactly one tool choice per call, or
/// `WeftError::NoToolSelected` when the agent answered without one.
pub trait AgentTurn: Send + Sync + 'static {
    fn take_turn<'a>(
        &'a self,
        agent: &'a AgentDefinition,
        ctx: &'a TurnContext,
    ) -> BoxFuture<'a, Result<ToolCall>>;
}

/// Handler behind an ordinary tool.
pub trait ToolHandler: Send + Sync + 'static {
    /// Run the tool with arguments that already passed schema validation.
    fn invoke(
        &self,
        args: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;

    /// Per-tool timeout override in seconds.
    fn timeout_secs(&self) -> Option<u64> {
        None
    }
}

/// Snapshot persistence backend.
pub trait GraphStore: Send + Sync + 'static {
    /// Write a whole-graph snapshot atomically.
    ///
    /// Fails with `WeftError::Conflict` unless `snapshot.version` is exactly
    /// one past the stored version (any version is accepted for a new run).
    fn save(&self, snapshot: &GraphSnapshot) -> BoxFuture<'_, Result<()>>;

    /// Load the latest snapshot for a run, or `WeftError::NotFound`.
    fn load(&self, run_id: &str) -> BoxFuture<'_, Result<GraphSnapshot>>;

    /// Ids of every stored run.
    fn list_runs(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Remove a run. Returns whether it existed.
    fn delete(&self, run_id: &str) -> BoxFuture<'_, Result<bool>>;
}
