#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::{json, Value};

use weft_agent::Orchestrator;
use weft_core::config::EngineConfig;
use weft_core::error::{Result, WeftError};
use weft_core::graph::GraphSnapshot;
use weft_core::task::{ChildOutcome, HistoryEntry};
use weft_core::traits::{AgentTurn, GraphStore, ToolHandler};
use weft_core::types::{ToolCall, TurnContext};
use weft_store::MemoryGraphStore;
use weft_test_utils::{call, research_agents, research_tools};

/// Memory store that remembers the last snapshot and can simulate a crash
/// by refusing every save after a budget runs out.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryGraphStore,
    latest: Mutex<Option<GraphSnapshot>>,
    saves: AtomicUsize,
    crash_after: Mutex<Option<usize>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<GraphSnapshot> {
        self.latest.lock().unwrap().clone()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Let `n` more saves through, then fail every save.
    pub fn crash_after(&self, n: usize) {
        *self.crash_after.lock().unwrap() = Some(n);
    }

    pub fn recover(&self) {
        *self.crash_after.lock().unwrap() = None;
    }
}

impl GraphStore for RecordingStore {
    fn save(&self, snapshot: &GraphSnapshot) -> BoxFuture<'_, Result<()>> {
        let snapshot = snapshot.clone();
        Box::pin(async move {
            {
                let mut budget = self.crash_after.lock().unwrap();
                if let Some(remaining) = budget.as_mut() {
                    if *remaining == 0 {
                        return Err(WeftError::Store("simulated crash".into()));
                    }
                    *remaining -= 1;
                }
            }
            self.inner.save(&snapshot).await?;
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.latest.lock().unwrap() = Some(snapshot);
            Ok(())
        })
    }

    fn load(&self, run_id: &str) -> BoxFuture<'_, Result<GraphSnapshot>> {
        self.inner.load(run_id)
    }

    fn list_runs(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        self.inner.list_runs()
    }

    fn delete(&self, run_id: &str) -> BoxFuture<'_, Result<bool>> {
        self.inner.delete(run_id)
    }
}

/// The most recent child outcome in a turn's history.
pub fn last_child_outcome(ctx: &TurnContext) -> Option<&ChildOutcome> {
    ctx.history.iter().rev().find_map(|e| match e {
        HistoryEntry::ChildResult { outcome, .. } => Some(outcome),
        _ => None,
    })
}

/// The most recent tool result in a turn's history.
pub fn last_tool_output(ctx: &TurnContext) -> Option<&Value> {
    ctx.history.iter().rev().find_map(|e| match e {
        HistoryEntry::ToolResult { output, .. } => Some(output),
        _ => None,
    })
}

/// Manager delegates once and hands back whatever the child produced.
/// Researcher searches once and hands back the search result.
pub fn research_turn(agent_id: &str, ctx: &TurnContext) -> Result<ToolCall> {
    match agent_id {
        "research_manager" => match last_child_outcome(ctx) {
            None => Ok(call(
                "route_to_research_agent",
                json!({ "request": ctx.payload.as_str().unwrap_or_default() }),
            )),
            Some(ChildOutcome::Completed { result }) => {
                Ok(call("handoff", json!({ "answer": result["answer"].clone() })))
            }
            Some(ChildOutcome::Failed { error }) => Ok(call(
                "handoff",
                json!({ "answer": format!("research failed: {}", error.message) }),
            )),
        },
        "research_agent" => match last_tool_output(ctx) {
            None => Ok(call("search_web", json!({ "query": "vibe coding" }))),
            Some(output) => Ok(call("handoff", json!({ "answer": output["result"].clone() }))),
        },
        other => Err(WeftError::AgentResponse(format!("no behavior for {}", other))),
    }
}

/// Orchestrator with the research team registered.
pub fn research_orchestrator(
    agent: Arc<dyn AgentTurn>,
    store: Arc<dyn GraphStore>,
    search: impl ToolHandler,
) -> Orchestrator {
    let mut orch = Orchestrator::new(agent, store, EngineConfig::default());
    for def in research_agents() {
        orch.register_agent(def).unwrap();
    }
    for spec in research_tools(search) {
        orch.register_tool(spec).unwrap();
    }
    orch
}
