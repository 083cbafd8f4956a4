//! Mocks and fixtures shared by the Weft test suites.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use weft_core::error::{Result, WeftError};
use weft_core::traits::{AgentTurn, ToolHandler};
use weft_core::types::{AgentDefinition, ToolCall, ToolContext, TurnContext};
use weft_tools::{builtin, ToolSpec};

type TurnFn = dyn Fn(&AgentDefinition, &TurnContext) -> Result<ToolCall> + Send + Sync;

/// Agent driven by a closure. Records every context it is shown.
pub struct FnAgent {
    turn: Box<TurnFn>,
    seen: Mutex<Vec<(String, TurnContext)>>,
}

impl FnAgent {
    pub fn new<F>(turn: F) -> Self
    where
        F: Fn(&AgentDefinition, &TurnContext) -> Result<ToolCall> + Send + Sync + 'static,
    {
        Self {
            turn: Box::new(turn),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Every `(agent id, context)` pair seen so far, in order.
    pub fn seen(&self) -> Vec<(String, TurnContext)> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Contexts seen by one agent.
    pub fn seen_by(&self, agent_id: &str) -> Vec<TurnContext> {
        self.seen()
            .into_iter()
            .filter(|(id, _)| id == agent_id)
            .map(|(_, ctx)| ctx)
            .collect()
    }

    pub fn turn_count(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or_default()
    }
}

impl AgentTurn for FnAgent {
    fn take_turn<'a>(
        &'a self,
        agent: &'a AgentDefinition,
        ctx: &'a TurnContext,
    ) -> BoxFuture<'a, Result<ToolCall>> {
        Box::pin(async move {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push((agent.id.clone(), ctx.clone()));
            }
            (self.turn)(agent, ctx)
        })
    }
}

/// Agent whose turns never return.
pub struct StalledAgent;

impl AgentTurn for StalledAgent {
    fn take_turn<'a>(
        &'a self,
        _agent: &'a AgentDefinition,
        _ctx: &'a TurnContext,
    ) -> BoxFuture<'a, Result<ToolCall>> {
        Box::pin(futures::future::pending())
    }
}

/// Ordinary tool returning `{"result": "<prefix><query>"}` and counting calls.
pub struct EchoTool {
    prefix: String,
    calls: Arc<AtomicUsize>,
}

impl EchoTool {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter, usable after the tool is moved into a registry.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl ToolHandler for EchoTool {
    fn invoke(&self, args: Value, _ctx: ToolContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let query = args["query"].as_str().unwrap_or_default();
            Ok(json!({ "result": format!("{}{}", self.prefix, query) }))
        })
    }
}

/// Ordinary tool that always fails.
pub struct FailingTool {
    message: String,
}

impl FailingTool {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ToolHandler for FailingTool {
    fn invoke(&self, _args: Value, _ctx: ToolContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            Err(WeftError::ToolExecution {
                tool: "failing".into(),
                message: self.message.clone(),
            })
        })
    }
}

/// Ordinary tool that sleeps before answering.
pub struct SlowTool {
    delay: Duration,
    timeout_secs: Option<u64>,
}

impl SlowTool {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

impl ToolHandler for SlowTool {
    fn invoke(&self, _args: Value, _ctx: ToolContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(json!({ "result": "late" }))
        })
    }

    fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }
}

/// Schema for tools taking a single string `query`.
pub fn query_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "query": { "type": "string" } },
        "required": ["query"]
    })
}

/// The manager/researcher pair used throughout the tests.
pub fn research_agents() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition::new("research_agent")
            .with_description("Web research specialist")
            .with_tools(["search_web", "ask_master", "handoff"]),
        AgentDefinition::new("research_manager")
            .with_description("Coordinates research")
            .with_tools(["route_to_research_agent", "ask_master", "handoff"]),
    ]
}

/// Tools for [`research_agents`], with `search_web` backed by `search`.
///
/// Register after the agents so the delegate target resolves.
pub fn research_tools(search: impl ToolHandler) -> Vec<ToolSpec> {
    vec![
        ToolSpec::ordinary("search_web", "Search the web", query_schema(), search),
        builtin::route_to("research_agent"),
        builtin::ask_master(),
        builtin::handoff(),
    ]
}

/// Shorthand for building a tool call.
pub fn call(name: &str, args: Value) -> ToolCall {
    ToolCall::new(name, args)
}
