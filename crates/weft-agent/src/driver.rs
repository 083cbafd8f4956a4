use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use weft_core::agents::AgentRegistry;
use weft_core::config::EngineConfig;
use weft_core::error::{Result, WeftError};
use weft_core::event::EventBus;
use weft_core::graph::TaskGraph;
use weft_core::task::{FailureKind, HistoryEntry, NodeId, TaskError, TaskNode, TaskStatus, HUMAN_AGENT};
use weft_core::traits::{AgentTurn, GraphStore};
use weft_core::types::{AgentDefinition, EngineEvent, ToolCall, ToolContext};
use weft_tools::{ToolKind, ToolRegistry};

use crate::context::build_turn_context;

/// How a `run` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// The root reached Completed or Failed.
    Completed,
    /// Waiting on one or more human answers.
    Suspended,
}

/// A human question waiting for an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingQuestion {
    pub node_id: NodeId,
    /// The node that asked.
    pub asked_by: Option<NodeId>,
    pub question: Value,
}

impl PendingQuestion {
    pub fn from_node(node: &TaskNode) -> Self {
        Self {
            node_id: node.id,
            asked_by: node.parent_id,
            question: node.payload.clone(),
        }
    }

    /// The question as display text.
    pub fn text(&self) -> String {
        match self.question {
            Value::String(ref s) => s.clone(),
            ref other => other.to_string(),
        }
    }
}

/// Result of one driver invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub run_id: String,
    pub root_id: NodeId,
    /// The root's result; for a failed root, its `{"error": ...}` payload.
    pub result: Option<Value>,
    pub error: Option<TaskError>,
    pub pending: Vec<PendingQuestion>,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn is_suspended(&self) -> bool {
        self.status == RunStatus::Suspended
    }

    /// Completed with the root Failed.
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// What a single agent turn did to its node.
enum TurnEnd {
    /// The node keeps the turn (ordinary tool).
    Continue,
    /// The node gave up control: blocked, suspended, completed, or failed.
    Yield,
}

/// Sequential state machine over one run's task graph.
///
/// Every mutation is committed to the store before the next step, so a
/// crash loses at most the step in flight.
pub struct ExecutionDriver<'a> {
    pub run_id: &'a str,
    pub agents: &'a AgentRegistry,
    pub tools: &'a ToolRegistry,
    pub agent_turn: &'a dyn AgentTurn,
    pub store: &'a dyn GraphStore,
    pub events: &'a EventBus,
    pub config: &'a EngineConfig,
}

impl<'a> ExecutionDriver<'a> {
    /// Bump the version and save a snapshot.
    pub async fn commit(&self, graph: &mut TaskGraph) -> Result<()> {
        graph.bump_version();
        self.store.save(&graph.to_snapshot(self.run_id)).await
    }

    /// Drive `root` until it finishes or only human questions remain.
    pub async fn drive(&self, graph: &mut TaskGraph, root: NodeId) -> Result<RunOutcome> {
        loop {
            let Some(next) = graph.driver_ready_under(root).first().copied() else {
                return self.finish(graph, root);
            };
            self.run_node(graph, next).await?;
        }
    }

    fn finish(&self, graph: &TaskGraph, root: NodeId) -> Result<RunOutcome> {
        let node = graph.get_node(root)?;

        if node.status.is_terminal() {
            if !graph.is_terminal(root) {
                warn!(run_id = %self.run_id, root_id = %root, "root finished with unfinished descendants");
            }
            let succeeded = node.status == TaskStatus::Completed;
            let (result, error) = match node.error {
                Some(ref err) if !succeeded => (Some(err.to_payload()), Some(err.clone())),
                _ => (node.result.clone(), None),
            };
            info!(run_id = %self.run_id, root_id = %root, succeeded, "run finished");
            self.events.publish(EngineEvent::RunFinished {
                run_id: self.run_id.to_string(),
                root_id: root,
                succeeded,
            });
            return Ok(RunOutcome {
                status: RunStatus::Completed,
                run_id: self.run_id.to_string(),
                root_id: root,
                result,
                error,
                pending: Vec::new(),
            });
        }

        let pending: Vec<PendingQuestion> = graph
            .pending_human_under(root)
            .into_iter()
            .map(PendingQuestion::from_node)
            .collect();
        if pending.is_empty() {
            warn!(run_id = %self.run_id, root_id = %root, "run stalled with no pending questions");
        }
        info!(
            run_id = %self.run_id,
            root_id = %root,
            pending = pending.len(),
            "run suspended for human input"
        );
        self.events.publish(EngineEvent::RunSuspended {
            run_id: self.run_id.to_string(),
            root_id: root,
            pending: pending.iter().map(|p| p.node_id).collect(),
        });
        Ok(RunOutcome {
            status: RunStatus::Suspended,
            run_id: self.run_id.to_string(),
            root_id: root,
            result: None,
            error: None,
            pending,
        })
    }

    /// Give a ready node its turns until it yields.
    async fn run_node(&self, graph: &mut TaskGraph, node_id: NodeId) -> Result<()> {
        let (agent_id, previous, blocked) = {
            let node = graph.get_node(node_id)?;
            (node.agent_id.clone(), node.status, node.blocked_on)
        };
        let agent = self.agents.get(&agent_id).ok_or_else(|| {
            warn!(node_id = %node_id, agent = %agent_id, "node owned by an unregistered agent");
            WeftError::NotFound(format!(
                "agent '{}' for node {} is not registered; re-register it or run `weft cancel {}` to unblock the run",
                agent_id, node_id, node_id.0
            ))
        })?;

        if previous == TaskStatus::Running && blocked.is_none() {
            warn!(node_id = %node_id, agent = %agent_id, "resuming an interrupted turn");
        }
        let absorbed = graph.resume(node_id)?;
        self.commit(graph).await?;

        if previous == TaskStatus::Pending {
            self.events.publish(EngineEvent::NodeStarted {
                node_id,
                agent_id: agent_id.clone(),
            });
        }
        if let Some(HistoryEntry::ChildResult { child_id, .. }) = absorbed {
            debug!(node_id = %node_id, child_id = %child_id, "child outcome absorbed");
        }

        loop {
            match self.take_turn(graph, node_id, agent).await? {
                TurnEnd::Continue => continue,
                TurnEnd::Yield => return Ok(()),
            }
        }
    }

    async fn take_turn(
        &self,
        graph: &mut TaskGraph,
        node_id: NodeId,
        agent: &AgentDefinition,
    ) -> Result<TurnEnd> {
        let turns = graph.get_node(node_id)?.turns_taken();
        if turns >= self.config.max_turns_per_node {
            let error = TaskError::new(
                FailureKind::MaxTurnsExceeded,
                format!("gave up after {} agent turns", turns),
            );
            self.fail(graph, node_id, error).await?;
            return Ok(TurnEnd::Yield);
        }

        let ctx = build_turn_context(graph, self.run_id, node_id, agent, self.tools)?;
        let timeout_secs = self.config.turn_timeout_secs;
        let reply = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.agent_turn.take_turn(agent, &ctx),
        )
        .await
        {
            Ok(reply) => reply,
            Err(_) => Err(WeftError::TurnTimeout(timeout_secs)),
        };

        let call = match reply {
            Ok(call) => call,
            Err(e) => {
                self.fail(graph, node_id, agent_failure(&e)).await?;
                return Ok(TurnEnd::Yield);
            }
        };

        debug!(node_id = %node_id, agent = %agent.id, tool = %call.name, turn = turns + 1, "agent chose tool");
        self.events.publish(EngineEvent::ToolInvoked {
            node_id,
            tool: call.name.clone(),
        });

        let kind = match self.tools.resolve(agent, &call.name, &call.args) {
            Ok(spec) => spec.kind.clone(),
            Err(e) => {
                graph.record(node_id, call_entry(&call))?;
                self.fail(graph, node_id, agent_failure(&e)).await?;
                return Ok(TurnEnd::Yield);
            }
        };

        self.dispatch(graph, node_id, agent, call, kind).await
    }

    async fn dispatch(
        &self,
        graph: &mut TaskGraph,
        node_id: NodeId,
        agent: &AgentDefinition,
        call: ToolCall,
        kind: ToolKind,
    ) -> Result<TurnEnd> {
        graph.record(node_id, call_entry(&call))?;

        match kind {
            ToolKind::Ordinary(_) => {
                self.commit(graph).await?;
                let ctx = ToolContext {
                    run_id: self.run_id.to_string(),
                    node_id,
                    agent_id: agent.id.clone(),
                };
                match self.tools.execute(&call.name, call.args, ctx).await {
                    Ok(output) => {
                        graph.record(
                            node_id,
                            HistoryEntry::ToolResult {
                                name: call.name,
                                output,
                            },
                        )?;
                        self.commit(graph).await?;
                        Ok(TurnEnd::Continue)
                    }
                    Err(e) => {
                        self.fail(graph, node_id, tool_failure(&call.name, &e)).await?;
                        Ok(TurnEnd::Yield)
                    }
                }
            }
            ToolKind::Delegate { target } => {
                let child = graph.create_node(target.as_str(), call.args, Some(node_id))?;
                graph.block_on(node_id, child)?;
                self.commit(graph).await?;
                info!(node_id = %node_id, child_id = %child, target = %target, "delegated");
                self.events.publish(EngineEvent::NodeCreated {
                    node_id: child,
                    agent_id: target,
                    parent_id: Some(node_id),
                });
                Ok(TurnEnd::Yield)
            }
            ToolKind::AskHuman => {
                let question = match call.args.get("question") {
                    Some(Value::String(q)) => Value::String(q.clone()),
                    _ => call.args,
                };
                let human = graph.create_node(HUMAN_AGENT, question, Some(node_id))?;
                graph.suspend_on(node_id, human)?;
                self.commit(graph).await?;
                info!(node_id = %node_id, human_id = %human, "suspended on human question");
                self.events.publish(EngineEvent::NodeCreated {
                    node_id: human,
                    agent_id: HUMAN_AGENT.to_string(),
                    parent_id: Some(node_id),
                });
                self.events.publish(EngineEvent::NodeSuspended {
                    node_id,
                    human_id: human,
                });
                Ok(TurnEnd::Yield)
            }
            ToolKind::Handoff => {
                graph.complete_task(node_id, call.args)?;
                self.commit(graph).await?;
                info!(node_id = %node_id, agent = %agent.id, "handed off");
                self.events.publish(EngineEvent::NodeCompleted { node_id });
                Ok(TurnEnd::Yield)
            }
        }
    }

    async fn fail(&self, graph: &mut TaskGraph, node_id: NodeId, error: TaskError) -> Result<()> {
        warn!(node_id = %node_id, kind = ?error.kind, error = %error.message, "node failed");
        graph.fail_task(node_id, error.clone())?;
        self.commit(graph).await?;
        self.events.publish(EngineEvent::NodeFailed { node_id, error });
        Ok(())
    }
}

fn call_entry(call: &ToolCall) -> HistoryEntry {
    HistoryEntry::ToolCall {
        name: call.name.clone(),
        args: call.args.clone(),
    }
}

/// Map an error from the agent or tool resolution to a node failure.
///
/// Errors that are not node-local come from the collaborator's own plumbing
/// and are labelled as such; they still fail only this node.
fn agent_failure(err: &WeftError) -> TaskError {
    match err {
        WeftError::NoToolSelected | WeftError::ToolValidation(_) => {
            TaskError::new(FailureKind::ToolValidation, err.to_string())
        }
        e if e.is_node_local() => TaskError::new(FailureKind::AgentResponse, e.to_string()),
        other => TaskError::new(
            FailureKind::AgentResponse,
            format!("agent collaborator failed: {}", other),
        ),
    }
}

/// Map an error from an ordinary tool handler to a node failure.
fn tool_failure(tool: &str, err: &WeftError) -> TaskError {
    match err {
        WeftError::ToolValidation(_) => TaskError::new(FailureKind::ToolValidation, err.to_string()),
        e if e.is_node_local() => TaskError::new(FailureKind::ToolExecution, e.to_string()),
        other => TaskError::new(
            FailureKind::ToolExecution,
            format!("{} failed: {}", tool, other),
        ),
    }
}
