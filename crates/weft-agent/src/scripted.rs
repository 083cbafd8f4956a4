use std::collections::HashMap;

use futures::future::BoxFuture;
use serde_json::Value;

use weft_core::config::ScriptStep;
use weft_core::error::{Result, WeftError};
use weft_core::task::{ChildOutcome, HistoryEntry};
use weft_core::traits::AgentTurn;
use weft_core::types::{AgentDefinition, ToolCall, TurnContext};

/// Placeholder replaced by the latest tool result, child result, or answer.
pub const LAST_RESULT: &str = "$last";

/// Agent that replays canned tool calls, one per turn.
///
/// The step is picked by how many turns the node has already taken, so a
/// node resumed after a restart continues where it left off.
pub struct ScriptedAgent {
    scripts: HashMap<String, Vec<ScriptStep>>,
}

impl ScriptedAgent {
    pub fn new(scripts: HashMap<String, Vec<ScriptStep>>) -> Self {
        Self { scripts }
    }

    /// Next call for a node of `agent_id`, or `None` once the script runs out.
    pub fn step_for(&self, agent_id: &str, ctx: &TurnContext) -> Option<ToolCall> {
        let step = self.scripts.get(agent_id)?.get(ctx.turns_taken())?;
        let last = last_result(ctx);
        Some(ToolCall::new(&step.tool, substitute(&step.args, last.as_ref())))
    }
}

fn last_result(ctx: &TurnContext) -> Option<Value> {
    ctx.history.iter().rev().find_map(|entry| match entry {
        HistoryEntry::ToolResult { output, .. } => Some(output.clone()),
        HistoryEntry::ChildResult { outcome, .. } => Some(match outcome {
            ChildOutcome::Completed { result } => result
                .get("answer")
                .cloned()
                .unwrap_or_else(|| result.clone()),
            ChildOutcome::Failed { error } => error.to_payload(),
        }),
        HistoryEntry::ToolCall { .. } => None,
    })
}

fn substitute(args: &Value, last: Option<&Value>) -> Value {
    match args {
        Value::String(s) if s == LAST_RESULT => last.cloned().unwrap_or(Value::Null),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, last)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, last)))
                .collect(),
        ),
        other => other.clone(),
    }
}

impl AgentTurn for ScriptedAgent {
    fn take_turn<'a>(
        &'a self,
        agent: &'a AgentDefinition,
        ctx: &'a TurnContext,
    ) -> BoxFuture<'a, Result<ToolCall>> {
        Box::pin(async move {
            match self.step_for(&agent.id, ctx) {
                Some(call) => {
                    tracing::debug!(
                        agent = %agent.id,
                        node_id = %ctx.node_id,
                        tool = %call.name,
                        "scripted step"
                    );
                    Ok(call)
                }
                None => Err(WeftError::NoToolSelected),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::task::{FailureKind, NodeId, TaskError};

    fn ctx(history: Vec<HistoryEntry>) -> TurnContext {
        TurnContext {
            run_id: "r".into(),
            node_id: NodeId(0),
            payload: json!("task"),
            lineage: vec![],
            history,
            tools: vec![],
        }
    }

    fn agent() -> ScriptedAgent {
        let mut scripts = HashMap::new();
        scripts.insert(
            "research_manager".to_string(),
            vec![
                ScriptStep {
                    tool: "route_to_research_agent".into(),
                    args: json!({"request": "define vibe coding"}),
                },
                ScriptStep {
                    tool: "handoff".into(),
                    args: json!({"answer": "$last"}),
                },
            ],
        );
        ScriptedAgent::new(scripts)
    }

    #[test]
    fn steps_follow_turn_count() {
        let agent = agent();
        let first = agent.step_for("research_manager", &ctx(vec![])).unwrap();
        assert_eq!(first.name, "route_to_research_agent");

        let history = vec![
            HistoryEntry::ToolCall {
                name: "route_to_research_agent".into(),
                args: json!({"request": "define vibe coding"}),
            },
            HistoryEntry::ChildResult {
                child_id: NodeId(1),
                agent_id: "research_agent".into(),
                outcome: ChildOutcome::Completed {
                    result: json!({"answer": "X"}),
                },
            },
        ];
        let second = agent.step_for("research_manager", &ctx(history)).unwrap();
        assert_eq!(second, ToolCall::new("handoff", json!({"answer": "X"})));
    }

    #[test]
    fn failed_child_substitutes_error_payload() {
        let history = vec![
            HistoryEntry::ToolCall {
                name: "route_to_research_agent".into(),
                args: json!({}),
            },
            HistoryEntry::ChildResult {
                child_id: NodeId(1),
                agent_id: "research_agent".into(),
                outcome: ChildOutcome::Failed {
                    error: TaskError::new(FailureKind::ToolExecution, "boom"),
                },
            },
        ];
        let call = agent().step_for("research_manager", &ctx(history)).unwrap();
        assert_eq!(call.args["answer"]["error"]["kind"], "tool_execution");
    }

    #[tokio::test]
    async fn exhausted_script_selects_no_tool() {
        let scripted = agent();
        let history = vec![
            HistoryEntry::ToolCall {
                name: "a".into(),
                args: json!({}),
            },
            HistoryEntry::ToolCall {
                name: "b".into(),
                args: json!({}),
            },
        ];
        let definition = AgentDefinition::new("research_manager");
        let err = scripted
            .take_turn(&definition, &ctx(history))
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::NoToolSelected));

        let unknown = AgentDefinition::new("nobody");
        assert!(scripted.take_turn(&unknown, &ctx(vec![])).await.is_err());
    }
}
