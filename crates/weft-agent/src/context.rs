use weft_core::error::Result;
use weft_core::graph::TaskGraph;
use weft_core::task::NodeId;
use weft_core::types::{AgentDefinition, LineageEntry, TurnContext};
use weft_tools::ToolRegistry;

/// Assemble what an agent sees for one turn on `node_id`.
pub fn build_turn_context(
    graph: &TaskGraph,
    run_id: &str,
    node_id: NodeId,
    agent: &AgentDefinition,
    tools: &ToolRegistry,
) -> Result<TurnContext> {
    let node = graph.get_node(node_id)?;
    let lineage = graph
        .lineage(node_id)?
        .into_iter()
        .map(|n| LineageEntry {
            node_id: n.id,
            agent_id: n.agent_id.clone(),
            payload: n.payload.clone(),
            history: n.history.clone(),
        })
        .collect();

    Ok(TurnContext {
        run_id: run_id.to_string(),
        node_id,
        payload: node.payload.clone(),
        lineage,
        history: node.history.clone(),
        tools: tools.definitions_for(agent),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::agents::AgentRegistry;
    use weft_core::task::{HistoryEntry, TaskStatus};
    use weft_tools::builtin;

    #[test]
    fn context_carries_lineage_history_and_tools() {
        let mut graph = TaskGraph::new();
        let root = graph.create_root("research_manager", json!("What is vibe coding?"), None);
        graph.set_status(root, TaskStatus::Running).unwrap();
        graph
            .record(
                root,
                HistoryEntry::ToolCall {
                    name: "route_to_research_agent".into(),
                    args: json!({"request": "define it"}),
                },
            )
            .unwrap();
        let child = graph
            .create_node("research_agent", json!({"request": "define it"}), Some(root))
            .unwrap();
        graph
            .record(
                child,
                HistoryEntry::ToolCall {
                    name: "search_web".into(),
                    args: json!({"query": "vibe coding"}),
                },
            )
            .unwrap();

        let mut tools = ToolRegistry::new();
        tools.register(builtin::handoff(), &AgentRegistry::new()).unwrap();
        let agent = AgentDefinition::new("research_agent").with_tools(["search_web", "handoff"]);

        let ctx = build_turn_context(&graph, "run", child, &agent, &tools).unwrap();
        assert_eq!(ctx.node_id, child);
        assert_eq!(ctx.payload, json!({"request": "define it"}));
        let ids: Vec<NodeId> = ctx.lineage.iter().map(|l| l.node_id).collect();
        assert_eq!(ids, vec![root, child]);
        assert_eq!(ctx.lineage[0].agent_id, "research_manager");
        assert!(matches!(
            ctx.lineage[0].history.as_slice(),
            [HistoryEntry::ToolCall { name, .. }] if name == "route_to_research_agent"
        ));
        assert_eq!(ctx.lineage[1].history, ctx.history);
        assert_eq!(ctx.turns_taken(), 1);
        assert_eq!(ctx.tools.len(), 1);
        assert_eq!(ctx.tools[0].name, "handoff");
    }

    #[test]
    fn unknown_node_is_not_found() {
        let graph = TaskGraph::new();
        let agent = AgentDefinition::new("a");
        assert!(build_turn_context(&graph, "run", NodeId(9), &agent, &ToolRegistry::new()).is_err());
    }
}
