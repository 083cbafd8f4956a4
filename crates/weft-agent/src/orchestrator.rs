use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use weft_core::agents::AgentRegistry;
use weft_core::config::{AppConfig, EngineConfig};
use weft_core::error::{Result, WeftError};
use weft_core::event::EventBus;
use weft_core::graph::TaskGraph;
use weft_core::task::{NodeId, TaskStatus};
use weft_core::traits::{AgentTurn, GraphStore};
use weft_core::types::{AgentDefinition, EngineEvent, RunContext};
use weft_tools::{builtin, ToolRegistry, ToolSpec};

use crate::driver::{ExecutionDriver, PendingQuestion, RunOutcome};

/// Entry point for running, resuming, and answering task graphs.
///
/// Holds no graph state of its own: every call loads the run's latest
/// snapshot, works on it, and saves it back.
pub struct Orchestrator {
    agents: AgentRegistry,
    tools: ToolRegistry,
    agent_turn: Arc<dyn AgentTurn>,
    store: Arc<dyn GraphStore>,
    events: Arc<EventBus>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        agent_turn: Arc<dyn AgentTurn>,
        store: Arc<dyn GraphStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            agents: AgentRegistry::new(),
            tools: ToolRegistry::new().with_default_timeout(config.tool_timeout_secs),
            agent_turn,
            store,
            events: Arc::new(EventBus::new(config.event_capacity)),
            config,
        }
    }

    /// Build an orchestrator with the agents and tools declared in config.
    ///
    /// `handoff` and `ask_master` are always available. A `route_to_<agent>`
    /// name in an agent's tool list that no `[[tools]]` entry declares is
    /// registered as the built-in delegation tool for that agent.
    pub fn from_config(
        config: &AppConfig,
        agent_turn: Arc<dyn AgentTurn>,
        store: Arc<dyn GraphStore>,
    ) -> Result<Self> {
        let mut orchestrator = Self::new(agent_turn, store, config.engine.clone());

        for agent in &config.agents {
            let mut definition = AgentDefinition::new(&agent.id)
                .with_description(&agent.description)
                .with_tools(agent.tools.iter().cloned())
                .with_instructions(&agent.instructions);
            if let Some(ref model) = agent.model {
                definition = definition.with_model(model);
            }
            orchestrator.register_agent(definition)?;
        }

        orchestrator.register_tool(builtin::handoff())?;
        orchestrator.register_tool(builtin::ask_master())?;
        for tool in &config.tools {
            orchestrator.register_tool(builtin::spec_from_config(tool)?)?;
        }

        let implied: Vec<String> = orchestrator
            .agents
            .ids()
            .into_iter()
            .filter(|id| orchestrator.tools.get(&builtin::route_to_name(id)).is_none())
            .filter(|id| {
                let name = builtin::route_to_name(id);
                config.agents.iter().any(|a| a.tools.contains(&name))
            })
            .map(str::to_string)
            .collect();
        for target in implied {
            orchestrator.register_tool(builtin::route_to(&target))?;
        }

        debug!(
            agents = orchestrator.agents.len(),
            tools = orchestrator.tools.len(),
            "orchestrator configured"
        );
        Ok(orchestrator)
    }

    pub fn register_agent(&mut self, agent: AgentDefinition) -> Result<()> {
        debug!(agent = %agent.id, tools = agent.allowed_tools.len(), "registering agent");
        self.agents.register(agent)
    }

    pub fn register_tool(&mut self, spec: ToolSpec) -> Result<()> {
        debug!(tool = %spec.name, kind = spec.kind.label(), "registering tool");
        self.tools.register(spec, &self.agents)
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn store(&self) -> Arc<dyn GraphStore> {
        Arc::clone(&self.store)
    }

    fn driver<'a>(&'a self, ctx: &'a RunContext) -> ExecutionDriver<'a> {
        ExecutionDriver {
            run_id: &ctx.run_id,
            agents: &self.agents,
            tools: &self.tools,
            agent_turn: self.agent_turn.as_ref(),
            store: self.store.as_ref(),
            events: &self.events,
            config: &self.config,
        }
    }

    /// Latest graph for a run; empty if the run was never saved.
    pub async fn load_graph(&self, ctx: &RunContext) -> Result<TaskGraph> {
        match self.store.load(&ctx.run_id).await {
            Ok(snapshot) => TaskGraph::from_snapshot(snapshot),
            Err(WeftError::NotFound(_)) => Ok(TaskGraph::new()),
            Err(e) => Err(e),
        }
    }

    /// Run `task` with `main_agent`, resuming a matching unfinished root.
    ///
    /// Returns `Completed` once the root finishes (a failed root carries its
    /// error payload) or `Suspended` when human answers are needed.
    pub async fn run(
        &self,
        ctx: &RunContext,
        task: &str,
        main_agent: &str,
        initiator: Option<&str>,
    ) -> Result<RunOutcome> {
        self.agents.require(main_agent)?;
        let driver = self.driver(ctx);
        let mut graph = self.load_graph(ctx).await?;
        let payload = Value::String(task.to_string());

        let (root, resumed) = match graph.find_incomplete_root(main_agent, &payload, initiator) {
            Some(root) => (root, true),
            None => {
                let root = graph.create_root(main_agent, payload, initiator.map(str::to_string));
                driver.commit(&mut graph).await?;
                self.events.publish(EngineEvent::NodeCreated {
                    node_id: root,
                    agent_id: main_agent.to_string(),
                    parent_id: None,
                });
                (root, false)
            }
        };

        info!(run_id = %ctx.run_id, root_id = %root, agent = %main_agent, resumed, "run started");
        self.events.publish(EngineEvent::RunStarted {
            run_id: ctx.run_id.clone(),
            root_id: root,
            resumed,
        });

        driver.drive(&mut graph, root).await
    }

    /// Answer a human question. The answer is stored as `{"answer": ...}`.
    pub async fn complete_task(
        &self,
        ctx: &RunContext,
        node_id: NodeId,
        answer: impl Into<Value>,
    ) -> Result<()> {
        let mut graph = self.load_graph(ctx).await?;
        let node = graph.get_node(node_id)?;
        if !node.is_pending_for_human() {
            return Err(WeftError::InvalidTransition {
                node: node_id,
                from: node.status,
                to: TaskStatus::Completed,
            });
        }

        let answer: Value = answer.into();
        graph.complete_task(node_id, json!({ "answer": answer }))?;
        self.driver(ctx).commit(&mut graph).await?;
        info!(run_id = %ctx.run_id, node_id = %node_id, "human answered");
        self.events.publish(EngineEvent::HumanAnswered { node_id });
        Ok(())
    }

    /// Ready node ids across the run, including unanswered human questions.
    pub async fn ready_tasks(&self, ctx: &RunContext) -> Result<Vec<NodeId>> {
        Ok(self.load_graph(ctx).await?.get_ready_tasks())
    }

    /// Every unanswered human question in the run.
    pub async fn pending_questions(&self, ctx: &RunContext) -> Result<Vec<PendingQuestion>> {
        let graph = self.load_graph(ctx).await?;
        Ok(graph
            .pending_human()
            .into_iter()
            .map(PendingQuestion::from_node)
            .collect())
    }

    /// Cancel a node and its unfinished descendants.
    ///
    /// The parent of a cancelled node sees it as a failed child on its next
    /// turn.
    pub async fn cancel(&self, ctx: &RunContext, node_id: NodeId) -> Result<Vec<NodeId>> {
        let mut graph = self.load_graph(ctx).await?;
        let cancelled = graph.cancel(node_id)?;
        self.driver(ctx).commit(&mut graph).await?;
        info!(run_id = %ctx.run_id, node_id = %node_id, count = cancelled.len(), "cancelled");
        for id in &cancelled {
            if let Ok(node) = graph.get_node(*id) {
                if let Some(ref error) = node.error {
                    self.events.publish(EngineEvent::NodeFailed {
                        node_id: *id,
                        error: error.clone(),
                    });
                }
            }
        }
        Ok(cancelled)
    }

    /// Drop a run's stored graph. Returns whether there was one.
    pub async fn forget(&self, ctx: &RunContext) -> Result<bool> {
        let existed = self.store.delete(&ctx.run_id).await?;
        info!(run_id = %ctx.run_id, existed, "run forgotten");
        Ok(existed)
    }
}
