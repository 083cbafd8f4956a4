use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WeftError};
use crate::task::{HistoryEntry, NodeId, TaskError, TaskNode, TaskStatus, HUMAN_AGENT};

/// Snapshot layout version written by this build.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Durable, self-contained image of one run's task graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub format_version: u32,
    pub run_id: String,
    /// Monotonic save counter, used to detect concurrent writers.
    pub version: u64,
    pub next_id: u64,
    /// Nodes in ascending id order.
    pub nodes: Vec<TaskNode>,
    pub saved_at: DateTime<Utc>,
}

/// The task forest for one run context.
///
/// Every mutator validates before touching anything, so a rejected call
/// leaves the graph exactly as it was.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskGraph {
    nodes: BTreeMap<NodeId, TaskNode>,
    next_id: u64,
    version: u64,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Version of the last snapshot this graph was saved as or loaded from.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Advance the save counter ahead of writing a snapshot.
    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// All nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.values()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get_node(&self, id: NodeId) -> Result<&TaskNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| WeftError::NotFound(format!("node {}", id)))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut TaskNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| WeftError::NotFound(format!("node {}", id)))
    }

    fn allocate_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Start a new tree in the forest.
    pub fn create_root(
        &mut self,
        agent_id: impl Into<String>,
        payload: serde_json::Value,
        initiator: Option<String>,
    ) -> NodeId {
        let id = self.allocate_id();
        let mut node = TaskNode::new(id, agent_id, payload, None);
        node.initiator = initiator;
        self.nodes.insert(id, node);
        id
    }

    /// Create a node, optionally under a parent.
    ///
    /// The parent must exist and must not be finished.
    pub fn create_node(
        &mut self,
        agent_id: impl Into<String>,
        payload: serde_json::Value,
        parent_id: Option<NodeId>,
    ) -> Result<NodeId> {
        let agent_id = agent_id.into();
        let Some(parent) = parent_id else {
            return Ok(self.create_root(agent_id, payload, None));
        };

        let parent_node = self.get_node(parent)?;
        if parent_node.status.is_terminal() {
            return Err(WeftError::InvalidTransition {
                node: parent,
                from: parent_node.status,
                to: TaskStatus::Pending,
            });
        }
        if parent_node.is_human() {
            return Err(WeftError::Validation(format!(
                "human node {} cannot own children",
                parent
            )));
        }

        let id = self.allocate_id();
        self.nodes
            .insert(id, TaskNode::new(id, agent_id, payload, Some(parent)));
        let parent_node = self.node_mut(parent)?;
        parent_node.children.push(id);
        parent_node.updated_at = Utc::now();
        Ok(id)
    }

    /// Whether the child a node is waiting on has finished.
    fn blocker_resolved(&self, node: &TaskNode) -> bool {
        node.blocked_on
            .and_then(|c| self.nodes.get(&c))
            .is_some_and(|c| c.status.is_terminal())
    }

    fn transition_allowed(&self, node: &TaskNode, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (node.status, to) {
            (Pending, Running) => !node.is_human(),
            (Pending, Completed) => node.is_human(),
            (Pending, Failed) => true,
            (Running, Running) => node.blocked_on.is_none() || self.blocker_resolved(node),
            (Running, Suspended) => node.blocked_on.is_some(),
            (Running, Completed) | (Running, Failed) => true,
            (Suspended, Running) | (Suspended, Completed) => self.blocker_resolved(node),
            (Suspended, Failed) => true,
            _ => false,
        }
    }

    fn check_transition(&self, id: NodeId, to: TaskStatus) -> Result<()> {
        let node = self.get_node(id)?;
        if self.transition_allowed(node, to) {
            Ok(())
        } else {
            Err(WeftError::InvalidTransition {
                node: id,
                from: node.status,
                to,
            })
        }
    }

    /// Move a node to `status` if the lifecycle allows it.
    pub fn set_status(&mut self, id: NodeId, status: TaskStatus) -> Result<()> {
        self.check_transition(id, status)?;
        let node = self.node_mut(id)?;
        debug!(node_id = %id, from = %node.status, to = %status, "status changed");
        node.status = status;
        node.updated_at = Utc::now();
        Ok(())
    }

    /// Mark a running node as waiting on one of its delegated children.
    pub fn block_on(&mut self, id: NodeId, child: NodeId) -> Result<()> {
        self.check_child(id, child)?;
        let node = self.get_node(id)?;
        if node.status != TaskStatus::Running {
            return Err(WeftError::InvalidTransition {
                node: id,
                from: node.status,
                to: TaskStatus::Running,
            });
        }
        let node = self.node_mut(id)?;
        node.blocked_on = Some(child);
        node.updated_at = Utc::now();
        Ok(())
    }

    /// Suspend a running node until its human child is answered.
    pub fn suspend_on(&mut self, id: NodeId, human: NodeId) -> Result<()> {
        self.check_child(id, human)?;
        let node = self.get_node(id)?;
        if node.status != TaskStatus::Running {
            return Err(WeftError::InvalidTransition {
                node: id,
                from: node.status,
                to: TaskStatus::Suspended,
            });
        }
        let node = self.node_mut(id)?;
        node.blocked_on = Some(human);
        node.status = TaskStatus::Suspended;
        node.updated_at = Utc::now();
        Ok(())
    }

    fn check_child(&self, id: NodeId, child: NodeId) -> Result<()> {
        let child_node = self.get_node(child)?;
        if child_node.parent_id != Some(id) {
            return Err(WeftError::Validation(format!(
                "node {} is not a child of node {}",
                child, id
            )));
        }
        Ok(())
    }

    /// Bring a ready node back to Running.
    ///
    /// If the node was waiting on a child that has since finished, the
    /// child's outcome is appended to the node's history and returned.
    pub fn resume(&mut self, id: NodeId) -> Result<Option<HistoryEntry>> {
        self.check_transition(id, TaskStatus::Running)?;

        let absorbed = {
            let node = self.get_node(id)?;
            match node.blocked_on {
                Some(child_id) => {
                    let child = self.get_node(child_id)?;
                    child.outcome().map(|outcome| HistoryEntry::ChildResult {
                        child_id,
                        agent_id: child.agent_id.clone(),
                        outcome,
                    })
                }
                None => None,
            }
        };

        let node = self.node_mut(id)?;
        if let Some(ref entry) = absorbed {
            node.history.push(entry.clone());
            node.blocked_on = None;
        }
        node.status = TaskStatus::Running;
        node.updated_at = Utc::now();
        Ok(absorbed)
    }

    /// Append to a node's conversation record.
    pub fn record(&mut self, id: NodeId, entry: HistoryEntry) -> Result<()> {
        let node = self.node_mut(id)?;
        node.history.push(entry);
        node.updated_at = Utc::now();
        Ok(())
    }

    /// Finish a node with a result.
    ///
    /// Valid for running agent nodes, unanswered human nodes, and suspended
    /// nodes whose human question has been answered.
    pub fn complete_task(&mut self, id: NodeId, result: serde_json::Value) -> Result<()> {
        self.check_transition(id, TaskStatus::Completed)?;
        let node = self.node_mut(id)?;
        debug!(node_id = %id, from = %node.status, "node completed");
        node.status = TaskStatus::Completed;
        node.result = Some(result);
        node.updated_at = Utc::now();
        Ok(())
    }

    /// Finish a node with an error.
    pub fn fail_task(&mut self, id: NodeId, error: TaskError) -> Result<()> {
        self.check_transition(id, TaskStatus::Failed)?;
        let node = self.node_mut(id)?;
        debug!(node_id = %id, from = %node.status, kind = ?error.kind, "node failed");
        node.status = TaskStatus::Failed;
        node.error = Some(error);
        node.updated_at = Utc::now();
        Ok(())
    }

    /// Cancel a node and every unfinished node beneath it.
    ///
    /// Returns the cancelled ids, deepest first.
    pub fn cancel(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        self.check_transition(id, TaskStatus::Failed)?;

        let mut targets: Vec<NodeId> = self
            .descendants(id)
            .into_iter()
            .filter(|d| self.nodes.get(d).is_some_and(|n| !n.status.is_terminal()))
            .collect();
        targets.reverse();
        targets.push(id);

        let now = Utc::now();
        for target in &targets {
            if let Some(node) = self.nodes.get_mut(target) {
                node.status = TaskStatus::Failed;
                node.error = Some(TaskError::cancelled());
                node.updated_at = now;
            }
        }
        debug!(node_id = %id, cancelled = targets.len(), "subtree cancelled");
        Ok(targets)
    }

    /// Whether a node is eligible for the next scheduling step.
    pub fn is_ready(&self, node: &TaskNode) -> bool {
        match node.status {
            TaskStatus::Pending => true,
            TaskStatus::Running => node.blocked_on.is_none() || self.blocker_resolved(node),
            TaskStatus::Suspended => self.blocker_resolved(node),
            TaskStatus::Completed | TaskStatus::Failed => false,
        }
    }

    /// Ready nodes across the whole forest, in creation order.
    ///
    /// Includes unanswered human nodes so callers can discover questions.
    pub fn get_ready_tasks(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| self.is_ready(n))
            .map(|n| n.id)
            .collect()
    }

    /// Ready agent-owned nodes inside one tree, in creation order.
    pub fn driver_ready_under(&self, root: NodeId) -> Vec<NodeId> {
        let mut ids = self.descendants(root);
        ids.push(root);
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.nodes.get(&id))
            .filter(|n| !n.is_human() && self.is_ready(n))
            .map(|n| n.id)
            .collect()
    }

    /// Finished, and for a root, so is everything beneath it.
    pub fn is_terminal(&self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        if !node.status.is_terminal() {
            return false;
        }
        if !node.is_root() {
            return true;
        }
        self.descendants(id)
            .iter()
            .all(|d| self.nodes.get(d).is_some_and(|n| n.status.is_terminal()))
    }

    /// Every node beneath `id`, breadth first.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut queue: VecDeque<NodeId> = self
            .nodes
            .get(&id)
            .map(|n| n.children.iter().copied().collect())
            .unwrap_or_default();
        while let Some(next) = queue.pop_front() {
            out.push(next);
            if let Some(node) = self.nodes.get(&next) {
                queue.extend(node.children.iter().copied());
            }
        }
        out
    }

    /// Path from the root of `id`'s tree down to `id`, inclusive.
    pub fn lineage(&self, id: NodeId) -> Result<Vec<&TaskNode>> {
        let mut chain = vec![self.get_node(id)?];
        let mut cursor = chain[0].parent_id;
        while let Some(parent) = cursor {
            let node = self.get_node(parent)?;
            cursor = node.parent_id;
            chain.push(node);
        }
        chain.reverse();
        Ok(chain)
    }

    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.is_root())
            .map(|n| n.id)
            .collect()
    }

    /// Human questions still waiting for an answer.
    pub fn pending_human(&self) -> Vec<&TaskNode> {
        self.nodes
            .values()
            .filter(|n| n.is_pending_for_human())
            .collect()
    }

    /// Human questions waiting inside one tree.
    pub fn pending_human_under(&self, root: NodeId) -> Vec<&TaskNode> {
        let mut ids = self.descendants(root);
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.nodes.get(&id))
            .filter(|n| n.is_pending_for_human())
            .collect()
    }

    /// An unfinished root started for the same request, if any.
    pub fn find_incomplete_root(
        &self,
        agent_id: &str,
        payload: &serde_json::Value,
        initiator: Option<&str>,
    ) -> Option<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.is_root())
            .filter(|n| n.agent_id == agent_id && &n.payload == payload)
            .filter(|n| n.initiator.as_deref() == initiator)
            .find(|n| !self.is_terminal(n.id))
            .map(|n| n.id)
    }

    pub fn to_snapshot(&self, run_id: &str) -> GraphSnapshot {
        GraphSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            run_id: run_id.to_string(),
            version: self.version,
            next_id: self.next_id,
            nodes: self.nodes.values().cloned().collect(),
            saved_at: Utc::now(),
        }
    }

    /// Rebuild a graph from a snapshot, checking its internal consistency.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self> {
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(WeftError::Store(format!(
                "unsupported snapshot format {} for run {}",
                snapshot.format_version, snapshot.run_id
            )));
        }

        let mut nodes = BTreeMap::new();
        for node in snapshot.nodes {
            if node.id.0 >= snapshot.next_id {
                return Err(WeftError::Store(format!(
                    "node {} is beyond next_id {}",
                    node.id, snapshot.next_id
                )));
            }
            if nodes.insert(node.id, node).is_some() {
                return Err(WeftError::Store("duplicate node id in snapshot".into()));
            }
        }
        for node in nodes.values() {
            if let Some(parent) = node.parent_id {
                if parent >= node.id || !nodes.contains_key(&parent) {
                    return Err(WeftError::Store(format!(
                        "node {} has invalid parent {}",
                        node.id, parent
                    )));
                }
            }
            if node.is_human() && !node.children.is_empty() {
                return Err(WeftError::Store(format!(
                    "{} node {} has children",
                    HUMAN_AGENT, node.id
                )));
            }
        }

        Ok(Self {
            nodes,
            next_id: snapshot.next_id,
            version: snapshot.version,
        })
    }
}
