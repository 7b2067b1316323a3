use crate::error::GraphError;
use crate::node::NodeConfig;
use crate::types::{Edge, NodeId, NodeSpec, NodeStatus};
use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Topo;
use petgraph::Direction;
use std::collections::HashMap;

/// Mutable per-run state of one node
#[derive(Debug, Clone)]
pub struct ExecutionNode {
    pub id: NodeId,
    pub name: String,
    pub config: NodeConfig,
    pub timeout_secs: Option<u64>,
    pub status: NodeStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionNode {
    fn new(spec: &NodeSpec, config: NodeConfig) -> Self {
        Self {
            id: spec.id.clone(),
            name: spec.display_name().to_string(),
            config,
            timeout_secs: spec.timeout_secs,
            status: NodeStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Apply a status transition, refusing anything non-monotonic
    pub fn transition(&mut self, next: NodeStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }

        let now = Utc::now();
        match next {
            NodeStatus::Running => self.started_at = Some(now),
            NodeStatus::Completed | NodeStatus::Failed => self.finished_at = Some(now),
            NodeStatus::Pending => {}
        }
        self.status = next;
        true
    }
}

/// Per-run DAG of execution nodes, built once from stored rows
#[derive(Debug)]
pub struct ExecutionGraph {
    graph: DiGraph<ExecutionNode, ()>,
    indices: HashMap<NodeId, NodeIndex>,
}

impl ExecutionGraph {
    /// Build a validated graph from node and edge rows
    pub fn build(nodes: &[NodeSpec], edges: &[Edge]) -> Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();

        // Add all nodes, parsing their typed config
        for spec in nodes {
            if indices.contains_key(&spec.id) {
                return Err(GraphError::DuplicateNode(spec.id.clone()));
            }

            let config = NodeConfig::parse(&spec.node_type, &spec.config).map_err(|e| {
                GraphError::InvalidConfig {
                    node: spec.id.clone(),
                    node_type: spec.node_type.clone(),
                    message: e.to_string(),
                }
            })?;

            let index = graph.add_node(ExecutionNode::new(spec, config));
            indices.insert(spec.id.clone(), index);
        }

        // Add dependency edges (from -> to means `to` depends on `from`)
        for edge in edges {
            let lookup = |id: &NodeId| {
                indices.get(id).copied().ok_or_else(|| GraphError::DanglingEdge {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    missing: id.clone(),
                })
            };
            let from = lookup(&edge.from)?;
            let to = lookup(&edge.to)?;

            // update_edge collapses duplicate rows into one dependency
            graph.update_edge(from, to, ());
        }

        let dag = Self { graph, indices };

        // Nodes read by configuration must exist too
        for node in dag.graph.node_weights() {
            for reference in node.config.references() {
                if !dag.indices.contains_key(reference) {
                    return Err(GraphError::UnknownReference {
                        node: node.id.clone(),
                        missing: reference.clone(),
                    });
                }
            }
        }

        if let Some(node) = dag.find_cycle() {
            return Err(GraphError::CycleDetected(node));
        }

        if dag.graph.node_count() > 0 && dag.entry_nodes().is_empty() {
            return Err(GraphError::NoEntryNodes);
        }

        Ok(dag)
    }

    /// DFS from every unvisited node keeping an explicit recursion stack.
    /// Returns the node at which a back edge was found.
    fn find_cycle(&self) -> Option<NodeId> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];

        for root in self.graph.node_indices() {
            if marks[root.index()] != Mark::Unvisited {
                continue;
            }

            // Frames hold a node and its not-yet-explored successors
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> = Vec::new();
            marks[root.index()] = Mark::OnStack;
            stack.push((root, self.graph.neighbors(root).collect()));

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                match frame.1.pop() {
                    Some(next) => match marks[next.index()] {
                        Mark::OnStack => return Some(self.graph[next].id.clone()),
                        Mark::Done => {}
                        Mark::Unvisited => {
                            marks[next.index()] = Mark::OnStack;
                            let successors = self.graph.neighbors(next).collect();
                            stack.push((next, successors));
                        }
                    },
                    None => {
                        marks[node.index()] = Mark::Done;
                        stack.pop();
                    }
                }
            }
        }

        None
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node(&self, id: &NodeId) -> Option<&ExecutionNode> {
        self.indices.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut ExecutionNode> {
        self.indices.get(id).map(|&idx| &mut self.graph[idx])
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &ExecutionNode> {
        self.graph.node_weights()
    }

    /// Nodes that must complete before `id` may start
    pub fn dependencies(&self, id: &NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Nodes unblocked by the completion of `id`
    pub fn dependents(&self, id: &NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Every node `id` transitively depends on
    pub fn ancestors(&self, id: &NodeId) -> Vec<NodeId> {
        let Some(&start) = self.indices.get(id) else {
            return Vec::new();
        };

        let mut seen = vec![false; self.graph.node_count()];
        let mut stack = vec![start];
        let mut found = Vec::new();
        while let Some(idx) = stack.pop() {
            for parent in self.graph.neighbors_directed(idx, Direction::Incoming) {
                if !seen[parent.index()] {
                    seen[parent.index()] = true;
                    found.push(self.graph[parent].id.clone());
                    stack.push(parent);
                }
            }
        }
        found
    }

    fn neighbors(&self, id: &NodeId, direction: Direction) -> Vec<NodeId> {
        let Some(&idx) = self.indices.get(id) else {
            return Vec::new();
        };

        let mut ids: Vec<NodeId> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].id.clone())
            .collect();
        // petgraph yields the most recent edge first
        ids.reverse();
        ids
    }

    /// Nodes with no dependencies, in insertion order
    pub fn entry_nodes(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|n| self.graph[n].id.clone())
            .collect()
    }

    /// Nodes nothing depends on
    pub fn sink_nodes(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|n| self.graph[n].id.clone())
            .collect()
    }

    /// One valid execution order (dependencies first)
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut topo = Topo::new(&self.graph);
        let mut order = Vec::with_capacity(self.graph.node_count());

        while let Some(node) = topo.next(&self.graph) {
            order.push(self.graph[node].id.clone());
        }

        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str) -> NodeSpec {
        NodeSpec::new(id, "delay", json!({ "duration_ms": 0 }))
    }

    fn ids(list: &[NodeId]) -> Vec<&str> {
        list.iter().map(|id| id.as_str()).collect()
    }

    #[test]
    fn test_linear_graph() {
        let graph = ExecutionGraph::build(
            &[node("a"), node("b"), node("c")],
            &[Edge::new("a", "b"), Edge::new("b", "c")],
        )
        .unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(ids(&graph.entry_nodes()), vec!["a"]);
        assert_eq!(ids(&graph.topological_order()), vec!["a", "b", "c"]);
        assert_eq!(ids(&graph.dependencies(&NodeId::new("b"))), vec!["a"]);
        assert_eq!(ids(&graph.dependents(&NodeId::new("b"))), vec!["c"]);
        assert_eq!(ids(&graph.sink_nodes()), vec!["c"]);
    }

    #[test]
    fn test_diamond_dependencies() {
        let graph = ExecutionGraph::build(
            &[node("a"), node("b"), node("c"), node("d")],
            &[
                Edge::new("a", "b"),
                Edge::new("a", "c"),
                Edge::new("b", "d"),
                Edge::new("c", "d"),
            ],
        )
        .unwrap();

        assert_eq!(ids(&graph.entry_nodes()), vec!["a"]);
        assert_eq!(ids(&graph.dependents(&NodeId::new("a"))), vec!["b", "c"]);
        assert_eq!(ids(&graph.dependencies(&NodeId::new("d"))), vec!["b", "c"]);

        let order = graph.topological_order();
        assert_eq!(order.first().unwrap().as_str(), "a");
        assert_eq!(order.last().unwrap().as_str(), "d");

        let mut ancestors = graph.ancestors(&NodeId::new("d"));
        ancestors.sort();
        assert_eq!(ids(&ancestors), vec!["a", "b", "c"]);
        assert!(graph.ancestors(&NodeId::new("a")).is_empty());
    }

    #[test]
    fn test_cycle_rejected() {
        let result = ExecutionGraph::build(
            &[node("a"), node("b"), node("c"), node("entry")],
            &[
                Edge::new("entry", "a"),
                Edge::new("a", "b"),
                Edge::new("b", "c"),
                Edge::new("c", "a"),
            ],
        );
        assert!(matches!(result, Err(GraphError::CycleDetected(_))));
    }

    #[test]
    fn test_self_loop_rejected() {
        let result = ExecutionGraph::build(&[node("a")], &[Edge::new("a", "a")]);
        assert_eq!(
            result.unwrap_err(),
            GraphError::CycleDetected(NodeId::new("a"))
        );
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let result = ExecutionGraph::build(&[node("a")], &[Edge::new("a", "ghost")]);
        assert!(matches!(
            result,
            Err(GraphError::DanglingEdge { missing, .. }) if missing.as_str() == "ghost"
        ));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let result = ExecutionGraph::build(&[node("a"), node("a")], &[]);
        assert_eq!(result.unwrap_err(), GraphError::DuplicateNode(NodeId::new("a")));
    }

    #[test]
    fn test_invalid_config_rejected_at_build_time() {
        let bad = NodeSpec::new("wait", "delay", json!({ "duration_ms": "soon" }));
        let result = ExecutionGraph::build(&[bad], &[]);
        assert!(matches!(
            result,
            Err(GraphError::InvalidConfig { node, .. }) if node.as_str() == "wait"
        ));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let check = NodeSpec::new(
            "check",
            "conditional",
            json!({ "condition": "all_success", "depends_on": ["missing"] }),
        );
        let result = ExecutionGraph::build(&[check], &[]);
        assert!(matches!(result, Err(GraphError::UnknownReference { .. })));
    }

    #[test]
    fn test_unknown_type_builds() {
        let odd = NodeSpec::new("odd", "telepathy", json!({}));
        let graph = ExecutionGraph::build(&[odd], &[]).unwrap();
        let node = graph.node(&NodeId::new("odd")).unwrap();
        assert_eq!(node.config, NodeConfig::Unsupported("telepathy".to_string()));
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let graph = ExecutionGraph::build(
            &[node("a"), node("b")],
            &[Edge::new("a", "b"), Edge::new("a", "b")],
        )
        .unwrap();
        assert_eq!(graph.dependencies(&NodeId::new("b")).len(), 1);
    }

    #[test]
    fn test_empty_graph_is_valid() {
        let graph = ExecutionGraph::build(&[], &[]).unwrap();
        assert!(graph.is_empty());
        assert!(graph.entry_nodes().is_empty());
    }

    #[test]
    fn test_transitions_stamp_timestamps() {
        let mut graph = ExecutionGraph::build(&[node("a")], &[]).unwrap();
        let a = graph.node_mut(&NodeId::new("a")).unwrap();

        assert!(!a.transition(NodeStatus::Completed));
        assert!(a.transition(NodeStatus::Running));
        assert!(a.started_at.is_some());
        assert!(a.transition(NodeStatus::Completed));
        assert!(a.finished_at.is_some());
        assert!(!a.transition(NodeStatus::Failed));
        assert_eq!(a.status, NodeStatus::Completed);
    }
}
