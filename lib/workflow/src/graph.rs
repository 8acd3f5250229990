//! Workflow graph implementation using petgraph.
//!
//! Workflows are directed graphs where:
//! - Nodes are typed workflow steps
//! - Edges connect a source node to a target node, optionally guarded by a
//!   condition discriminator
//!
//! Graphs are stored as `{ "nodes": [...], "edges": [...] }` documents.
//! Deserialization validates the document, so a `WorkflowGraph` value never
//! contains duplicate node IDs or edges that reference missing nodes.

use crate::edge::Edge;
use crate::error::GraphError;
use crate::node::{Node, NodeId};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A workflow graph using petgraph's directed graph.
///
/// Cycles are permitted; traversal is driven by completed steps, not by a
/// topological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GraphDocument", into = "GraphDocument")]
pub struct WorkflowGraph {
    graph: DiGraph<Node, Edge>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    /// Creates a new empty workflow graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_index_map: HashMap::new(),
        }
    }

    /// Builds a graph from node and edge lists.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate node IDs or dangling edges.
    pub fn from_parts(
        nodes: impl IntoIterator<Item = Node>,
        edges: impl IntoIterator<Item = Edge>,
    ) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node)?;
        }
        for edge in edges {
            graph.add_edge(edge)?;
        }
        Ok(graph)
    }

    /// Adds a node to the graph.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateNode` if a node with the same ID already exists.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        if self.node_index_map.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode { node_id: node.id });
        }
        let node_id = node.id.clone();
        let index = self.graph.add_node(node);
        self.node_index_map.insert(node_id.clone(), index);
        Ok(node_id)
    }

    /// Adds an edge between two existing nodes.
    ///
    /// # Errors
    ///
    /// Returns `DanglingEdge` if either endpoint is missing.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        let dangling = |missing: &NodeId| GraphError::DanglingEdge {
            source: edge.source.clone(),
            target: edge.target.clone(),
            missing: missing.clone(),
        };
        let source_index = *self
            .node_index_map
            .get(&edge.source)
            .ok_or_else(|| dangling(&edge.source))?;
        let target_index = *self
            .node_index_map
            .get(&edge.target)
            .ok_or_else(|| dangling(&edge.target))?;

        self.graph.add_edge(source_index, target_index, edge);
        Ok(())
    }

    /// Returns a reference to a node by its ID.
    #[must_use]
    pub fn get_node(&self, node_id: &str) -> Option<&Node> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns true if the graph contains the node.
    #[must_use]
    pub fn contains_node(&self, node_id: &str) -> bool {
        self.node_index_map.contains_key(node_id)
    }

    /// Returns all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Returns all edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_weights()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the edges leaving a node, in insertion order.
    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.edges_directed(node_id, Direction::Outgoing)
    }

    /// Returns the edges entering a node, in insertion order.
    pub fn incoming_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.edges_directed(node_id, Direction::Incoming)
    }

    fn edges_directed(&self, node_id: &str, direction: Direction) -> Vec<&Edge> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };

        // petgraph walks adjacency lists newest-first
        let mut edges: Vec<_> = self.graph.edges_directed(index, direction).collect();
        edges.sort_by_key(|edge| edge.id());
        edges.into_iter().map(|edge| edge.weight()).collect()
    }

    /// Returns the start nodes of the workflow.
    ///
    /// These are the nodes without incoming edges. A graph where every node
    /// has an incoming edge (a pure cycle) starts at its first node.
    pub fn entry_nodes(&self) -> Vec<&Node> {
        let entries: Vec<_> = self
            .graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect();

        if entries.is_empty() {
            self.graph.node_weights().take(1).collect()
        } else {
            entries
        }
    }

    /// Validates that the graph can be executed.
    ///
    /// Structural invariants are enforced on construction, so the only
    /// remaining check is that there is something to run.
    ///
    /// # Errors
    ///
    /// Returns `Empty` if the graph has no nodes.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.graph.node_count() == 0 {
            return Err(GraphError::Empty);
        }
        Ok(())
    }
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire form of a workflow graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl TryFrom<GraphDocument> for WorkflowGraph {
    type Error = GraphError;

    fn try_from(document: GraphDocument) -> Result<Self, Self::Error> {
        Self::from_parts(document.nodes, document.edges)
    }
}

impl From<WorkflowGraph> for GraphDocument {
    fn from(graph: WorkflowGraph) -> Self {
        let nodes = graph.graph.node_weights().cloned().collect();
        let edges = graph.graph.edge_weights().cloned().collect();
        Self { nodes, edges }
    }
}
