//! Workflow node types.
//!
//! A node is a typed step in a workflow graph. Each node has:
//! - An ID unique within its graph
//! - A type name that selects the executor in the [`NodeRegistry`](crate::executor::NodeRegistry)
//! - Opaque configuration data consumed only by that executor
//! - An environment: server nodes run in a worker, client nodes wait for a human

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::borrow::Borrow;
use std::fmt;

/// Type name of condition nodes.
///
/// Only nodes of this type have their outgoing edges filtered by `_conditionResult`.
pub const CONDITION_NODE_TYPE: &str = "condition";

/// Identifier of a node within a workflow graph.
///
/// Node IDs are chosen by the graph author (the editor uses short strings such
/// as `"1"` or `"send-email"`), so unlike run identifiers they are not ULIDs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node ID from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Where a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Executed by a queue worker.
    #[default]
    Server,
    /// Rendered by the client UI; always suspends until resumed with client data.
    Client,
}

/// A node in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique ID within the graph.
    pub id: NodeId,
    /// Type name used to look up the executor.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Executor-specific configuration.
    #[serde(default)]
    pub data: Map<String, JsonValue>,
    /// Where the node runs.
    #[serde(default)]
    pub environment: Environment,
}

impl Node {
    /// Creates a server node with empty configuration.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            data: Map::new(),
            environment: Environment::Server,
        }
    }

    /// Creates a client node with empty configuration.
    #[must_use]
    pub fn client(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            environment: Environment::Client,
            ..Self::new(id, node_type)
        }
    }

    /// Replaces the configuration data.
    ///
    /// Non-object values are ignored; node data is always a mapping.
    #[must_use]
    pub fn with_data(mut self, data: JsonValue) -> Self {
        if let JsonValue::Object(map) = data {
            self.data = map;
        }
        self
    }

    /// Returns true if this is a condition node.
    #[must_use]
    pub fn is_condition(&self) -> bool {
        self.node_type == CONDITION_NODE_TYPE
    }

    /// Returns true if this node runs on the client.
    #[must_use]
    pub fn is_client(&self) -> bool {
        self.environment == Environment::Client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_defaults_to_server_environment() {
        let node: Node = serde_json::from_value(json!({"id": "1", "type": "transform"})).unwrap();
        assert_eq!(node.environment, Environment::Server);
        assert!(node.data.is_empty());
        assert!(!node.is_client());
    }

    #[test]
    fn client_node_parses() {
        let node: Node = serde_json::from_value(json!({
            "id": "3",
            "type": "banner-form",
            "environment": "client",
            "data": {"title": "Sign up"}
        }))
        .unwrap();
        assert!(node.is_client());
        assert_eq!(node.data["title"], "Sign up");
    }

    #[test]
    fn condition_detection_is_by_type() {
        assert!(Node::new("2", CONDITION_NODE_TYPE).is_condition());
        assert!(!Node::new("2", "analytics").is_condition());
    }

    #[test]
    fn with_data_ignores_non_objects() {
        let node = Node::new("1", "transform").with_data(json!([1, 2]));
        assert!(node.data.is_empty());
    }

    #[test]
    fn node_id_displays_raw() {
        assert_eq!(NodeId::from("send-email").to_string(), "send-email");
    }
}
