//! Edge types for workflow graphs.
//!
//! An edge connects a source node to a target node. Edges leaving a
//! condition node may carry a `condition` discriminator (`"true"` or
//! `"false"`) that is matched against the node's `_conditionResult`.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// The source node ID.
    pub source: NodeId,
    /// The target node ID.
    pub target: NodeId,
    /// Branch discriminator, only consulted when the source is a condition node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Edge {
    /// Creates an unconditional edge.
    #[must_use]
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            condition: None,
        }
    }

    /// Creates an edge taken when the source condition evaluates to `branch`.
    #[must_use]
    pub fn when(source: impl Into<NodeId>, target: impl Into<NodeId>, branch: bool) -> Self {
        Self {
            condition: Some(branch.to_string()),
            ..Self::new(source, target)
        }
    }

    /// Returns true if this edge carries a condition discriminator.
    #[must_use]
    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }

    /// Returns true if the discriminator matches the given condition result.
    #[must_use]
    pub fn matches(&self, condition_result: bool) -> bool {
        self.condition.as_deref() == Some(if condition_result { "true" } else { "false" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconditional_edge() {
        let edge = Edge::new("1", "2");
        assert!(!edge.is_conditional());
        assert!(!edge.matches(true));
        assert!(!edge.matches(false));
    }

    #[test]
    fn conditional_edge_matches_its_branch() {
        let edge = Edge::when("2", "3", true);
        assert_eq!(edge.condition.as_deref(), Some("true"));
        assert!(edge.matches(true));
        assert!(!edge.matches(false));
    }

    #[test]
    fn unknown_discriminator_never_matches() {
        let edge: Edge =
            serde_json::from_str(r#"{"source":"2","target":"9","condition":"maybe"}"#).unwrap();
        assert!(edge.is_conditional());
        assert!(!edge.matches(true));
        assert!(!edge.matches(false));
    }

    #[test]
    fn condition_omitted_when_absent() {
        let json = serde_json::to_value(Edge::new("a", "b")).unwrap();
        assert!(json.get("condition").is_none());
    }
}
