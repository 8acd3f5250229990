//! Workflow definition types.
//!
//! A workflow is a named automation made of metadata and a graph. Starting an
//! execution copies the graph, so editing a workflow never affects executions
//! already in flight.

use crate::graph::WorkflowGraph;
use chrono::{DateTime, Utc};
use lantern_core::WorkflowId;
use serde::{Deserialize, Serialize};

/// Metadata for a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Definition version, starting at 1.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowMetadata {
    /// Creates metadata for a first version.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A complete workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub metadata: WorkflowMetadata,
    pub graph: WorkflowGraph,
}

impl Workflow {
    /// Creates a workflow with a fresh ID.
    #[must_use]
    pub fn new(metadata: WorkflowMetadata, graph: WorkflowGraph) -> Self {
        Self {
            id: WorkflowId::new(),
            metadata,
            graph,
        }
    }

    /// Returns the workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    #[test]
    fn new_workflow_starts_at_version_one() {
        let workflow = Workflow::new(
            WorkflowMetadata::new("Onboarding").with_description("Welcome new users"),
            WorkflowGraph::new(),
        );
        assert_eq!(workflow.name(), "Onboarding");
        assert_eq!(workflow.metadata.version, 1);
        assert_eq!(
            workflow.metadata.description.as_deref(),
            Some("Welcome new users")
        );
    }

    #[test]
    fn workflow_serializes_graph_document() {
        let workflow = Workflow::new(
            WorkflowMetadata::new("Onboarding"),
            WorkflowGraph::from_parts([Node::new("1", "trigger")], []).unwrap(),
        );
        let json = serde_json::to_value(&workflow).unwrap();
        assert_eq!(json["metadata"]["name"], "Onboarding");
        assert_eq!(json["graph"]["nodes"][0]["id"], "1");
        assert!(json["graph"]["edges"].as_array().unwrap().is_empty());
    }
}
