//! Edge filtering and reachability.
//!
//! Only condition nodes filter their outgoing edges. A `_conditionResult` that
//! leaks into a non-condition node's output through merged context is
//! ignored: every edge leaving a non-condition node is followed.

use crate::edge::Edge;
use crate::execution::{CONDITION_RESULT_KEY, Execution, Output, StepStatus};
use crate::graph::WorkflowGraph;
use crate::node::{Node, NodeId};
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashSet, VecDeque};

/// Returns the outgoing edges of a completed node that should be followed.
///
/// For a condition node with conditional edges, only edges whose
/// discriminator matches `_conditionResult` survive and unconditioned edges
/// are dropped. A condition node without conditional edges keeps all of them.
#[must_use]
pub fn eligible_edges<'g>(graph: &'g WorkflowGraph, node: &Node, output: &Output) -> Vec<&'g Edge> {
    let edges = graph.outgoing_edges(node.id.as_str());
    if !node.is_condition() || !edges.iter().any(|edge| edge.is_conditional()) {
        return edges;
    }

    let Some(flag) = output.get(CONDITION_RESULT_KEY).and_then(JsonValue::as_bool) else {
        return Vec::new();
    };
    edges.into_iter().filter(|edge| edge.matches(flag)).collect()
}

/// Returns the distinct targets of the eligible edges, in edge order.
#[must_use]
pub fn eligible_targets(graph: &WorkflowGraph, node: &Node, output: &Output) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    eligible_edges(graph, node, output)
        .into_iter()
        .filter(|edge| seen.insert(edge.target.clone()))
        .map(|edge| edge.target.clone())
        .collect()
}

/// Returns the nodes reachable under the filtering applied so far.
///
/// Walks from the start nodes through the eligible edges of completed steps.
/// Nodes whose step is not completed are reachable but contribute no edges.
#[must_use]
pub fn reachable_nodes(execution: &Execution) -> BTreeSet<NodeId> {
    let graph = &execution.graph;
    let mut reachable = BTreeSet::new();
    let mut queue: VecDeque<NodeId> = graph
        .entry_nodes()
        .into_iter()
        .map(|node| node.id.clone())
        .collect();

    while let Some(node_id) = queue.pop_front() {
        if !reachable.insert(node_id.clone()) {
            continue;
        }
        let (Some(node), Some(step)) = (
            graph.get_node(node_id.as_str()),
            execution.step(node_id.as_str()),
        ) else {
            continue;
        };
        if step.status != StepStatus::Completed {
            continue;
        }
        for target in eligible_targets(graph, node, &step.output) {
            if !reachable.contains(&target) {
                queue.push_back(target);
            }
        }
    }

    reachable
}

/// Returns true once there is no pending work left.
///
/// Every reachable node must be completed with its children dispatched, and
/// no step may be suspended.
#[must_use]
pub fn is_finished(execution: &Execution) -> bool {
    if execution.has_suspended_step() {
        return false;
    }
    reachable_nodes(execution).iter().all(|node_id| {
        execution
            .step(node_id.as_str())
            .is_some_and(|step| step.is_completed() && step.children_dispatched)
    })
}

/// Completed reachable nodes as a percentage of reachable nodes.
#[must_use]
pub fn progress(execution: &Execution) -> f64 {
    let reachable = reachable_nodes(execution);
    if reachable.is_empty() {
        return 0.0;
    }
    let completed = reachable
        .iter()
        .filter(|node_id| {
            execution
                .step(node_id.as_str())
                .is_some_and(|step| step.is_completed())
        })
        .count();
    #[allow(clippy::cast_precision_loss)]
    let ratio = completed as f64 / reachable.len() as f64;
    ratio * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use lantern_core::WorkflowId;
    use serde_json::json;

    fn output(value: JsonValue) -> Output {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn branching() -> WorkflowGraph {
        WorkflowGraph::from_parts(
            [
                Node::new("1", "trigger"),
                Node::new("2", "condition"),
                Node::new("3", "transform"),
                Node::new("7", "transform"),
            ],
            [
                Edge::new("1", "2"),
                Edge::when("2", "3", true),
                Edge::when("2", "7", false),
            ],
        )
        .unwrap()
    }

    fn targets(graph: &WorkflowGraph, node_id: &str, out: JsonValue) -> Vec<String> {
        let node = graph.get_node(node_id).unwrap();
        eligible_targets(graph, node, &output(out))
            .into_iter()
            .map(|id| id.as_str().to_string())
            .collect()
    }

    fn complete(execution: &mut Execution, node_id: &str, out: JsonValue) {
        let id = NodeId::from(node_id);
        execution.begin_step(&id, json!({}));
        let step = execution.step_mut(node_id).unwrap();
        step.complete(output(out));
        step.children_dispatched = true;
    }

    #[test]
    fn condition_node_follows_matching_branch() {
        let graph = branching();
        assert_eq!(targets(&graph, "2", json!({CONDITION_RESULT_KEY: true})), vec!["3"]);
        assert_eq!(targets(&graph, "2", json!({CONDITION_RESULT_KEY: false})), vec!["7"]);
    }

    #[test]
    fn condition_node_drops_unconditioned_edges_next_to_conditional_ones() {
        let graph = WorkflowGraph::from_parts(
            [
                Node::new("2", "condition"),
                Node::new("3", "transform"),
                Node::new("4", "transform"),
            ],
            [Edge::when("2", "3", true), Edge::new("2", "4")],
        )
        .unwrap();
        assert_eq!(targets(&graph, "2", json!({CONDITION_RESULT_KEY: true})), vec!["3"]);
    }

    #[test]
    fn condition_node_without_conditional_edges_keeps_all() {
        let graph = WorkflowGraph::from_parts(
            [
                Node::new("2", "condition"),
                Node::new("3", "transform"),
                Node::new("4", "transform"),
            ],
            [Edge::new("2", "3"), Edge::new("2", "4")],
        )
        .unwrap();
        assert_eq!(
            targets(&graph, "2", json!({CONDITION_RESULT_KEY: false})),
            vec!["3", "4"]
        );
    }

    #[test]
    fn non_condition_node_ignores_leaked_flag() {
        let graph = WorkflowGraph::from_parts(
            [
                Node::new("5", "analytics"),
                Node::new("6", "transform"),
                Node::new("8", "transform"),
            ],
            [Edge::when("5", "6", true), Edge::when("5", "8", false)],
        )
        .unwrap();
        assert_eq!(
            targets(&graph, "5", json!({CONDITION_RESULT_KEY: true})),
            vec!["6", "8"]
        );
    }

    #[test]
    fn duplicate_edges_yield_one_target() {
        let graph = WorkflowGraph::from_parts(
            [Node::new("1", "trigger"), Node::new("2", "transform")],
            [Edge::new("1", "2"), Edge::new("1", "2")],
        )
        .unwrap();
        assert_eq!(targets(&graph, "1", json!({})), vec!["2"]);
    }

    #[test]
    fn reachability_prunes_untaken_branch() {
        let mut execution = Execution::new(WorkflowId::new(), branching(), json!({}));
        complete(&mut execution, "1", json!({}));
        complete(&mut execution, "2", json!({CONDITION_RESULT_KEY: true}));

        let reachable: Vec<_> = reachable_nodes(&execution)
            .into_iter()
            .map(|id| id.as_str().to_string())
            .collect();
        assert_eq!(reachable, vec!["1", "2", "3"]);
        assert!(!is_finished(&execution));
        assert!((progress(&execution) - 200.0 / 3.0).abs() < 1e-9);

        complete(&mut execution, "3", json!({}));
        assert!(is_finished(&execution));
        assert!((progress(&execution) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn undispatched_children_block_completion() {
        let mut execution = Execution::new(WorkflowId::new(), branching(), json!({}));
        complete(&mut execution, "1", json!({}));
        complete(&mut execution, "2", json!({CONDITION_RESULT_KEY: true}));
        complete(&mut execution, "3", json!({}));
        execution.step_mut("2").unwrap().children_dispatched = false;

        assert!(!is_finished(&execution));
    }

    #[test]
    fn suspended_step_blocks_completion() {
        let mut execution = Execution::new(WorkflowId::new(), branching(), json!({}));
        complete(&mut execution, "1", json!({}));
        complete(&mut execution, "2", json!({CONDITION_RESULT_KEY: false}));
        complete(&mut execution, "7", json!({}));
        assert!(is_finished(&execution));

        execution.step_mut("7").unwrap().suspend(Output::new());
        assert!(!is_finished(&execution));
    }
}
