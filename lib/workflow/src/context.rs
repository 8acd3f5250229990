//! Execution context.
//!
//! A read-only query surface over the steps of an execution, handed to every
//! node. It is rebuilt from persisted steps for each job and performs no I/O.
//!
//! Templates use `{{nodeId.field}}` to read a field of one node's output and
//! `{{field}}` to read the first output (in execution order) that has the
//! field. Placeholders that cannot be resolved are left untouched so a
//! template can be resolved again after a later node has run.

use crate::execution::{ExecutionStep, Output, StepStatus};
use crate::node::NodeId;
use regex::{Captures, Regex};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static TEMPLATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("template pattern is a valid regex")
});

/// Read-only view over an execution's steps.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Steps ordered by execution sequence.
    steps: Vec<ExecutionStep>,
}

impl ExecutionContext {
    /// Builds a context from steps in any order.
    pub fn new(steps: impl IntoIterator<Item = ExecutionStep>) -> Self {
        let mut steps: Vec<_> = steps.into_iter().collect();
        steps.sort_by_key(|step| step.sequence);
        Self { steps }
    }

    fn step(&self, node_id: &str) -> Option<&ExecutionStep> {
        self.steps.iter().find(|step| step.node_id.as_str() == node_id)
    }

    /// Returns a node's whole output, or one field of it.
    ///
    /// Returns `None` if the node has no step or the field is absent.
    #[must_use]
    pub fn node_output(&self, node_id: &str, field: Option<&str>) -> Option<JsonValue> {
        let step = self.step(node_id)?;
        match field {
            None => Some(JsonValue::Object(step.output.clone())),
            Some(field) => step.output.get(field).cloned(),
        }
    }

    /// Returns every step's output keyed by node ID, regardless of status.
    #[must_use]
    pub fn all_outputs(&self) -> BTreeMap<NodeId, Output> {
        self.steps
            .iter()
            .map(|step| (step.node_id.clone(), step.output.clone()))
            .collect()
    }

    /// Merges all outputs into one mapping; later steps win on collision.
    #[must_use]
    pub fn all_outputs_flattened(&self) -> Output {
        self.steps.iter().fold(Output::new(), |mut merged, step| {
            merged.extend(step.output.iter().map(|(k, v)| (k.clone(), v.clone())));
            merged
        })
    }

    /// Replaces every resolvable `{{expr}}` in the template.
    #[must_use]
    pub fn resolve_template(&self, template: &str) -> String {
        if !template.contains("{{") {
            return template.to_string();
        }
        TEMPLATE_PATTERN
            .replace_all(template, |caps: &Captures<'_>| {
                match self.lookup(&caps[1]) {
                    Some(value) => stringify(&value),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Resolves templates in every string of a JSON value.
    #[must_use]
    pub fn resolve_value(&self, value: &JsonValue) -> JsonValue {
        match value {
            JsonValue::String(s) => JsonValue::String(self.resolve_template(s)),
            JsonValue::Array(items) => {
                JsonValue::Array(items.iter().map(|item| self.resolve_value(item)).collect())
            }
            JsonValue::Object(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn lookup(&self, expr: &str) -> Option<JsonValue> {
        match expr.split_once('.') {
            Some((node_id, path)) => {
                let mut segments = path.split('.');
                let first = segments.next()?;
                let mut value = self.node_output(node_id, Some(first))?;
                for segment in segments {
                    value = match value {
                        JsonValue::Object(mut map) => map.remove(segment)?,
                        JsonValue::Array(mut items) => {
                            let index: usize = segment.parse().ok()?;
                            if index >= items.len() {
                                return None;
                            }
                            items.swap_remove(index)
                        }
                        _ => return None,
                    };
                }
                Some(value)
            }
            None => self
                .steps
                .iter()
                .find_map(|step| step.output.get(expr).cloned()),
        }
    }

    /// Returns true if the node has a step.
    #[must_use]
    pub fn has_executed(&self, node_id: &str) -> bool {
        self.step(node_id).is_some()
    }

    /// Returns the node's step status, if it has a step.
    #[must_use]
    pub fn node_status(&self, node_id: &str) -> Option<StepStatus> {
        self.step(node_id).map(|step| step.status)
    }

    /// Returns the most recently sequenced completed step.
    #[must_use]
    pub fn last_completed_step(&self) -> Option<&ExecutionStep> {
        self.steps.iter().rev().find(|step| step.is_completed())
    }

    /// Returns the steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }
}

fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
