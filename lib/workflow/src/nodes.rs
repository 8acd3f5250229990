//! Built-in node types.
//!
//! Concrete integrations (HTTP calls, agents, credential lookups) are
//! registered by the embedding application. These generic nodes are enough
//! to build runnable graphs.

use crate::context::ExecutionContext;
use crate::execution::{CLIENT_MESSAGE_KEY, CONDITION_RESULT_KEY, Output};
use crate::executor::{NodeExecutionArgs, NodeExecutor, NodeOutcome};
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Emits its input unchanged. Registered as `trigger` and `passthrough`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughNode;

#[async_trait]
impl NodeExecutor for PassthroughNode {
    async fn execute(&self, args: NodeExecutionArgs) -> NodeOutcome {
        let output = match args.input {
            JsonValue::Object(map) => map,
            JsonValue::Null => Output::new(),
            other => Output::from_iter([("value".to_string(), other)]),
        };
        NodeOutcome::success(output)
    }
}

/// Emits its configuration with templates resolved.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformNode;

#[async_trait]
impl NodeExecutor for TransformNode {
    async fn execute(&self, args: NodeExecutionArgs) -> NodeOutcome {
        let ctx = &args.context.execution;
        let output = args
            .node
            .data
            .iter()
            .map(|(key, value)| (key.clone(), ctx.resolve_value(value)))
            .collect();
        NodeOutcome::success(output)
    }
}

/// Comparison applied by a [`ConditionNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Equals,
    NotEquals,
    Contains,
    Exists,
    Truthy,
}

impl Operator {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "equals" | "==" => Some(Self::Equals),
            "not_equals" | "!=" => Some(Self::NotEquals),
            "contains" => Some(Self::Contains),
            "exists" => Some(Self::Exists),
            "truthy" => Some(Self::Truthy),
            _ => None,
        }
    }
}

/// Evaluates `left <operator> right` and emits `_conditionResult`.
///
/// `left` and `right` are resolved through templates first, so
/// `{"left": "{{1.status}}", "operator": "equals", "right": "200"}` compares
/// node 1's status with `"200"`. Without an operator the node tests `left`
/// for truthiness.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionNode;

#[async_trait]
impl NodeExecutor for ConditionNode {
    async fn execute(&self, args: NodeExecutionArgs) -> NodeOutcome {
        let data = &args.node.data;
        let ctx = &args.context.execution;

        let operator = match data.get("operator").and_then(JsonValue::as_str) {
            None => Operator::Truthy,
            Some(name) => match Operator::parse(name) {
                Some(op) => op,
                None => return NodeOutcome::error(format!("unknown condition operator '{name}'")),
            },
        };
        let left = resolve_operand(ctx, data.get("left"));
        let right = resolve_operand(ctx, data.get("right"));

        let result = evaluate(operator, &left, &right);
        NodeOutcome::success(Output::from_iter([(
            CONDITION_RESULT_KEY.to_string(),
            JsonValue::Bool(result),
        )]))
    }
}

fn resolve_operand(ctx: &ExecutionContext, value: Option<&JsonValue>) -> JsonValue {
    let resolved = value.map_or(JsonValue::Null, |v| ctx.resolve_value(v));
    match resolved {
        // A placeholder that survived resolution refers to nothing.
        JsonValue::String(s) if is_unresolved(&s) => JsonValue::Null,
        other => other,
    }
}

fn is_unresolved(s: &str) -> bool {
    let trimmed = s.trim();
    trimmed.starts_with("{{") && trimmed.ends_with("}}")
}

fn evaluate(operator: Operator, left: &JsonValue, right: &JsonValue) -> bool {
    match operator {
        Operator::Equals => loosely_equal(left, right),
        Operator::NotEquals => !loosely_equal(left, right),
        Operator::Contains => match left {
            JsonValue::String(s) => s.contains(text(right).as_str()),
            JsonValue::Array(items) => items.iter().any(|item| loosely_equal(item, right)),
            JsonValue::Object(map) => map.contains_key(text(right).as_str()),
            _ => false,
        },
        Operator::Exists => !left.is_null(),
        Operator::Truthy => truthy(left),
    }
}

/// Template resolution turns every value into text, so `"200"` and `200`
/// compare equal.
fn loosely_equal(left: &JsonValue, right: &JsonValue) -> bool {
    left == right || (!left.is_null() && !right.is_null() && text(left) == text(right))
}

fn text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !matches!(s.trim(), "" | "false" | "0"),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}

/// Fallback for client nodes without a dedicated executor.
///
/// Suspends with the resolved node data as the client message.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientNode;

#[async_trait]
impl NodeExecutor for ClientNode {
    async fn execute(&self, args: NodeExecutionArgs) -> NodeOutcome {
        let ctx = &args.context.execution;
        let message = ctx.resolve_value(&JsonValue::Object(args.node.data.clone()));
        let mut output = Output::new();
        output.insert(CLIENT_MESSAGE_KEY.to_string(), message);
        output.insert(
            "nodeType".to_string(),
            JsonValue::String(args.node.node_type.clone()),
        );
        NodeOutcome::suspended(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStep;
    use crate::executor::NodeContext;
    use crate::node::{Node, NodeId};
    use lantern_core::{ExecutionId, WorkflowId};
    use serde_json::json;

    fn args(node: Node, input: JsonValue) -> NodeExecutionArgs {
        let mut step = ExecutionStep::running(NodeId::from("1"), json!({}), 1);
        step.complete(Output::from_iter([
            ("status".to_string(), json!(200)),
            ("name".to_string(), json!("Ada")),
            ("tags".to_string(), json!(["vip", "beta"])),
        ]));
        NodeExecutionArgs {
            node,
            input,
            context: NodeContext {
                workflow_id: WorkflowId::new(),
                execution_id: ExecutionId::new(),
                execution: ExecutionContext::new([step]),
            },
        }
    }

    async fn condition(data: JsonValue) -> Option<bool> {
        let node = Node::new("2", "condition").with_data(data);
        match ConditionNode.execute(args(node, json!({}))).await {
            NodeOutcome::Success { output } => output[CONDITION_RESULT_KEY].as_bool(),
            _ => None,
        }
    }

    #[tokio::test]
    async fn passthrough_echoes_input() {
        let outcome = PassthroughNode
            .execute(args(Node::new("1", "trigger"), json!({"email": "a@b.c"})))
            .await;
        assert_eq!(
            outcome,
            NodeOutcome::success(Output::from_iter([("email".to_string(), json!("a@b.c"))]))
        );
    }

    #[tokio::test]
    async fn passthrough_wraps_scalars() {
        let outcome = PassthroughNode
            .execute(args(Node::new("1", "passthrough"), json!(7)))
            .await;
        assert_eq!(
            outcome,
            NodeOutcome::success(Output::from_iter([("value".to_string(), json!(7))]))
        );
    }

    #[tokio::test]
    async fn transform_resolves_templates() {
        let node = Node::new("2", "transform")
            .with_data(json!({"greeting": "Hello {{1.name}}", "missing": "{{9.x}}"}));
        let NodeOutcome::Success { output } = TransformNode.execute(args(node, json!({}))).await
        else {
            panic!("expected success");
        };
        assert_eq!(output["greeting"], "Hello Ada");
        assert_eq!(output["missing"], "{{9.x}}");
    }

    #[tokio::test]
    async fn condition_operators() {
        assert_eq!(
            condition(json!({"left": "{{1.status}}", "operator": "equals", "right": 200})).await,
            Some(true)
        );
        assert_eq!(
            condition(json!({"left": "{{1.name}}", "operator": "not_equals", "right": "Ada"}))
                .await,
            Some(false)
        );
        assert_eq!(
            condition(json!({"left": "{{1.name}}", "operator": "contains", "right": "d"})).await,
            Some(true)
        );
        assert_eq!(
            condition(json!({"left": "{{9.name}}", "operator": "exists"})).await,
            Some(false)
        );
        assert_eq!(condition(json!({"left": "{{1.status}}"})).await, Some(true));
        assert_eq!(condition(json!({"left": "false"})).await, Some(false));
        assert_eq!(condition(json!({})).await, Some(false));
    }

    #[tokio::test]
    async fn condition_rejects_unknown_operator() {
        let node = Node::new("2", "condition").with_data(json!({"operator": "matches"}));
        let outcome = ConditionNode.execute(args(node, json!({}))).await;
        assert!(matches!(outcome, NodeOutcome::Error { .. }));
    }

    #[tokio::test]
    async fn client_node_suspends_with_message() {
        let node = Node::client("3", "banner-form").with_data(json!({"title": "Hi {{1.name}}"}));
        let outcome = ClientNode.execute(args(node, json!({}))).await;
        let NodeOutcome::Suspended { output } = outcome else {
            panic!("expected suspension");
        };
        assert_eq!(output[CLIENT_MESSAGE_KEY]["title"], "Hi Ada");
        assert_eq!(output["nodeType"], "banner-form");
    }
}
