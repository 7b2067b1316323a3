use super::expect_kind;
use crate::error::NodeError;
use crate::node::{CompareOp, Condition, NodeConfig, NodeKind};
use crate::types::{NodeId, NodeStatus};
use crate::workflow::dispatcher::{NodeContext, NodeHandler};
use crate::workflow::template;
use serde_json::{json, Value};

/// Evaluates a predicate over other nodes' outcomes. The boolean result is
/// data for downstream nodes and never changes scheduling.
pub struct ConditionalHandler;

#[async_trait::async_trait]
impl NodeHandler for ConditionalHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Conditional
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let config = expect_kind(ctx, |c| match c {
            NodeConfig::Conditional(c) => Some(c),
            _ => None,
        })?;

        let targets: &[NodeId] = if config.depends_on.is_empty() {
            &ctx.dependencies
        } else {
            &config.depends_on
        };

        let statuses: Vec<(&NodeId, NodeStatus)> = targets
            .iter()
            .map(|id| {
                let status = ctx
                    .upstream
                    .get(id)
                    .map(|s| s.status)
                    .unwrap_or(NodeStatus::Pending);
                (id, status)
            })
            .collect();

        let succeeded = |status: &NodeStatus| *status == NodeStatus::Completed;
        let result = match &config.condition {
            Condition::AllSuccess => statuses.iter().all(|(_, s)| succeeded(s)),
            Condition::AnySuccess => statuses.iter().any(|(_, s)| succeeded(s)),
            Condition::Exists(var) => ctx.lookup(var).is_some(),
            Condition::Compare { left, op, right } => {
                compare(&resolve(ctx, left), *op, &resolve(ctx, right))
            }
        };

        let condition = String::from(config.condition.clone());
        ctx.log(format!("Condition '{}' evaluated to {}", condition, result));

        let evaluated: Vec<Value> = statuses
            .iter()
            .map(|(id, status)| json!({ "node": id.as_str(), "status": status.as_str() }))
            .collect();

        Ok(json!({
            "result": result,
            "condition": condition,
            "evaluated": evaluated,
        }))
    }
}

/// A side that names a variable resolves to its value, otherwise it is a literal
fn resolve(ctx: &NodeContext, operand: &str) -> String {
    let operand = operand.trim();
    match ctx.lookup(operand) {
        Some(value) => template::to_text(&value),
        None => operand.trim_matches(|c| c == '"' || c == '\'').to_string(),
    }
}

/// Equality is textual; ordering is numeric when both sides parse as numbers
fn compare(left: &str, op: CompareOp, right: &str) -> bool {
    let numbers = left.parse::<f64>().ok().zip(right.parse::<f64>().ok());
    match op {
        CompareOp::Eq => match numbers {
            Some((l, r)) => l == r,
            None => left == right,
        },
        CompareOp::Ne => match numbers {
            Some((l, r)) => l != r,
            None => left != right,
        },
        CompareOp::Ge => numbers.map_or(left >= right, |(l, r)| l >= r),
        CompareOp::Le => numbers.map_or(left <= right, |(l, r)| l <= r),
        CompareOp::Gt => numbers.map_or(left > right, |(l, r)| l > r),
        CompareOp::Lt => numbers.map_or(left < right, |(l, r)| l < r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{completed, config, context, failed};
    use crate::workflow::dispatcher::NodeSnapshot;

    async fn evaluate(condition: Value, upstream: Vec<(&str, NodeSnapshot)>) -> Value {
        let ctx = context(config("conditional", condition), json!({ "limit": 10 }), upstream);
        ConditionalHandler.execute(&ctx).await.unwrap()
    }

    #[tokio::test]
    async fn test_all_and_any_success() {
        let upstream = || vec![("a", completed(json!({}))), ("b", failed("boom"))];

        let all = evaluate(json!({ "condition": "all_success" }), upstream()).await;
        assert_eq!(all["result"], false);

        let any = evaluate(json!({ "condition": "any_success" }), upstream()).await;
        assert_eq!(any["result"], true);
        assert_eq!(any["evaluated"][1], json!({ "node": "b", "status": "failed" }));
    }

    #[tokio::test]
    async fn test_declared_dependencies_take_precedence() {
        let result = evaluate(
            json!({ "condition": "all_success", "depends_on": ["a"] }),
            vec![("a", completed(json!({}))), ("b", failed("boom"))],
        )
        .await;
        assert_eq!(result["result"], true);
        assert_eq!(result["evaluated"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_declared_node_counts_as_not_successful() {
        let result = evaluate(
            json!({ "condition": "any_success", "depends_on": ["ghost"] }),
            vec![],
        )
        .await;
        assert_eq!(result["result"], false);
        assert_eq!(result["evaluated"][0]["status"], "pending");
    }

    #[tokio::test]
    async fn test_comparisons_resolve_variables() {
        let upstream = || vec![("score", completed(json!({ "value": 7, "label": "ok" })))];

        let cases = [
            ("score.value >= 5", true),
            ("score.value > input.limit", false),
            ("score.value < input.limit", true),
            ("score.value == 7.0", true),
            ("score.label == ok", true),
            ("score.label != 'ok'", false),
            ("score.status == completed", true),
            ("score.value", true),
            ("score.missing", false),
        ];

        for (condition, expected) in cases {
            let result = evaluate(json!({ "condition": condition }), upstream()).await;
            assert_eq!(result["result"], expected, "condition {}", condition);
        }
    }

    #[test]
    fn test_compare_falls_back_to_text_ordering() {
        assert!(compare("10", CompareOp::Gt, "9"));
        assert!(!compare("10", CompareOp::Gt, "9x"));
        assert!(compare("b", CompareOp::Gt, "a"));
    }
}
