use super::expect_kind;
use crate::error::NodeError;
use crate::node::{DataOperation, NodeConfig, NodeKind};
use crate::types::{NodeId, NodeStatus};
use crate::workflow::dispatcher::{NodeContext, NodeHandler};
use crate::workflow::template;
use serde_json::{json, Map, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Synchronous reshaping of upstream results
pub struct DataProcessingHandler;

#[async_trait::async_trait]
impl NodeHandler for DataProcessingHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::DataProcessing
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let config = expect_kind(ctx, |c| match c {
            NodeConfig::DataProcessing(c) => Some(c),
            _ => None,
        })?;

        match &config.operation {
            DataOperation::Passthrough => {
                let results = ctx.dependency_results();
                if results.len() == 1 {
                    return Ok(results.into_iter().next().map(|(_, v)| v).unwrap_or_default());
                }
                Ok(Value::Object(results))
            }
            DataOperation::Merge => {
                let mut merged = Map::new();
                for (node, result) in ctx.dependency_results() {
                    match result {
                        Value::Object(fields) => merged.extend(fields),
                        other => {
                            merged.insert(node, other);
                        }
                    }
                }
                Ok(Value::Object(merged))
            }
            DataOperation::Extract { source, pointer } => {
                let result = source_result(ctx, source)?;
                result.pointer(pointer).cloned().ok_or_else(|| {
                    NodeError::failed(format!(
                        "pointer '{}' not found in result of '{}'",
                        pointer, source
                    ))
                })
            }
            DataOperation::Template { template } => Ok(json!({ "text": ctx.render(template) })),
            DataOperation::Rerank {
                source,
                field,
                top_n,
                min_score,
            } => {
                let result = source_result(ctx, source)?;
                let segments: Vec<&str> = field.split('.').collect();
                let items = template::resolve_path(result, &segments)
                    .and_then(Value::as_array)
                    .ok_or_else(|| {
                        NodeError::failed(format!(
                            "result of '{}' has no list at '{}'",
                            source, field
                        ))
                    })?;

                let score = |item: &Value| item.get("score").and_then(Value::as_f64);
                let mut ranked: Vec<Value> = items
                    .iter()
                    .filter(|item| {
                        min_score.map_or(true, |min| score(*item).unwrap_or(f64::MIN) >= min)
                    })
                    .cloned()
                    .collect();
                // Stable sort keeps source order among equal scores
                ranked.sort_by(|a, b| {
                    score(b)
                        .unwrap_or(f64::MIN)
                        .total_cmp(&score(a).unwrap_or(f64::MIN))
                });
                ranked.truncate(*top_n);
                ctx.log(format!("Kept {} of {} items", ranked.len(), items.len()));

                let mut out = Map::new();
                out.insert("count".to_string(), json!(ranked.len()));
                out.insert(field.clone(), Value::Array(ranked));
                Ok(Value::Object(out))
            }
        }
    }
}

fn source_result<'a>(ctx: &'a NodeContext, source: &NodeId) -> Result<&'a Value, NodeError> {
    ctx.upstream
        .get(source)
        .filter(|s| s.status == NodeStatus::Completed)
        .and_then(|s| s.result.as_ref())
        .ok_or_else(|| NodeError::failed(format!("no result available from node '{}'", source)))
}

/// Runs an external command. Stdin receives the run input and upstream
/// results as JSON; stdout is parsed as JSON when possible.
pub struct CustomScriptHandler;

#[async_trait::async_trait]
impl NodeHandler for CustomScriptHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::CustomScript
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let config = expect_kind(ctx, |c| match c {
            NodeConfig::CustomScript(c) => Some(c),
            _ => None,
        })?;

        let args: Vec<String> = config.args.iter().map(|a| ctx.render(a)).collect();
        ctx.log(format!("Running {} {:?}", config.command, args));

        let mut child = Command::new(&config.command)
            .args(&args)
            .envs(config.env.iter().map(|(k, v)| (k.clone(), ctx.render(v))))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                NodeError::failed(format!("Failed to spawn '{}': {}", config.command, e))
            })?;

        let stdin_payload = json!({
            "input": ctx.scope.input,
            "results": Value::Object(ctx.dependency_results()),
        });
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A script that ignores stdin may close it early
                let _ = stdin.write_all(stdin_payload.to_string().as_bytes()).await;
            }
        };

        // Stdout must drain while stdin is written or both pipes can fill up
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| {
            NodeError::failed(format!("Failed to wait for '{}': {}", config.command, e))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            ctx.log(format!("stderr: {}", stderr));
        }

        if !output.status.success() {
            return Err(NodeError::failed(format!(
                "'{}' exited with {}: {}",
                config.command, output.status, stderr
            )));
        }

        Ok(serde_json::from_str(&stdout).unwrap_or_else(|_| json!({ "stdout": stdout })))
    }
}

/// Sleeps for a fixed duration
pub struct DelayHandler;

#[async_trait::async_trait]
impl NodeHandler for DelayHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Delay
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let config = expect_kind(ctx, |c| match c {
            NodeConfig::Delay(c) => Some(c),
            _ => None,
        })?;

        tokio::time::sleep(Duration::from_millis(config.duration_ms)).await;
        Ok(json!({ "delayedMs": config.duration_ms }))
    }
}
