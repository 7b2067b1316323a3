//! Bounded-concurrency, dependency-respecting execution of one run.
//!
//! A single loop owns all scheduling state. Node handlers run as spawned
//! tasks and only report back through their join handles, so the
//! `ready`/`completed`/`failed` sets need no locking.

use super::dag::ExecutionGraph;
use super::dispatcher::{NodeContext, NodeDispatcher, NodeSnapshot, RunScope};
use super::recorder::RunRecorder;
use crate::config::EngineConfig;
use crate::error::NodeError;
use crate::events::{Event, EventSink, EventType};
use crate::types::{NodeId, NodeStatus, RunId, RunOutcome, RunStatus};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

pub struct Scheduler {
    dispatcher: Arc<NodeDispatcher>,
    recorder: RunRecorder,
    config: EngineConfig,
}

impl Scheduler {
    pub fn new(
        dispatcher: Arc<NodeDispatcher>,
        recorder: RunRecorder,
        config: &EngineConfig,
    ) -> Self {
        Self {
            dispatcher,
            recorder,
            config: config.clone(),
        }
    }

    fn max_concurrency(&self) -> usize {
        self.config.max_concurrency.max(1)
    }

    /// Drive every node of `graph` to a terminal state
    pub async fn run(
        &self,
        graph: &mut ExecutionGraph,
        scope: Arc<RunScope>,
        sink: &dyn EventSink,
    ) -> RunOutcome {
        let run_id = scope.run_id;
        let mut ready: VecDeque<NodeId> = graph.entry_nodes().into();
        let mut enqueued: HashSet<NodeId> = ready.iter().cloned().collect();
        let mut completed: HashSet<NodeId> = HashSet::new();
        let mut failed: HashSet<NodeId> = HashSet::new();
        let mut first_error: Option<String> = None;
        let mut running = FuturesUnordered::new();

        tracing::info!(
            "Scheduling {} nodes with concurrency {}: run_id={}",
            graph.len(),
            self.max_concurrency(),
            run_id
        );

        loop {
            while running.len() < self.max_concurrency() {
                let Some(id) = ready.pop_front() else {
                    break;
                };
                let Some(ctx) = self.start_node(graph, &scope, &id, sink).await else {
                    continue;
                };

                let dispatcher = self.dispatcher.clone();
                let task_ctx = ctx.clone();
                let handle = tokio::spawn(async move { dispatcher.execute(&task_ctx).await });
                running.push(async move { (ctx, handle.await) });
            }

            // Wait for any running node
            let Some((ctx, joined)) = running.next().await else {
                break;
            };

            let result = joined.unwrap_or_else(|e| Err(NodeError::Panicked(e.to_string())));
            let id = ctx.node_id.clone();
            let logs = ctx.take_logs();

            match result {
                Ok(value) => {
                    self.finish_node(graph, run_id, &id, Ok(value), logs, sink)
                        .await;
                    completed.insert(id.clone());

                    for dependent in graph.dependents(&id) {
                        if enqueued.contains(&dependent) {
                            continue;
                        }
                        let dependencies = graph.dependencies(&dependent);
                        let satisfied = dependencies.iter().all(|d| completed.contains(d))
                            && !dependencies.iter().any(|d| failed.contains(d));
                        if satisfied {
                            enqueued.insert(dependent.clone());
                            ready.push_back(dependent);
                        }
                    }
                }
                Err(err) => {
                    first_error.get_or_insert_with(|| format!("node '{}' failed: {}", id, err));
                    self.finish_node(graph, run_id, &id, Err(err), logs, sink)
                        .await;
                    failed.insert(id.clone());
                    self.cascade_failure(graph, run_id, &id, &completed, &mut failed, sink)
                        .await;
                }
            }
        }

        let status = if failed.is_empty() && completed.len() == graph.len() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };

        let error = match status {
            RunStatus::Completed => None,
            _ => first_error.or_else(|| {
                let stranded = graph.len() - completed.len() - failed.len();
                tracing::error!("{} nodes were never scheduled: run_id={}", stranded, run_id);
                Some(format!("{} nodes were never scheduled", stranded))
            }),
        };

        RunOutcome {
            run_id,
            status,
            nodes_executed: completed.len(),
            nodes_failed: failed.len(),
            error,
        }
    }

    /// Move a ready node to RUNNING and build its context
    async fn start_node(
        &self,
        graph: &mut ExecutionGraph,
        scope: &Arc<RunScope>,
        id: &NodeId,
        sink: &dyn EventSink,
    ) -> Option<Arc<NodeContext>> {
        let mut dependencies = graph.dependencies(id);
        for reference in graph.node(id)?.config.references() {
            if !dependencies.contains(reference) {
                dependencies.push(reference.clone());
            }
        }

        // Snapshot of everything this node may read, taken at dispatch time
        let mut upstream = BTreeMap::new();
        for other in graph.ancestors(id).iter().chain(dependencies.iter()) {
            if let Some(node) = graph.node(other) {
                upstream.insert(
                    other.clone(),
                    NodeSnapshot {
                        status: node.status,
                        result: node.result.clone(),
                        error: node.error.clone(),
                    },
                );
            }
        }

        let node = graph.node_mut(id)?;
        if !node.transition(NodeStatus::Running) {
            tracing::warn!(
                "Refusing to start node {} in state {}: run_id={}",
                id,
                node.status.as_str(),
                scope.run_id
            );
            return None;
        }

        tracing::debug!(
            "Dispatching node {} ({}): run_id={}",
            id,
            node.config.type_tag(),
            scope.run_id
        );

        let ctx = NodeContext::new(
            scope.clone(),
            id.clone(),
            node.name.clone(),
            node.config.clone(),
            self.config.node_timeout(node.timeout_secs),
            dependencies,
            upstream,
        );

        self.recorder.on_node_start(scope.run_id, node).await;
        sink.emit(Event::new(
            scope.run_id,
            EventType::NodeStarted {
                node_id: id.clone(),
                node_type: node.config.type_tag().to_string(),
            },
        ))
        .await;

        Some(Arc::new(ctx))
    }

    async fn finish_node(
        &self,
        graph: &mut ExecutionGraph,
        run_id: RunId,
        id: &NodeId,
        result: Result<Value, NodeError>,
        logs: Vec<String>,
        sink: &dyn EventSink,
    ) {
        let Some(node) = graph.node_mut(id) else {
            return;
        };

        let event = match result {
            Ok(value) => {
                node.result = Some(value);
                node.transition(NodeStatus::Completed);
                tracing::info!("Node {} completed: run_id={}", id, run_id);
                EventType::NodeCompleted {
                    node_id: id.clone(),
                    duration_ms: elapsed_ms(node),
                }
            }
            Err(err) => {
                let error = err.to_string();
                node.error = Some(error.clone());
                node.transition(NodeStatus::Failed);
                tracing::warn!("Node {} failed: run_id={}, error={}", id, run_id, error);
                EventType::NodeFailed {
                    node_id: id.clone(),
                    error,
                    duration_ms: elapsed_ms(node),
                }
            }
        };

        self.recorder.on_node_terminal(run_id, node, logs).await;
        sink.emit(Event::new(run_id, event)).await;
    }

    /// Fail every not-yet-terminal node downstream of `root` without running it
    async fn cascade_failure(
        &self,
        graph: &mut ExecutionGraph,
        run_id: RunId,
        root: &NodeId,
        completed: &HashSet<NodeId>,
        failed: &mut HashSet<NodeId>,
        sink: &dyn EventSink,
    ) {
        let mut queue: VecDeque<NodeId> = graph.dependents(root).into();

        while let Some(id) = queue.pop_front() {
            if completed.contains(&id) || failed.contains(&id) {
                continue;
            }
            let Some(node) = graph.node_mut(&id) else {
                continue;
            };
            if !node.transition(NodeStatus::Failed) {
                continue;
            }
            node.error = Some(format!("skipped: dependency '{}' failed", root));
            failed.insert(id.clone());

            tracing::info!("Skipping node {} because {} failed: run_id={}", id, root, run_id);
            self.recorder.on_node_terminal(run_id, node, Vec::new()).await;
            sink.emit(Event::new(
                run_id,
                EventType::NodeSkipped {
                    node_id: id.clone(),
                    failed_ancestor: root.clone(),
                },
            ))
            .await;

            queue.extend(graph.dependents(&id));
        }
    }
}

fn elapsed_ms(node: &super::dag::ExecutionNode) -> u64 {
    match (node.started_at, node.finished_at) {
        (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
        _ => 0,
    }
}
