use super::dag::ExecutionGraph;
use super::dispatcher::{NodeDispatcher, RunScope};
use super::recorder::RunRecorder;
use super::scheduler::Scheduler;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{Event, EventLog, EventSink, EventType};
use crate::services::{notify_best_effort, Notifier, Services};
use crate::storage::{DefinitionStore, RunStore};
use crate::types::{
    NodeStatus, RunId, RunOutcome, RunStatus, WorkflowDefinition, WorkflowId, WorkflowRun,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

fn default_channel() -> String {
    "default".to_string()
}

/// Request to execute a stored workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub workflow_id: WorkflowId,
    /// Where progress notifications are delivered
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Exposed to node templates as `{{input...}}`
    #[serde(default)]
    pub input: Value,
}

impl ExecuteRequest {
    pub fn new(workflow_id: WorkflowId, channel: impl Into<String>) -> Self {
        Self {
            workflow_id,
            channel: channel.into(),
            input: Value::Null,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }
}

/// Workflow executor: builds the graph, records the run and drives the scheduler
pub struct WorkflowExecutor {
    definitions: Arc<dyn DefinitionStore>,
    runs: Arc<dyn RunStore>,
    event_log: Option<Arc<dyn EventLog>>,
    notifier: Arc<dyn Notifier>,
    dispatcher: Arc<NodeDispatcher>,
    config: EngineConfig,
}

impl WorkflowExecutor {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        runs: Arc<dyn RunStore>,
        dispatcher: NodeDispatcher,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        Ok(Self {
            definitions,
            runs,
            event_log: None,
            notifier,
            dispatcher: Arc::new(dispatcher),
            config,
        })
    }

    /// Executor with the built-in handler set wired to `services`
    pub fn with_services(
        definitions: Arc<dyn DefinitionStore>,
        runs: Arc<dyn RunStore>,
        services: &Services,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let dispatcher = NodeDispatcher::with_services(services, &config);
        Self::new(definitions, runs, dispatcher, services.notifier.clone(), config)
    }

    pub fn with_event_log(mut self, event_log: Arc<dyn EventLog>) -> Self {
        self.event_log = Some(event_log);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute a stored workflow, reporting progress on `channel`
    pub async fn execute_workflow(
        &self,
        workflow_id: &WorkflowId,
        channel: &str,
    ) -> Result<RunOutcome, EngineError> {
        self.execute(ExecuteRequest::new(workflow_id.clone(), channel)).await
    }

    pub async fn execute(&self, request: ExecuteRequest) -> Result<RunOutcome, EngineError> {
        let definition = self
            .definitions
            .load_workflow(&request.workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(request.workflow_id.clone()))?;

        self.execute_definition(&definition, &request.channel, request.input).await
    }

    /// Execute a definition that is not necessarily stored.
    ///
    /// Errors are returned only when execution could not start; node failures
    /// are reported through the outcome.
    pub async fn execute_definition(
        &self,
        definition: &WorkflowDefinition,
        channel: &str,
        input: Value,
    ) -> Result<RunOutcome, EngineError> {
        let mut graph = ExecutionGraph::build(&definition.nodes, &definition.edges)?;

        let mut run = WorkflowRun::start(definition.id.clone());
        let recorder = RunRecorder::new(self.runs.clone());
        recorder.on_run_start(&run).await?;

        tracing::info!(
            "Starting workflow execution: workflow_id={}, run_id={}",
            definition.id,
            run.id
        );

        let sink = ProgressSink::start(
            self.event_log.clone(),
            self.notifier.clone(),
            channel.to_string(),
            self.config.notify_timeout(),
        );
        sink.emit(Event::new(
            run.id,
            EventType::RunStarted {
                workflow_id: definition.id.clone(),
                channel: channel.to_string(),
                node_count: graph.len(),
            },
        ))
        .await;

        let scope = Arc::new(RunScope {
            run_id: run.id,
            workflow_id: definition.id.clone(),
            channel: channel.to_string(),
            owner: definition.owner.clone(),
            input,
        });

        let started = Instant::now();
        let scheduler = Scheduler::new(self.dispatcher.clone(), recorder.clone(), &self.config);
        let outcome = scheduler.run(&mut graph, scope, &sink).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        run.status = outcome.status;
        run.finished_at = Some(Utc::now());
        run.result = Some(summarize(&graph, &outcome));
        run.error = outcome.error.clone();
        recorder.on_run_terminal(&run).await;

        let event = match (&outcome.status, &outcome.error) {
            (RunStatus::Completed, _) => {
                tracing::info!(
                    "Workflow execution completed: run_id={}, nodes={}",
                    run.id,
                    outcome.nodes_executed
                );
                EventType::RunCompleted {
                    nodes_executed: outcome.nodes_executed,
                    duration_ms,
                }
            }
            (_, error) => {
                let error = error.clone().unwrap_or_default();
                tracing::error!("Workflow execution failed: run_id={}, error={}", run.id, error);
                EventType::RunFailed {
                    error,
                    nodes_executed: outcome.nodes_executed,
                    nodes_failed: outcome.nodes_failed,
                    duration_ms,
                }
            }
        };
        sink.emit(Event::new(run.id, event)).await;
        sink.finish(run.id).await;

        Ok(outcome)
    }
}

/// Aggregate stored on the run: counts plus the outputs of completed sink nodes
fn summarize(graph: &ExecutionGraph, outcome: &RunOutcome) -> Value {
    let outputs: serde_json::Map<String, Value> = graph
        .sink_nodes()
        .into_iter()
        .filter_map(|id| {
            let node = graph.node(&id)?;
            (node.status == NodeStatus::Completed)
                .then(|| (id.0.clone(), node.result.clone().unwrap_or(Value::Null)))
        })
        .collect();

    json!({
        "nodesExecuted": outcome.nodes_executed,
        "nodesFailed": outcome.nodes_failed,
        "totalNodes": graph.len(),
        "outputs": outputs,
    })
}

/// Fans events out to the event log and the delivery channel.
///
/// Notifications are delivered in order by a task of their own so that a
/// slow channel never holds up the scheduler loop.
struct ProgressSink {
    event_log: Option<Arc<dyn EventLog>>,
    messages: mpsc::UnboundedSender<String>,
    delivery: JoinHandle<()>,
    notify_timeout: Duration,
}

impl ProgressSink {
    fn start(
        event_log: Option<Arc<dyn EventLog>>,
        notifier: Arc<dyn Notifier>,
        channel: String,
        notify_timeout: Duration,
    ) -> Self {
        let (messages, mut rx) = mpsc::unbounded_channel::<String>();
        let delivery = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let delivered = tokio::time::timeout(
                    notify_timeout,
                    notify_best_effort(notifier.as_ref(), &channel, &message),
                )
                .await;
                if delivered.is_err() {
                    tracing::warn!(
                        "Notification to channel {} timed out after {:?}",
                        channel,
                        notify_timeout
                    );
                }
            }
        });

        Self {
            event_log,
            messages,
            delivery,
            notify_timeout,
        }
    }

    /// Flush the event log and give queued notifications a bounded grace period
    async fn finish(self, run_id: RunId) {
        if let Some(event_log) = &self.event_log {
            if let Err(e) = event_log.flush(run_id).await {
                tracing::warn!("Failed to flush event log: run_id={}, error={:#}", run_id, e);
            }
        }

        let Self {
            messages,
            mut delivery,
            notify_timeout,
            ..
        } = self;
        drop(messages);
        if tokio::time::timeout(notify_timeout, &mut delivery).await.is_err() {
            tracing::warn!("Dropping undelivered notifications: run_id={}", run_id);
            delivery.abort();
        }
    }
}

#[async_trait::async_trait]
impl EventSink for ProgressSink {
    async fn emit(&self, event: Event) {
        let message = event.event_type.describe();

        if let Some(event_log) = &self.event_log {
            let run_id = event.run_id;
            if let Err(e) = event_log.append(event).await {
                tracing::warn!("Failed to append event: run_id={}, error={:#}", run_id, e);
            }
        }

        // Only fails once the delivery task is gone
        let _ = self.messages.send(message);
    }
}
