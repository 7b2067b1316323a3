pub mod dag;
pub mod dispatcher;
pub mod executor;
pub mod pipeline;
pub mod recorder;
pub mod scheduler;
pub mod template;

pub use dag::{ExecutionGraph, ExecutionNode};
pub use dispatcher::{NodeContext, NodeDispatcher, NodeHandler, NodeSnapshot, RunScope};
pub use executor::{ExecuteRequest, WorkflowExecutor};
pub use pipeline::RagPipelineBuilder;
pub use recorder::RunRecorder;
pub use scheduler::Scheduler;
