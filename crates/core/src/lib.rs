// Core types and functionality for the dagrun workflow engine

pub mod types;
pub mod config;
pub mod error;
pub mod node;
pub mod events;
pub mod services;
pub mod handlers;
pub mod storage;
pub mod workflow;

#[cfg(test)]
mod test_support;

pub use types::*;
pub use config::{EngineConfig, LlmDefaults};
pub use error::{EngineError, GraphError, NodeError};
pub use node::{NodeConfig, NodeKind};
pub use workflow::{ExecuteRequest, ExecutionGraph, RagPipelineBuilder, WorkflowExecutor};
