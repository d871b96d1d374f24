//! Multi-agent routing workflow.

pub mod aggregate;
pub mod graph;
pub mod state;

pub use aggregate::Aggregator;
pub use graph::RouterWorkflow;
pub use state::{AgentOutcome, WorkflowError, WorkflowEvent, WorkflowInput, WorkflowState};
