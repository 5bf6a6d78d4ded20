//! Workflow execution engine: graph scheduling, reference resolution, and
//! node-by-node dispatch through the tool gateway.

pub mod context;
pub mod executor;
pub mod resolver;
pub mod scheduler;

pub use context::RunContext;
pub use executor::WorkflowExecutor;
pub use resolver::{resolve_params, resolve_value};
pub use scheduler::execution_order;
