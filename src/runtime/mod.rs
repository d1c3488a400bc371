/// Pipeline Execution Runtime
///
/// This module is the execution core:
/// - Dispatcher routing single tasks vs sequential vs DAG pipelines
/// - DAG scheduler launching runnable steps in parallel groups
/// - Sequential executor for pipelines without named steps
/// - Step runner (templates → backend call → outcome classification)
/// - Retry executor and step-level observability events

// Dispatcher entry point (single task / sequential / DAG routing)
pub mod dispatcher;

// DAG scheduler with parallel group launches
pub mod dag;

// Legacy in-order executor
pub mod sequential;

// Single step execution (forEach fan-out, retries, events)
pub mod step;

// Retry executor wrapping single attempts
pub mod retry;

// Step lifecycle event channel
pub mod events;

/// Progress ticks flow through an unbounded channel so executors never block
/// on a slow progress sink
pub type ProgressSender = tokio::sync::mpsc::UnboundedSender<u8>;

// Re-export main entry points
pub use dispatcher::dispatch;
pub use events::{StepEvent, StepEventKind};
