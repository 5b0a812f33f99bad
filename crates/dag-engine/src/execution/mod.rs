//! DAG execution over a bounded worker pool.
//!
//! - [`WorkerPool`]: fixed number of workers, semaphore admission control
//! - [`TaskHandle`]: non-blocking poll/cancel handle for one node's work
//! - [`ExecutionEngine`]: the Running / Draining / Complete state machine
//!
//! Node work itself is opaque to this module and supplied by a
//! [`TaskExecutor`].

pub mod engine;
pub mod pool;

use async_trait::async_trait;

use crate::error::Result;

pub use engine::{ExecutionEngine, ExecutionPhase};
pub use pool::{TaskHandle, TaskOutcome, TaskPoll, WorkerPool};

/// Runs the domain logic of a single node
///
/// Implementations must not touch the DAG; the returned value is delivered
/// to the coordinator through the node's task handle.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute_task(&self, node_id: &str) -> Result<serde_json::Value>;
}
