//! Bounded worker pool and task handles
//!
//! The pool hands out at most `worker_count` concurrent tasks: a semaphore
//! permit is taken when the coordinator admits a node and travels with the
//! spawned task until it ends. Each task reports back through its
//! [`TaskHandle`], never by touching coordinator state.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify, Semaphore};

use super::TaskExecutor;
use crate::error::{DagError, Result};
use crate::node::NodeId;

const PENDING: u8 = 0;
const STARTED: u8 = 1;
const CANCELLED: u8 = 2;

/// Start gate shared by the coordinator and one worker task.
///
/// Exactly one of "start" and "cancel" can win.
#[derive(Debug, Default)]
struct StartTicket(AtomicU8);

impl StartTicket {
    fn try_start(&self) -> bool {
        self.0
            .compare_exchange(PENDING, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn try_cancel(&self) -> bool {
        self.0
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_started(&self) -> bool {
        self.0.load(Ordering::Acquire) == STARTED
    }
}

/// How a worker task ended
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(serde_json::Value),
    Failed(String),
    /// Cancelled before it started
    Cancelled,
}

/// Result of a non-blocking poll
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPoll {
    /// Admitted, no worker has begun it
    Pending,
    Running,
    Finished(TaskOutcome),
}

/// Opaque handle to one unit of in-flight work
#[derive(Debug)]
pub struct TaskHandle {
    node_id: NodeId,
    ticket: Arc<StartTicket>,
    result: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Whether a worker has begun running the task
    pub fn has_started(&self) -> bool {
        self.ticket.is_started()
    }

    /// Prevent the task from starting.
    ///
    /// Returns `false` if a worker already began it; running work is never
    /// interrupted.
    pub fn cancel(&self) -> bool {
        self.ticket.try_cancel()
    }

    /// Check for completion without blocking
    pub fn poll(&mut self) -> TaskPoll {
        match self.result.try_recv() {
            Ok(outcome) => TaskPoll::Finished(outcome),
            Err(oneshot::error::TryRecvError::Empty) => {
                if self.has_started() {
                    TaskPoll::Running
                } else {
                    TaskPoll::Pending
                }
            }
            Err(oneshot::error::TryRecvError::Closed) => TaskPoll::Finished(TaskOutcome::Failed(
                format!("Worker for node '{}' ended without reporting a result", self.node_id),
            )),
        }
    }
}

/// Notifies the coordinator when dropped, including during a panic unwind
struct WakeOnDrop(Arc<Notify>);

impl Drop for WakeOnDrop {
    fn drop(&mut self) {
        self.0.notify_one();
    }
}

/// Fixed-size pool of workers running on a tokio runtime
pub struct WorkerPool {
    runtime: Handle,
    semaphore: Arc<Semaphore>,
    worker_count: usize,
    accepting: AtomicBool,
    wake: Arc<Notify>,
}

impl WorkerPool {
    /// Create a pool that spawns onto the given runtime
    pub fn new(worker_count: usize, runtime: Handle) -> Result<Self> {
        if worker_count == 0 {
            return Err(DagError::InvalidConfig(
                "worker pool needs at least one worker".to_string(),
            ));
        }
        Ok(Self {
            runtime,
            semaphore: Arc::new(Semaphore::new(worker_count)),
            worker_count,
            accepting: AtomicBool::new(true),
            wake: Arc::new(Notify::new()),
        })
    }

    /// Create a pool on the runtime of the calling context
    pub fn from_current(worker_count: usize) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| DagError::NoRuntime(e.to_string()))?;
        Self::new(worker_count, runtime)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Workers not currently holding a task
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting new work; tasks already submitted are unaffected
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    /// Accept work again after a shutdown
    pub fn reopen(&self) {
        self.accepting.store(true, Ordering::Release);
    }

    /// Submit a node without blocking.
    ///
    /// Returns `Ok(None)` when every worker is busy.
    pub fn try_submit(
        &self,
        node_id: &str,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Option<TaskHandle>> {
        if !self.is_accepting() {
            return Err(DagError::PoolShutDown);
        }
        let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            return Ok(None);
        };

        let ticket = Arc::new(StartTicket::default());
        let (tx, rx) = oneshot::channel();
        let wake = Arc::clone(&self.wake);
        let task_ticket = Arc::clone(&ticket);
        let task_node = node_id.to_string();

        self.runtime.spawn(async move {
            // Dropped in reverse order on unwind: permit, then result channel,
            // then the wake-up
            let _wake = WakeOnDrop(Arc::clone(&wake));
            let result_tx = tx;
            let slot = permit;

            if !task_ticket.try_start() {
                drop(slot);
                let _ = result_tx.send(TaskOutcome::Cancelled);
                return;
            }
            wake.notify_one();

            let outcome = match executor.execute_task(&task_node).await {
                Ok(value) => TaskOutcome::Completed(value),
                Err(e) => TaskOutcome::Failed(e.to_string()),
            };
            // The slot must be free before the coordinator can observe the result
            drop(slot);
            let _ = result_tx.send(outcome);
        });

        Ok(Some(TaskHandle {
            node_id: node_id.to_string(),
            ticket,
            result: rx,
        }))
    }

    /// Wait until some worker starts or finishes a task
    pub async fn wait_for_activity(&self) {
        self.wake.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl TaskExecutor for Echo {
        async fn execute_task(&self, node_id: &str) -> Result<serde_json::Value> {
            Ok(serde_json::json!(node_id))
        }
    }

    struct Gated(Arc<Notify>);

    #[async_trait]
    impl TaskExecutor for Gated {
        async fn execute_task(&self, _node_id: &str) -> Result<serde_json::Value> {
            self.0.notified().await;
            Ok(serde_json::Value::Null)
        }
    }

    struct Panics;

    #[async_trait]
    impl TaskExecutor for Panics {
        async fn execute_task(&self, _node_id: &str) -> Result<serde_json::Value> {
            panic!("boom");
        }
    }

    async fn finish(pool: &WorkerPool, handle: &mut TaskHandle) -> TaskOutcome {
        loop {
            if let TaskPoll::Finished(outcome) = handle.poll() {
                return outcome;
            }
            pool.wait_for_activity().await;
        }
    }

    #[tokio::test]
    async fn test_submit_and_complete() {
        let pool = WorkerPool::from_current(2).unwrap();
        let mut handle = pool.try_submit("a", Arc::new(Echo)).unwrap().unwrap();

        assert_eq!(finish(&pool, &mut handle).await, TaskOutcome::Completed(serde_json::json!("a")));
        assert!(handle.has_started());
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let gate = Arc::new(Notify::new());
        let pool = WorkerPool::from_current(1).unwrap();
        let executor: Arc<dyn TaskExecutor> = Arc::new(Gated(Arc::clone(&gate)));

        let mut first = pool.try_submit("a", Arc::clone(&executor)).unwrap().unwrap();
        assert_eq!(pool.available(), 0);
        assert!(pool.try_submit("b", Arc::clone(&executor)).unwrap().is_none());

        gate.notify_one();
        assert_eq!(finish(&pool, &mut first).await, TaskOutcome::Completed(serde_json::Value::Null));

        while pool.available() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(pool.try_submit("b", executor).unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slot_is_free_when_result_arrives() {
        let pool = WorkerPool::from_current(1).unwrap();
        for _ in 0..500 {
            let mut handle = pool.try_submit("a", Arc::new(Echo)).unwrap().unwrap();
            finish(&pool, &mut handle).await;
            assert_eq!(pool.available(), 1);
        }
    }

    #[tokio::test]
    async fn test_cancel_wins_before_start() {
        // A current-thread runtime cannot start the task until we yield
        let pool = WorkerPool::from_current(1).unwrap();
        let mut handle = pool.try_submit("a", Arc::new(Echo)).unwrap().unwrap();

        assert!(handle.cancel());
        assert!(!handle.has_started());
        assert_eq!(finish(&pool, &mut handle).await, TaskOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_loses_after_start() {
        let gate = Arc::new(Notify::new());
        let pool = WorkerPool::from_current(1).unwrap();
        let mut handle = pool
            .try_submit("a", Arc::new(Gated(Arc::clone(&gate))))
            .unwrap()
            .unwrap();

        while !handle.has_started() {
            pool.wait_for_activity().await;
        }
        assert!(!handle.cancel());
        assert_eq!(handle.poll(), TaskPoll::Running);

        gate.notify_one();
        assert_eq!(finish(&pool, &mut handle).await, TaskOutcome::Completed(serde_json::Value::Null));
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_failure() {
        let pool = WorkerPool::from_current(1).unwrap();
        let mut handle = pool.try_submit("a", Arc::new(Panics)).unwrap().unwrap();

        match finish(&pool, &mut handle).await {
            TaskOutcome::Failed(message) => assert!(message.contains("'a'")),
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let pool = WorkerPool::from_current(1).unwrap();
        pool.shutdown();
        assert!(matches!(
            pool.try_submit("a", Arc::new(Echo)),
            Err(DagError::PoolShutDown)
        ));

        pool.reopen();
        assert!(pool.try_submit("a", Arc::new(Echo)).unwrap().is_some());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        assert!(WorkerPool::new(0, runtime.handle().clone()).is_err());
    }

    #[test]
    fn test_no_runtime() {
        assert!(matches!(WorkerPool::from_current(1), Err(DagError::NoRuntime(_))));
    }
}
