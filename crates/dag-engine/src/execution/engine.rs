//! Execution state machine
//!
//! Drives a built DAG to completion from a single coordinating task:
//!
//! - **Running**: admit WAITING nodes whose upstream nodes are all DONE, up to
//!   the pool's free capacity, and collect finished work
//! - **Draining**: entered on the first failure; not-yet-started nodes are
//!   cancelled, nodes already running are left to finish
//! - **Complete**: terminal; success iff no error message was recorded
//!
//! `tick` never blocks. `run` is a convenience driver that sleeps on worker
//! activity between ticks.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::context::{DagContext, ExecutionContext};
use crate::dag::{DagNode, DagNodeState};
use crate::error::{DagError, Result};
use crate::events::{EventSink, WorkflowEvent};
use crate::node::NodeId;

use super::pool::{TaskOutcome, TaskPoll, WorkerPool};
use super::TaskExecutor;

/// States of the execution state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Running,
    Draining,
    Complete,
}

/// Runs one DAG at a time over a bounded worker pool
pub struct ExecutionEngine {
    pool: WorkerPool,
    executor: Arc<dyn TaskExecutor>,
    event_sink: Arc<dyn EventSink>,
    phase: Option<ExecutionPhase>,
}

impl ExecutionEngine {
    pub fn new(
        pool: WorkerPool,
        executor: Arc<dyn TaskExecutor>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            pool,
            executor,
            event_sink,
            phase: None,
        }
    }

    /// Create an engine with a pool on the current tokio runtime
    pub fn from_config(
        config: &EngineConfig,
        executor: Arc<dyn TaskExecutor>,
        event_sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::from_current(config.worker_count)?;
        Ok(Self::new(pool, executor, event_sink))
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn phase(&self) -> Option<ExecutionPhase> {
        self.phase
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Some(ExecutionPhase::Complete)
    }

    /// Whether the last run recorded a failure
    pub fn is_error(&self, ctx: &DagContext) -> bool {
        ctx.execution.error_message().is_some()
    }

    /// Message of the first failure in the last run
    pub fn error_message<'a>(&self, ctx: &'a DagContext) -> Option<&'a str> {
        ctx.execution.error_message()
    }

    /// Start running the builder's default graph
    ///
    /// After a resolution pass this is the graph the resolver wrote into.
    pub fn start(&mut self, ctx: &mut DagContext) -> Result<()> {
        let graph = ctx.builder.default_graph().to_string();
        self.start_graph(ctx, &graph)
    }

    /// Start running a named graph
    ///
    /// Every node in the graph is put back to WAITING.
    pub fn start_graph(&mut self, ctx: &mut DagContext, graph: &str) -> Result<()> {
        if !ctx.builder.has_graph(graph) {
            return Err(DagError::UnknownGraph(graph.to_string()));
        }

        let node_ids = ctx.builder.node_ids(graph);
        for id in &node_ids {
            if let Some(node) = ctx.builder.get_mut(id) {
                node.rearm();
            }
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        ctx.execution.begin(run_id.clone(), graph);
        self.pool.reopen();

        log::info!(
            "Run {}: executing graph '{}' ({} nodes, {} workers)",
            run_id,
            graph,
            node_ids.len(),
            self.pool.worker_count()
        );
        self.emit(WorkflowEvent::RunStarted {
            run_id,
            graph: graph.to_string(),
            node_count: node_ids.len(),
        });

        self.transition(ctx, ExecutionPhase::Running);
        Ok(())
    }

    /// Advance the state machine by one non-blocking step
    pub fn tick(&mut self, ctx: &mut DagContext) -> Result<()> {
        let phase = self.phase.ok_or(DagError::NotStarted)?;
        let next = match phase {
            ExecutionPhase::Running => self.update_running(ctx)?,
            ExecutionPhase::Draining => self.update_draining(ctx),
            ExecutionPhase::Complete => None,
        };
        if let Some(next) = next {
            self.transition(ctx, next);
        }
        Ok(())
    }

    /// Tick until the run is complete, sleeping while workers are busy
    pub async fn run(&mut self, ctx: &mut DagContext) -> Result<()> {
        loop {
            self.tick(ctx)?;
            if self.is_complete() {
                return Ok(());
            }
            if self.in_flight(ctx) == 0 {
                let graph = ctx.execution.active_graph().unwrap_or_default().to_string();
                return Err(DagError::Stalled(graph));
            }
            self.pool.wait_for_activity().await;
        }
    }

    /// Clear the execution context and forget the current state
    pub fn reset(&mut self, ctx: &mut DagContext) {
        ctx.execution.reset();
        self.phase = None;
        self.pool.reopen();
    }

    fn transition(&mut self, ctx: &mut DagContext, next: ExecutionPhase) {
        let mut next = Some(next);
        while let Some(phase) = next {
            log::debug!("Execution: {:?} -> {:?}", self.phase, phase);
            self.phase = Some(phase);
            next = self.on_enter(ctx, phase);
        }
    }

    fn on_enter(&mut self, ctx: &mut DagContext, phase: ExecutionPhase) -> Option<ExecutionPhase> {
        match phase {
            ExecutionPhase::Running => None,
            ExecutionPhase::Draining => self.enter_draining(ctx),
            ExecutionPhase::Complete => {
                self.report(ctx);
                None
            }
        }
    }

    fn update_running(&mut self, ctx: &mut DagContext) -> Result<Option<ExecutionPhase>> {
        let graph = self.active_graph(ctx)?;
        let run_id = run_id(&ctx.execution);
        let node_ids = ctx.builder.node_ids(&graph);

        // QUEUED -> PROCESSING for tasks a worker has picked up
        let started: Vec<NodeId> = ctx
            .execution
            .queued
            .iter()
            .filter(|(_, handle)| handle.has_started())
            .map(|(id, _)| id.clone())
            .collect();
        for id in started {
            let Some(handle) = ctx.execution.queued.remove(&id) else {
                continue;
            };
            if let Some(node) = ctx.builder.get_mut(&id) {
                node.begin_processing(handle);
                self.emit(WorkflowEvent::node_state(&run_id, &id, DagNodeState::Processing));
            }
        }

        for id in &node_ids {
            let Some(node) = ctx.builder.get_mut(id) else {
                continue;
            };
            if node.state() != DagNodeState::Processing {
                continue;
            }
            let Some(TaskPoll::Finished(outcome)) = node.task_handle_mut().map(|h| h.poll()) else {
                continue;
            };
            let state = settle(node, &mut ctx.execution, outcome);
            self.emit(WorkflowEvent::node_state(&run_id, id, state));
        }

        if ctx.execution.error_message().is_some() {
            return Ok(Some(ExecutionPhase::Draining));
        }

        for id in &node_ids {
            if self.pool.available() == 0 {
                break;
            }
            if !is_ready(ctx, &graph, id) {
                continue;
            }
            let Some(handle) = self.pool.try_submit(id, Arc::clone(&self.executor))? else {
                break;
            };
            if let Some(node) = ctx.builder.get_mut(id) {
                node.set_state(DagNodeState::Queued);
            }
            ctx.execution.queued.insert(id.clone(), handle);
            log::debug!("Run {}: admitted '{}'", run_id, id);
            self.emit(WorkflowEvent::node_state(&run_id, id, DagNodeState::Queued));
        }

        let all_done = node_ids.iter().all(|id| {
            ctx.builder
                .get(id)
                .is_some_and(|n| n.state() == DagNodeState::Done)
        });
        Ok(all_done.then_some(ExecutionPhase::Complete))
    }

    fn enter_draining(&mut self, ctx: &mut DagContext) -> Option<ExecutionPhase> {
        self.pool.shutdown();

        let run_id = run_id(&ctx.execution);
        let graph = ctx.execution.active_graph().unwrap_or_default().to_string();

        for id in ctx.builder.node_ids(&graph) {
            let Some(node) = ctx.builder.get_mut(&id) else {
                continue;
            };
            match node.state() {
                DagNodeState::Waiting => {
                    node.set_state(DagNodeState::Canceled);
                    self.emit(WorkflowEvent::node_state(&run_id, &id, DagNodeState::Canceled));
                }
                DagNodeState::Queued => match ctx.execution.queued.remove(&id) {
                    Some(handle) if !handle.cancel() => {
                        // A worker began it after our last poll
                        node.begin_processing(handle);
                        ctx.execution.still_running.insert(id.clone());
                        self.emit(WorkflowEvent::node_state(&run_id, &id, DagNodeState::Processing));
                    }
                    _ => {
                        node.set_state(DagNodeState::Canceled);
                        self.emit(WorkflowEvent::node_state(&run_id, &id, DagNodeState::Canceled));
                    }
                },
                DagNodeState::Processing => {
                    ctx.execution.still_running.insert(id.clone());
                }
                _ => {}
            }
        }

        log::warn!(
            "Run {}: {}; waiting on {} running node(s)",
            run_id,
            ctx.execution.error_message().unwrap_or("failed"),
            ctx.execution.still_running.len()
        );

        ctx.execution
            .still_running
            .is_empty()
            .then_some(ExecutionPhase::Complete)
    }

    fn update_draining(&mut self, ctx: &mut DagContext) -> Option<ExecutionPhase> {
        let run_id = run_id(&ctx.execution);
        let running: Vec<NodeId> = ctx.execution.still_running.iter().cloned().collect();

        for id in running {
            let Some(node) = ctx.builder.get_mut(&id) else {
                ctx.execution.still_running.remove(&id);
                continue;
            };
            match node.task_handle_mut().map(|h| h.poll()) {
                Some(TaskPoll::Finished(outcome)) => {
                    let state = settle(node, &mut ctx.execution, outcome);
                    ctx.execution.still_running.remove(&id);
                    self.emit(WorkflowEvent::node_state(&run_id, &id, state));
                }
                Some(TaskPoll::Pending | TaskPoll::Running) => {}
                None => {
                    ctx.execution.still_running.remove(&id);
                }
            }
        }

        ctx.execution
            .still_running
            .is_empty()
            .then_some(ExecutionPhase::Complete)
    }

    fn report(&self, ctx: &DagContext) {
        let run_id = run_id(&ctx.execution);
        match ctx.execution.error_message() {
            Some(error) => {
                let graph = ctx.execution.active_graph().unwrap_or_default();
                let canceled: Vec<NodeId> = ctx
                    .builder
                    .node_ids(graph)
                    .into_iter()
                    .filter(|id| {
                        ctx.builder
                            .get(id)
                            .is_some_and(|n| n.state() == DagNodeState::Canceled)
                    })
                    .collect();
                log::warn!(
                    "Run {} failed: {} ({} node(s) canceled)",
                    run_id,
                    error,
                    canceled.len()
                );
                self.emit(WorkflowEvent::RunFailed {
                    run_id,
                    error: error.to_string(),
                    canceled,
                });
            }
            None => {
                log::info!("Run {} completed", run_id);
                self.emit(WorkflowEvent::RunCompleted { run_id });
            }
        }
    }

    /// Tasks that will eventually wake the coordinator
    fn in_flight(&self, ctx: &DagContext) -> usize {
        let graph = ctx.execution.active_graph().unwrap_or_default();
        let processing = ctx
            .builder
            .node_ids(graph)
            .iter()
            .filter(|id| {
                ctx.builder
                    .get(id)
                    .is_some_and(|n| n.state() == DagNodeState::Processing)
            })
            .count();
        // A worker may still hold its slot after its result was collected
        let busy = self.pool.worker_count().saturating_sub(self.pool.available());
        (processing + ctx.execution.queued.len()).max(busy)
    }

    fn active_graph(&self, ctx: &DagContext) -> Result<String> {
        ctx.execution
            .active_graph()
            .map(str::to_string)
            .ok_or(DagError::NotStarted)
    }

    fn emit(&self, event: WorkflowEvent) {
        let _ = self.event_sink.send(event);
    }
}

fn run_id(execution: &ExecutionContext) -> String {
    execution.run_id().unwrap_or_default().to_string()
}

/// WAITING with every upstream node DONE
fn is_ready(ctx: &DagContext, graph: &str, node_id: &str) -> bool {
    let waiting = ctx
        .builder
        .get(node_id)
        .is_some_and(|n| n.state() == DagNodeState::Waiting);
    waiting
        && ctx.builder.upstream_of(graph, node_id).iter().all(|up| {
            ctx.builder
                .get(up)
                .is_some_and(|n| n.state() == DagNodeState::Done)
        })
}

/// Apply a finished task's outcome to its node
fn settle(node: &mut DagNode, execution: &mut ExecutionContext, outcome: TaskOutcome) -> DagNodeState {
    match outcome {
        TaskOutcome::Completed(value) => node.complete(value),
        TaskOutcome::Failed(message) => {
            log::warn!("Node '{}' failed: {}", node.node_id(), message);
            execution.record_error(message.clone());
            node.fail(message);
        }
        TaskOutcome::Cancelled => {
            node.set_state(DagNodeState::Canceled);
        }
    }
    node.state()
}
