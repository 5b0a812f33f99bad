//! End-to-end: resolve a target node, then execute the resulting DAG

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dag_engine::{
    validate_workflow, DagContext, DagError, DagNodeState, EngineConfig, EventSink,
    ExecutionEngine, ExecutionPhase, PortDataType, ResolutionEngine, Result, TaskExecutor,
    VecEventSink, WorkflowBuilder, WorkflowEvent, WorkflowGraph,
};
use tokio::sync::Semaphore;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Fails nodes in `failing`; nodes with a gate wait for a permit first
#[derive(Default)]
struct Script {
    failing: HashSet<String>,
    gates: HashMap<String, Arc<Semaphore>>,
    calls: Mutex<Vec<String>>,
}

impl Script {
    fn gate(&mut self, node: &str) -> Arc<Semaphore> {
        Arc::clone(
            self.gates
                .entry(node.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(0))),
        )
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskExecutor for Script {
    async fn execute_task(&self, node_id: &str) -> Result<serde_json::Value> {
        self.calls.lock().unwrap().push(node_id.to_string());
        if let Some(gate) = self.gates.get(node_id) {
            gate.acquire().await.unwrap().forget();
        }
        if self.failing.contains(node_id) {
            return Err(DagError::failed(node_id, "boom"));
        }
        Ok(serde_json::json!(format!("{}-out", node_id)))
    }
}

/// Tick until `done` holds, sleeping on worker activity in between
async fn drive_until(
    engine: &mut ExecutionEngine,
    ctx: &mut DagContext,
    done: impl Fn(&ExecutionEngine, &DagContext) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            engine.tick(ctx).unwrap();
            if done(engine, ctx) {
                return;
            }
            engine.pool().wait_for_activity().await;
        }
    })
    .await
    .expect("condition not reached");
}

fn state(ctx: &DagContext, node: &str) -> Option<DagNodeState> {
    ctx.builder.get(node).map(|n| n.state())
}

/// A feeds both B and C
fn fan_out() -> WorkflowGraph {
    WorkflowBuilder::new("wf", "Fan out")
        .add_node("A", "load")
        .add_node("B", "blur")
        .with_input("image", PortDataType::Image)
        .add_node("C", "sharpen")
        .with_input("image", PortDataType::Image)
        .add_edge("A", "image", "B", "image")
        .add_edge("A", "image", "C", "image")
        .build()
}

#[tokio::test]
async fn test_target_closure_runs_in_dependency_order() {
    init_logging();
    let mut graph = fan_out();
    assert!(validate_workflow(&graph).is_empty());

    let config = EngineConfig::default().with_worker_count(1);
    let events = Arc::new(VecEventSink::new());
    let sink: Arc<dyn EventSink> = events.clone();
    let executor = Arc::new(Script::default());

    let mut ctx = DagContext::from_config(&config);
    let mut resolver = ResolutionEngine::new(&config, Arc::clone(&sink));
    resolver.build_dag_for_node(&mut ctx, &mut graph, "C").unwrap();
    assert_eq!(ctx.builder.node_ids("default"), vec!["A", "C"]);

    let mut engine = ExecutionEngine::from_config(&config, executor.clone(), sink).unwrap();
    engine.start(&mut ctx).unwrap();
    engine.run(&mut ctx).await.unwrap();

    assert!(engine.is_complete());
    assert!(!engine.is_error(&ctx));
    assert_eq!(executor.calls(), vec!["A", "C"]);
    assert_eq!(
        ctx.builder.get("C").and_then(|n| n.output()),
        Some(&serde_json::json!("C-out"))
    );

    let transitions: Vec<(String, DagNodeState)> = events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            WorkflowEvent::NodeStateChanged { node_id, state, .. } => Some((node_id, state)),
            _ => None,
        })
        .collect();
    let position = |node: &str, s: DagNodeState| {
        transitions
            .iter()
            .position(|(n, st)| n == node && *st == s)
            .unwrap()
    };
    assert!(position("A", DagNodeState::Done) < position("C", DagNodeState::Queued));
    assert!(transitions.iter().all(|(n, _)| n != "B"));
    assert!(matches!(
        events.events().last(),
        Some(WorkflowEvent::RunCompleted { .. })
    ));
}

#[tokio::test]
async fn test_failure_cancels_pending_and_waits_for_running() {
    init_logging();
    let mut graph = WorkflowBuilder::new("wf", "Join")
        .add_node("x", "load")
        .add_node("y", "load")
        .add_node("out", "merge")
        .with_input("l", PortDataType::Any)
        .with_input("r", PortDataType::Any)
        .add_edge("x", "value", "out", "l")
        .add_edge("y", "value", "out", "r")
        .build();

    let mut script = Script::default();
    script.failing.insert("x".to_string());
    let gate_x = script.gate("x");
    let gate_y = script.gate("y");
    let executor = Arc::new(script);

    let config = EngineConfig::default().with_worker_count(2);
    let events = Arc::new(VecEventSink::new());
    let sink: Arc<dyn EventSink> = events.clone();
    let mut ctx = DagContext::from_config(&config);
    ResolutionEngine::new(&config, Arc::clone(&sink))
        .build_dag_for_node(&mut ctx, &mut graph, "out")
        .unwrap();

    let mut engine = ExecutionEngine::from_config(&config, executor.clone(), sink).unwrap();
    engine.start(&mut ctx).unwrap();

    drive_until(&mut engine, &mut ctx, |_, ctx| {
        state(ctx, "x") == Some(DagNodeState::Processing)
            && state(ctx, "y") == Some(DagNodeState::Processing)
    })
    .await;

    gate_x.add_permits(1);
    drive_until(&mut engine, &mut ctx, |engine, _| {
        engine.phase() == Some(ExecutionPhase::Draining)
    })
    .await;

    assert_eq!(state(&ctx, "x"), Some(DagNodeState::Errored));
    assert_eq!(state(&ctx, "y"), Some(DagNodeState::Processing));
    assert_eq!(state(&ctx, "out"), Some(DagNodeState::Canceled));
    assert_eq!(ctx.execution.still_running().collect::<Vec<_>>(), vec!["y"]);
    assert!(!engine.pool().is_accepting());

    gate_y.add_permits(1);
    engine.run(&mut ctx).await.unwrap();

    assert!(engine.is_complete());
    assert_eq!(state(&ctx, "y"), Some(DagNodeState::Done));
    assert_eq!(
        engine.error_message(&ctx),
        Some("Node 'x' failed: boom")
    );
    assert!(!executor.calls().contains(&"out".to_string()));

    match events.events().last() {
        Some(WorkflowEvent::RunFailed { error, canceled, .. }) => {
            assert!(error.contains("boom"));
            assert_eq!(canceled, &vec!["out".to_string()]);
        }
        other => panic!("Expected RunFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_start_runs_graph_named_in_config() {
    init_logging();
    let mut graph = fan_out();
    let config = EngineConfig::default()
        .with_worker_count(2)
        .with_default_graph("preview");

    // Context built without the config
    let mut ctx = DagContext::new();
    ResolutionEngine::new(&config, Arc::new(VecEventSink::new()))
        .build_dag_for_node(&mut ctx, &mut graph, "B")
        .unwrap();

    let mut engine = ExecutionEngine::from_config(
        &config,
        Arc::new(Script::default()),
        Arc::new(VecEventSink::new()),
    )
    .unwrap();
    engine.start(&mut ctx).unwrap();
    engine.run(&mut ctx).await.unwrap();

    assert_eq!(ctx.execution.active_graph(), Some("preview"));
    assert_eq!(state(&ctx, "B"), Some(DagNodeState::Done));
    assert!(!engine.is_error(&ctx));
}

#[tokio::test]
async fn test_cycle_leaves_nothing_to_run() {
    init_logging();
    let mut graph = WorkflowBuilder::new("wf", "Cyclic")
        .add_node("a", "x")
        .with_input("in", PortDataType::Any)
        .add_node("b", "x")
        .with_input("in", PortDataType::Any)
        .add_edge("a", "out", "b", "in")
        .add_edge("b", "out", "a", "in")
        .build();
    assert!(!validate_workflow(&graph).is_empty());

    let config = EngineConfig::default();
    let mut ctx = DagContext::from_config(&config);
    let mut resolver = ResolutionEngine::new(&config, Arc::new(VecEventSink::new()));

    let err = resolver
        .build_dag_for_node(&mut ctx, &mut graph, "a")
        .unwrap_err();
    assert!(err.is_cycle());
    assert!(err.to_string().contains("'a'"));
    assert!(err.to_string().contains("'b'"));

    resolver.reset();
    ctx.clear();

    let mut engine = ExecutionEngine::from_config(
        &config,
        Arc::new(Script::default()),
        Arc::new(VecEventSink::new()),
    )
    .unwrap();
    assert!(matches!(
        engine.start(&mut ctx),
        Err(DagError::UnknownGraph(_))
    ));
}
