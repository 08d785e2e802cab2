mod common;

use std::sync::Arc;

use common::{
    run_log, wait_until, EchoGenerator, EmptyGenerator, FlakyProcessor, RecordingBehavior,
};
use serde_json::json;
use taskweave::behaviors::TemplateAnalysis;
use taskweave::config::{EventBusConfig, OrchestratorConfig, StoreConfig};
use taskweave::event_bus::{Event, GraphEvent, MemorySink, OrchestratorEvent, QueueEvent};
use taskweave::graph::NodeStatus;
use taskweave::orchestrator::{ConfigurationError, Orchestrator, SequenceStep};
use taskweave::unit::WorkUnit;

/// Orchestrator with a quiet bus, disabled persistence, and an attached
/// memory sink for observation.
fn observed_orchestrator(max_concurrency: usize) -> (Orchestrator, MemorySink) {
    let config = OrchestratorConfig::default()
        .with_max_concurrency(max_concurrency)
        .with_store(StoreConfig::disabled())
        .with_event_bus(EventBusConfig::new(vec![]));
    let orchestrator = Orchestrator::new(config);
    let sink = MemorySink::new();
    orchestrator.event_bus().add_sink(sink.clone());
    (orchestrator, sink)
}

#[tokio::test]
async fn sequence_executes_in_dependency_order() {
    let (orchestrator, sink) = observed_orchestrator(2);
    let log = run_log();

    let requirements = WorkUnit::new(
        "requirements",
        RecordingBehavior::new("requirements", &log),
        orchestrator.event_sender(),
    );
    let architecture = WorkUnit::new(
        "architecture",
        RecordingBehavior::new("architecture", &log),
        orchestrator.event_sender(),
    );
    let requirements_id = requirements.id().to_string();

    orchestrator.register_unit(requirements).unwrap();
    orchestrator.register_unit(architecture).unwrap();

    orchestrator
        .create_sequence(&[
            SequenceStep::new("requirements"),
            SequenceStep::new("architecture").depends_on(requirements_id),
        ])
        .unwrap();
    orchestrator.start();

    wait_until("both units finish", || log.lock().len() == 4).await;

    let entries = log.lock().clone();
    let req_end = entries
        .iter()
        .position(|(phase, label)| phase == "end" && label == "requirements")
        .unwrap();
    let arch_start = entries
        .iter()
        .position(|(phase, label)| phase == "start" && label == "architecture")
        .unwrap();
    assert!(req_end < arch_start);

    let status = orchestrator.status();
    assert_eq!(status.units, 2);
    assert!(status
        .graph
        .nodes
        .iter()
        .all(|n| n.status == NodeStatus::Completed));

    // The merged stream carries orchestrator and graph lifecycle notices.
    let events = sink.snapshot();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Orchestrator(OrchestratorEvent::Started { .. }))));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Graph(GraphEvent::Started { .. }))));
}

#[tokio::test]
async fn unknown_sequence_types_leave_the_graph_unchanged() {
    let (orchestrator, _sink) = observed_orchestrator(2);
    let log = run_log();

    let known = WorkUnit::new(
        "known",
        RecordingBehavior::new("known", &log),
        orchestrator.event_sender(),
    );
    orchestrator.register_unit(known).unwrap();

    let err = orchestrator
        .create_sequence(&[SequenceStep::new("known"), SequenceStep::new("missing")])
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigurationError::UnknownUnitType { unit_type } if unit_type == "missing"
    ));
    assert!(orchestrator.status().graph.nodes.is_empty());
}

#[tokio::test]
async fn template_analysis_pipeline_persists_artifacts_and_spawns_children() {
    let (orchestrator, _sink) = observed_orchestrator(2);
    let generator = EchoGenerator::new("gen");
    let store = Arc::clone(orchestrator.store());

    let risk_behavior = TemplateAnalysis::new(
        "Assess risks for {{description}}",
        "risks",
        generator.clone(),
        Arc::clone(&store),
    );
    let requirements_behavior = TemplateAnalysis::new(
        "Analyze requirements for {{description}}",
        "requirements",
        generator,
        Arc::clone(&store),
    )
    .with_child("risk-analysis", Arc::new(risk_behavior));

    let requirements = WorkUnit::new(
        "requirements",
        Arc::new(requirements_behavior),
        orchestrator.event_sender(),
    );
    requirements
        .set_state("description", json!("an invoicing service"))
        .unwrap();
    orchestrator.register_unit(requirements).unwrap();

    orchestrator
        .create_sequence(&[SequenceStep::new("requirements")])
        .unwrap();
    orchestrator.start();

    wait_until("child artifact lands in the store", || {
        store.get("risks").is_some()
    })
    .await;

    let requirements_artifact = store.get("requirements").unwrap();
    assert_eq!(
        requirements_artifact,
        json!("gen:Analyze requirements for an invoicing service")
    );
    let risks_artifact = store.get("risks").unwrap();
    assert_eq!(
        risks_artifact,
        json!("gen:Assess risks for an invoicing service")
    );

    // Parent and runtime child both completed in the graph.
    let status = orchestrator.status();
    assert_eq!(status.graph.nodes.len(), 2);
    assert!(status
        .graph
        .nodes
        .iter()
        .all(|n| n.status == NodeStatus::Completed));
}

#[tokio::test]
async fn empty_generation_fails_the_node() {
    let (orchestrator, sink) = observed_orchestrator(2);
    let store = Arc::clone(orchestrator.store());

    let behavior = TemplateAnalysis::new(
        "Analyze {{description}}",
        "requirements",
        Arc::new(EmptyGenerator),
        store,
    );
    let unit = WorkUnit::new(
        "requirements",
        Arc::new(behavior),
        orchestrator.event_sender(),
    );
    orchestrator.register_unit(unit).unwrap();
    orchestrator
        .create_sequence(&[SequenceStep::new("requirements")])
        .unwrap();
    orchestrator.start();

    wait_until("node failure observed", || {
        sink.snapshot()
            .iter()
            .any(|e| matches!(e, Event::Graph(GraphEvent::NodeFailed { .. })))
    })
    .await;
    assert!(!orchestrator.status().graph.running);
}

#[tokio::test]
async fn ad_hoc_background_work_flows_through_the_exposed_queue() {
    let (orchestrator, sink) = observed_orchestrator(2);

    orchestrator
        .queue()
        .register_processor("flaky", Arc::new(FlakyProcessor));
    orchestrator.start();

    let task_id = orchestrator
        .queue()
        .add_task("flaky", json!({}), 0)
        .unwrap();

    wait_until("queue task completes", || {
        sink.snapshot().iter().any(|e| {
            matches!(e, Event::Queue(QueueEvent::TaskCompleted { task_id: id, .. }) if *id == task_id)
        })
    })
    .await;

    let status = orchestrator.status();
    assert_eq!(status.queue.pending_tasks, 0);
    assert_eq!(status.queue.running_tasks, 0);
}

#[tokio::test]
async fn stop_halts_both_queue_and_scheduler_admission() {
    let (orchestrator, _sink) = observed_orchestrator(1);
    orchestrator.start();
    assert!(orchestrator.status().graph.running);
    assert!(orchestrator.status().queue.running);

    orchestrator.stop();
    let status = orchestrator.status();
    assert!(!status.graph.running);
    assert!(!status.queue.running);

    orchestrator.shutdown().await;
}
