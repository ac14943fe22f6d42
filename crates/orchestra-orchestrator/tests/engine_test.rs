//! End-to-end tests for the planner loop
//!
//! Every collaborator is a test double: a scripted oracle keyed on prompt
//! markers, a canned warehouse, a recording sandbox runner and an in-memory
//! checkpoint store.

use orchestra_agent::{Oracle, ScriptedOracle, ScriptedReply, TimeoutOracle};
use orchestra_core::config::EngineConfig;
use orchestra_core::{
    AnalysisSource, OrchestraError, Phase, Record, Role, ThreadId,
    ITERATION_CAP_RATIONALE, PARSE_FAILURE_RATIONALE,
};
use orchestra_orchestrator::prompts::{INTERPRET_MARKER, PLANNER_MARKER, REPORT_MARKER, SQL_MARKER};
use orchestra_orchestrator::{
    Orchestrator, ProgressEvent, StopReason, NO_PAYLOAD_MESSAGE, PARTIAL_REPORT_NOTICE,
};
use orchestra_sandbox::{ResourceLimits, SandboxExecutor, StaticRunner};
use orchestra_storage::{
    CheckpointStore, MemoryCheckpointStore, StaticWarehouse, TursoCheckpointStore,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const SYNTH_MARKER: &str = "Python data processing expert";

fn revenue_rows() -> Vec<Record> {
    serde_json::from_value(json!([{"revenue": 12000}])).unwrap()
}

fn revenue_warehouse() -> Arc<StaticWarehouse> {
    Arc::new(StaticWarehouse::from_wire(
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, month TEXT, revenue INTEGER);",
        "Summary:\n| revenue |\n| --- |\n| 12000 |\n\n<<DATA_JSON>>[{\"revenue\": 12000}]<<DATA_JSON>>",
    ))
}

fn decision(action: &str, rationale: &str) -> String {
    json!({"next_action": action, "rationale": rationale}).to_string()
}

struct Harness {
    orchestrator: Orchestrator,
    warehouse: Arc<StaticWarehouse>,
    runner: Arc<StaticRunner>,
}

fn harness(oracle: Arc<dyn Oracle>, store: Arc<dyn CheckpointStore>) -> Harness {
    let warehouse = revenue_warehouse();
    let runner = Arc::new(StaticRunner::ok(
        "--- Analysis Start ---\nrevenue 12000\n--- Analysis End ---\n",
    ));
    let executor = SandboxExecutor::new(
        runner.clone(),
        ResourceLimits::default(),
        Duration::from_secs(5),
        2,
    );
    let orchestrator = Orchestrator::new(
        oracle,
        warehouse.clone(),
        executor,
        store,
        &EngineConfig::default(),
    );
    Harness {
        orchestrator,
        warehouse,
        runner,
    }
}

fn revenue_oracle() -> Arc<ScriptedOracle> {
    Arc::new(
        ScriptedOracle::new()
            .on(
                PLANNER_MARKER,
                [
                    decision("sql_generator", "no data yet"),
                    decision("report_generator", "revenue figure available"),
                ],
            )
            .on(
                SQL_MARKER,
                ["SELECT SUM(revenue) AS revenue FROM orders WHERE month = strftime('%Y-%m', 'now', '-1 month')"],
            )
            .on(REPORT_MARKER, ["# Revenue\n\nTotal revenue last month was 12000."]),
    )
}

#[tokio::test]
async fn test_total_revenue_last_month() {
    let oracle = revenue_oracle();
    let store = Arc::new(MemoryCheckpointStore::new());
    let h = harness(oracle.clone(), store.clone());
    let id = ThreadId::from("revenue");

    let outcome = h
        .orchestrator
        .run(id.clone(), "total revenue last month", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.planner_invocations, 2);
    let report = outcome.final_report.expect("report");
    assert!(report.contains("12000"));

    let state = &outcome.state;
    assert_eq!(state.phase, Phase::Done);
    assert!(state.sql_query.as_deref().unwrap().starts_with("SELECT SUM(revenue)"));
    assert_eq!(state.result_payload, Some(revenue_rows()));
    assert_eq!(h.warehouse.executed().len(), 1);

    // the report prompt saw the query result
    let report_prompt = oracle
        .prompts()
        .into_iter()
        .find(|p| p.contains(REPORT_MARKER))
        .unwrap();
    assert!(report_prompt.contains("12000"));

    let persisted = store.load(&id).await.unwrap().unwrap();
    assert_eq!(persisted.phase, Phase::Done);
    assert_eq!(persisted.final_report.as_deref(), Some(report.as_str()));
}

#[tokio::test]
async fn test_progress_events_follow_the_graph() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
    let h = harness(revenue_oracle(), Arc::new(MemoryCheckpointStore::new()));
    let orchestrator = h.orchestrator.with_progress(tx);

    orchestrator
        .run(ThreadId::from("p"), "total revenue last month", &CancellationToken::new())
        .await
        .unwrap();
    drop(orchestrator);

    let mut phases = Vec::new();
    while let Some(event) = rx.recv().await {
        phases.push(event.phase);
    }
    assert_eq!(
        phases,
        vec![
            Phase::Planning,
            Phase::QueryGen,
            Phase::QueryExec,
            Phase::Planning,
            Phase::Report,
        ]
    );
}

#[tokio::test]
async fn test_iteration_cap_forces_partial_report() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .on(PLANNER_MARKER, [decision("deep_analyzer", "look again")])
            .on(INTERPRET_MARKER, ["Nothing new."])
            .on(REPORT_MARKER, ["Best effort report."]),
    );
    let h = harness(oracle.clone(), Arc::new(MemoryCheckpointStore::new()));
    let orchestrator = h.orchestrator.with_max_iterations(3);

    let outcome = orchestrator
        .run(ThreadId::from("loop"), "why is revenue down", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::IterationCap);
    assert_eq!(outcome.planner_invocations, 3);
    assert_eq!(oracle.calls_matching(PLANNER_MARKER), 3);
    assert!(outcome.state.degraded);
    assert_eq!(outcome.state.analysis_log.len(), 3);

    let report = outcome.final_report.unwrap();
    assert!(report.starts_with(PARTIAL_REPORT_NOTICE));
    assert!(report.contains("Best effort report."));

    let cap_decision = outcome.state.pending_decision.unwrap();
    assert_eq!(cap_decision.rationale, ITERATION_CAP_RATIONALE);
}

#[tokio::test]
async fn test_cap_holds_for_any_oracle_behaviour() {
    for cap in [0usize, 1, 5] {
        // the planner never asks for the report and every other call fails
        let oracle = Arc::new(
            ScriptedOracle::new()
                .on(PLANNER_MARKER, [decision("sql_generator", "try again")])
                .with_fallback(ScriptedReply::Error("service unavailable".to_string())),
        );
        let orchestrator = harness(oracle.clone(), Arc::new(MemoryCheckpointStore::new()))
            .orchestrator
            .with_max_iterations(cap);

        let outcome = orchestrator
            .run(ThreadId::from(format!("cap-{}", cap)), "q", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(oracle.calls_matching(PLANNER_MARKER), cap);
        assert_eq!(outcome.planner_invocations, cap);
        assert_eq!(outcome.stop_reason, StopReason::IterationCap);
        assert_eq!(outcome.state.phase, Phase::Done);
        assert!(outcome.final_report.unwrap().starts_with(PARTIAL_REPORT_NOTICE));
    }
}

#[tokio::test]
async fn test_malformed_planner_output_reports() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .on(PLANNER_MARKER, ["Sure! I think we should query the database first."])
            .on(REPORT_MARKER, ["Could not plan; nothing to report yet."]),
    );
    let h = harness(oracle.clone(), Arc::new(MemoryCheckpointStore::new()));

    let outcome = h
        .orchestrator
        .run(ThreadId::from("bad"), "q", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.planner_invocations, 1);
    assert!(h.warehouse.executed().is_empty());
    assert!(outcome
        .state
        .message_log
        .iter()
        .any(|m| m.role == Role::Planner
            && m.content == format!("Planner decision: {}", PARSE_FAILURE_RATIONALE)));
    assert!(outcome.final_report.is_some());
}

#[tokio::test]
async fn test_dynamic_analysis_without_payload_skips_synthesis() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .on(
                PLANNER_MARKER,
                [
                    decision("mcp_analysis", "compute first"),
                    decision("report_generator", "give up"),
                ],
            )
            .on(SYNTH_MARKER, ["print(df)"])
            .on(REPORT_MARKER, ["No data."]),
    );
    let h = harness(oracle.clone(), Arc::new(MemoryCheckpointStore::new()));

    let outcome = h
        .orchestrator
        .run(ThreadId::from("nodata"), "q", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(oracle.calls_matching(SYNTH_MARKER), 0);
    assert!(h.runner.scripts().is_empty());
    assert!(outcome.state.analysis_log.is_empty());
    assert!(outcome
        .state
        .message_log
        .iter()
        .any(|m| m.content == NO_PAYLOAD_MESSAGE));
}

#[tokio::test]
async fn test_query_then_sandbox_then_interpret() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .on(
                PLANNER_MARKER,
                [
                    decision("sql_generator", "need data"),
                    json!({
                        "next_step": "mcp_analysis",
                        "reason": "needs computation",
                        "mcp_task": "share of revenue per row"
                    })
                    .to_string(),
                    decision("deep_analyzer", "interpret"),
                    decision("report_generator", "done"),
                ],
            )
            .on(SQL_MARKER, ["SELECT revenue FROM orders"])
            .on(SYNTH_MARKER, ["print(df['revenue'] / df['revenue'].sum())"])
            .on(INTERPRET_MARKER, ["All revenue came from one order."])
            .on(REPORT_MARKER, ["Revenue 12000, concentrated in one order."]),
    );
    let h = harness(oracle.clone(), Arc::new(MemoryCheckpointStore::new()));

    let outcome = h
        .orchestrator
        .run(ThreadId::from("full"), "revenue mix", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.planner_invocations, 4);

    let sources: Vec<AnalysisSource> =
        outcome.state.analysis_log.iter().map(|e| e.source).collect();
    assert_eq!(
        sources,
        vec![AnalysisSource::Sandbox, AnalysisSource::Interpretation]
    );

    let synth_prompt = oracle
        .prompts()
        .into_iter()
        .find(|p| p.contains(SYNTH_MARKER))
        .unwrap();
    assert!(synth_prompt.contains("Task: share of revenue per row"));
    assert!(synth_prompt.contains("\"revenue\":12000"));

    let scripts = h.runner.scripts();
    assert_eq!(scripts.len(), 1);
    assert!(scripts[0].contains("df['revenue'].sum()"));

    // interpretation read the sandbox output, not the planner message
    let interpret_prompt = oracle
        .prompts()
        .into_iter()
        .find(|p| p.contains(INTERPRET_MARKER))
        .unwrap();
    assert!(interpret_prompt.contains("revenue 12000"));
}

#[tokio::test]
async fn test_cancelled_thread_resumes_later() {
    let oracle = revenue_oracle();
    let store = Arc::new(MemoryCheckpointStore::new());
    let h = harness(oracle.clone(), store.clone());
    let id = ThreadId::from("cancel-me");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = h
        .orchestrator
        .run(id.clone(), "total revenue last month", &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    assert!(outcome.final_report.is_none());
    assert!(oracle.prompts().is_empty());
    assert_eq!(store.load(&id).await.unwrap().unwrap().phase, Phase::Planning);

    let outcome = h
        .orchestrator
        .resume(&id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert!(outcome.final_report.unwrap().contains("12000"));
}

#[tokio::test]
async fn test_cancellation_between_cycles() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
    let store = Arc::new(MemoryCheckpointStore::new());
    let h = harness(revenue_oracle(), store.clone());
    let orchestrator = h.orchestrator.with_progress(tx);
    let cancel = CancellationToken::new();

    // cancel as soon as the first planning cycle is reported
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if rx.recv().await.is_some() {
                cancel.cancel();
            }
        })
    };

    let id = ThreadId::from("mid-run");
    let outcome = orchestrator
        .run(id.clone(), "total revenue last month", &cancel)
        .await
        .unwrap();
    watcher.await.unwrap();

    // the in-flight step always completes; the thread stops at a cycle boundary
    if outcome.stop_reason == StopReason::Cancelled {
        let persisted = store.load(&id).await.unwrap().unwrap();
        assert_eq!(persisted.phase, outcome.state.phase);
        assert!(outcome.final_report.is_none());

        let resumed = orchestrator
            .resume(&id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resumed.stop_reason, StopReason::Completed);
    } else {
        assert_eq!(outcome.stop_reason, StopReason::Completed);
    }
}

#[tokio::test]
async fn test_resume_done_thread_calls_nothing() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let id = ThreadId::from("finished");
    let first = harness(revenue_oracle(), store.clone())
        .orchestrator
        .run(id.clone(), "total revenue last month", &CancellationToken::new())
        .await
        .unwrap();

    let silent = Arc::new(ScriptedOracle::new());
    let h = harness(silent.clone(), store);
    let again = h
        .orchestrator
        .resume(&id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(again.final_report, first.final_report);
    assert_eq!(again.stop_reason, StopReason::Completed);
    assert!(silent.prompts().is_empty());
    assert!(h.warehouse.executed().is_empty());
}

#[tokio::test]
async fn test_resume_unknown_thread_fails() {
    let h = harness(revenue_oracle(), Arc::new(MemoryCheckpointStore::new()));
    let err = h
        .orchestrator
        .resume(&ThreadId::from("ghost"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestraError::ThreadNotFound(_)));
}

#[tokio::test]
async fn test_planner_timeout_degrades_to_report() {
    let scripted = ScriptedOracle::new()
        .on(PLANNER_MARKER, [ScriptedReply::Hang])
        .on(REPORT_MARKER, ["Report without planning."]);
    let oracle = Arc::new(TimeoutOracle::new(scripted, Duration::from_millis(50)));
    let h = harness(oracle, Arc::new(MemoryCheckpointStore::new()));

    let outcome = h
        .orchestrator
        .run(ThreadId::from("slow"), "q", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    let decision = outcome.state.pending_decision.unwrap();
    assert!(decision.rationale.starts_with("oracle-failure"));
    assert_eq!(outcome.final_report.as_deref(), Some("Report without planning."));
}

#[tokio::test]
async fn test_concurrent_threads_are_independent() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let oracle = Arc::new(
        ScriptedOracle::new()
            .on(PLANNER_MARKER, [decision("report_generator", "enough")])
            .on(REPORT_MARKER, ["ok"]),
    );
    let h = Arc::new(harness(oracle, store.clone()));

    let mut handles = Vec::new();
    for i in 0..4 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            h.orchestrator
                .run(
                    ThreadId::from(format!("thread-{}", i)),
                    &format!("question {}", i),
                    &CancellationToken::new(),
                )
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Completed);
        assert_eq!(outcome.state.message_log[0].role, Role::User);
    }
    assert_eq!(store.list_threads().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_turso_checkpoints_record_every_transition() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(
        TursoCheckpointStore::open(temp_dir.path().join("checkpoints.db"))
            .await
            .unwrap(),
    );
    let h = harness(revenue_oracle(), store.clone());
    let id = ThreadId::from("durable");

    h.orchestrator
        .run(id.clone(), "total revenue last month", &CancellationToken::new())
        .await
        .unwrap();

    let phases: Vec<Phase> = store
        .history(&id)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.phase)
        .collect();
    // initial save, then one per transition
    assert_eq!(
        phases,
        vec![
            Phase::Planning,
            Phase::QueryGen,
            Phase::QueryExec,
            Phase::Planning,
            Phase::Report,
            Phase::Done,
        ]
    );
}
