//! Action nodes
//!
//! Each node reads the task state and returns a [`StateUpdate`]. External
//! failures become messages for the planner to read; no node returns an
//! error.

use crate::prompts::{interpret_prompt, report_prompt, sql_prompt};
use orchestra_agent::Oracle;
use orchestra_core::{
    AnalysisEntry, AnalysisSource, Phase, Role, StateUpdate, TaskState,
};
use orchestra_sandbox::{CapabilitySynthesizer, SandboxExecutor, DEFAULT_TASK_DESCRIPTION};
use orchestra_storage::{strip_sql_fences, Warehouse};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Reply of the dynamic-analysis node when no query result is loaded
pub const NO_PAYLOAD_MESSAGE: &str =
    "Error: no data available for dynamic analysis; run a SQL query first.";

/// Reply of the query-execution node when no statement was generated
pub const NO_QUERY_MESSAGE: &str = "No SQL query was generated; nothing to execute.";

/// Prefix of a report produced after the iteration cap
pub const PARTIAL_REPORT_NOTICE: &str =
    "> Partial result: the analysis was stopped at the iteration limit before it completed.\n\n";

/// The task-performing nodes with their injected collaborators
#[derive(Clone)]
pub struct ActionNodes {
    oracle: Arc<dyn Oracle>,
    warehouse: Arc<dyn Warehouse>,
    synthesizer: CapabilitySynthesizer,
    executor: SandboxExecutor,
}

impl ActionNodes {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        warehouse: Arc<dyn Warehouse>,
        synthesizer: CapabilitySynthesizer,
        executor: SandboxExecutor,
    ) -> Self {
        Self {
            oracle,
            warehouse,
            synthesizer,
            executor,
        }
    }

    /// Run the node for `phase`
    ///
    /// Planning and Done have no node; they yield an empty update.
    pub async fn run(&self, phase: Phase, state: &TaskState) -> StateUpdate {
        match phase {
            Phase::QueryGen => self.query_gen(state).await,
            Phase::QueryExec => self.query_exec(state).await,
            Phase::DynamicAnalysis => self.dynamic_analysis(state).await,
            Phase::Interpret => self.interpret(state).await,
            Phase::Report => self.report(state).await,
            Phase::Planning | Phase::Done => StateUpdate::default(),
        }
    }

    #[instrument(skip(self, state), fields(thread = %state.thread_id))]
    pub async fn query_gen(&self, state: &TaskState) -> StateUpdate {
        let schema = match self.warehouse.describe_schema().await {
            Ok(schema) => schema,
            Err(e) => {
                warn!("Schema unavailable: {}", e);
                format!("(schema unavailable: {})", e)
            }
        };

        match self.oracle.complete(&sql_prompt(&schema, &state.user_query)).await {
            Ok(sql) => {
                let sql = strip_sql_fences(&sql);
                info!("Generated SQL ({} chars)", sql.len());
                StateUpdate::message(Role::Tool, format!("Generated SQL: {}", sql))
                    .with_sql_query(sql)
            }
            Err(e) => {
                warn!("SQL generation failed: {}", e);
                // Blank statement so execution does not rerun a stale query
                StateUpdate::message(Role::Tool, format!("SQL generation failed: {}", e))
                    .with_sql_query("")
            }
        }
    }

    #[instrument(skip(self, state), fields(thread = %state.thread_id))]
    pub async fn query_exec(&self, state: &TaskState) -> StateUpdate {
        let Some(sql) = state.sql_query.as_deref().filter(|s| !s.trim().is_empty()) else {
            return StateUpdate::message(Role::Tool, NO_QUERY_MESSAGE);
        };

        match self.warehouse.execute(sql).await {
            Ok(result) => {
                let rows = result.payload.as_ref().map(|p| p.len()).unwrap_or(0);
                info!("Query produced {} rows", rows);
                StateUpdate::message(Role::Tool, format!("Database result: {}", result.summary))
                    .with_payload(result.payload)
            }
            Err(e) => {
                warn!("Query execution failed: {}", e);
                StateUpdate::message(Role::Tool, format!("Query execution error: {}", e))
                    .with_payload(None)
            }
        }
    }

    #[instrument(skip(self, state), fields(thread = %state.thread_id))]
    pub async fn dynamic_analysis(&self, state: &TaskState) -> StateUpdate {
        let Some(rows) = state.result_payload.as_deref() else {
            return StateUpdate::message(Role::Tool, NO_PAYLOAD_MESSAGE);
        };

        let task = state
            .pending_decision
            .as_ref()
            .and_then(|d| d.task_spec.as_deref())
            .unwrap_or(DEFAULT_TASK_DESCRIPTION);

        let capability = match self.synthesizer.synthesize(task, rows).await {
            Ok(capability) => capability,
            Err(e) => {
                warn!("Capability synthesis failed: {}", e);
                return StateUpdate::message(
                    Role::Tool,
                    format!("Capability synthesis failed for '{}': {}", task, e),
                );
            }
        };

        info!("Running dynamic capability for '{}'", task);
        let output = self.executor.execute(&capability).await;

        StateUpdate::message(Role::Tool, format!("Dynamic analysis result:\n{}", output))
            .with_analysis(AnalysisEntry::new(AnalysisSource::Sandbox, output))
    }

    #[instrument(skip(self, state), fields(thread = %state.thread_id))]
    pub async fn interpret(&self, state: &TaskState) -> StateUpdate {
        let context = state
            .most_recent_output()
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        match self.oracle.complete(&interpret_prompt(&state.user_query, context)).await {
            Ok(insight) => StateUpdate::message(Role::Analyst, insight.clone())
                .with_analysis(AnalysisEntry::new(AnalysisSource::Interpretation, insight)),
            Err(e) => {
                warn!("Interpretation failed: {}", e);
                StateUpdate::message(Role::Tool, format!("Interpretation failed: {}", e))
            }
        }
    }

    #[instrument(skip(self, state), fields(thread = %state.thread_id, degraded = state.degraded))]
    pub async fn report(&self, state: &TaskState) -> StateUpdate {
        let analysis = state.analysis_text();
        let latest = state
            .most_recent_output()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let prompt = report_prompt(&state.user_query, &analysis, latest, state.degraded);

        let body = match self.oracle.complete(&prompt).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Report generation failed: {}", e);
                let material = if analysis.trim().is_empty() {
                    latest.to_string()
                } else {
                    analysis
                };
                format!(
                    "Report generation failed ({}). Material collected so far:\n\n{}",
                    e, material
                )
            }
        };

        let report = if state.degraded {
            format!("{}{}", PARTIAL_REPORT_NOTICE, body)
        } else {
            body
        };

        StateUpdate::message(Role::Analyst, "Final report generated.").with_final_report(report)
    }
}
