//! Planner: consult the oracle for the next decision

use crate::prompts::planner_prompt;
use orchestra_agent::Oracle;
use orchestra_core::{Decision, NextAction, Role, StateUpdate, TaskState};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Completion shape, accepting the legacy field names
#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(default, alias = "next_step")]
    next_action: Option<String>,
    #[serde(default, alias = "reason")]
    rationale: Option<String>,
    #[serde(default, alias = "mcp_task")]
    task_spec: Option<String>,
}

/// Parse a planner completion
///
/// A surrounding markdown fence is tolerated. Anything that is not a JSON
/// object of the expected shape yields [`Decision::parse_failure`].
pub fn parse_decision(completion: &str) -> Decision {
    let body = strip_fence(completion);

    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            debug!("Planner completion is not JSON: {}", e);
            return Decision::parse_failure();
        }
    };
    if !value.is_object() {
        return Decision::parse_failure();
    }

    match serde_json::from_value::<RawDecision>(value) {
        Ok(raw) => Decision {
            next_action: raw.next_action.map(|name| NextAction::parse(&name)),
            rationale: raw.rationale.unwrap_or_default(),
            task_spec: raw.task_spec.filter(|t| !t.trim().is_empty()),
        },
        Err(e) => {
            debug!("Planner completion has the wrong shape: {}", e);
            Decision::parse_failure()
        }
    }
}

fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Produces one decision per planning cycle; never fails
#[derive(Clone)]
pub struct Planner {
    oracle: Arc<dyn Oracle>,
    preview_chars: usize,
}

impl Planner {
    pub fn new(oracle: Arc<dyn Oracle>, preview_chars: usize) -> Self {
        Self {
            oracle,
            preview_chars,
        }
    }

    /// Ask the oracle for the next decision
    ///
    /// Oracle failures and timeouts resolve to a report decision.
    #[instrument(skip(self, state), fields(thread = %state.thread_id))]
    pub async fn decide(&self, state: &TaskState) -> Decision {
        let prompt = planner_prompt(state, self.preview_chars);
        match self.oracle.complete(&prompt).await {
            Ok(completion) => {
                let decision = parse_decision(&completion);
                if decision.rationale == orchestra_core::PARSE_FAILURE_RATIONALE {
                    warn!("Unparseable planner completion, falling back to report");
                }
                decision
            }
            Err(e) => {
                warn!("Planner oracle call failed: {}", e);
                Decision::oracle_failure(e)
            }
        }
    }

    /// Planning cycle as a state update
    pub async fn plan(&self, state: &TaskState) -> StateUpdate {
        let decision = self.decide(state).await;
        planner_update(decision)
    }
}

/// State update recording a decision
pub(crate) fn planner_update(decision: Decision) -> StateUpdate {
    StateUpdate::message(
        Role::Planner,
        format!("Planner decision: {}", decision.rationale),
    )
    .with_decision(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_agent::{ScriptedOracle, ScriptedReply, TimeoutOracle};
    use orchestra_core::{ThreadId, PARSE_FAILURE_RATIONALE};
    use std::time::Duration;

    #[test]
    fn test_parse_plain_and_fenced() {
        let d = parse_decision(r#"{"next_action": "sql_generator", "rationale": "no data yet"}"#);
        assert_eq!(d.next_action, Some(NextAction::Query));
        assert_eq!(d.rationale, "no data yet");

        let d = parse_decision(
            "```json\n{\"next_step\": \"mcp_analysis\", \"reason\": \"needs math\", \"mcp_task\": \"correlation of price and qty\"}\n```",
        );
        assert_eq!(d.next_action, Some(NextAction::DynamicAnalysis));
        assert_eq!(d.task_spec.as_deref(), Some("correlation of price and qty"));
    }

    #[test]
    fn test_parse_failures_fall_back_to_report() {
        let malformed = [
            "",
            "   ",
            r#"{"next_action": "sql_gen"#,
            r#"Sure! Here is my decision: {"next_action": "sql_generator", "rationale": "x"}"#,
            r#"["sql_generator", "x"]"#,
            r#""report_generator""#,
            r#"{"next_action": 3, "rationale": "x"}"#,
            "I think we should query the database.",
        ];
        for text in malformed {
            let d = parse_decision(text);
            assert_eq!(d, Decision::parse_failure(), "input {:?}", text);
            assert_eq!(d.next_action, Some(NextAction::Report));
            assert_eq!(d.rationale, PARSE_FAILURE_RATIONALE);
        }
    }

    #[test]
    fn test_parse_unknown_and_missing_action() {
        let d = parse_decision(r#"{"next_action": "executor", "rationale": "x"}"#);
        assert_eq!(d.next_action, Some(NextAction::Unrecognized("executor".to_string())));

        let d = parse_decision(r#"{"rationale": "thinking"}"#);
        assert_eq!(d.next_action, None);
        assert_eq!(d.rationale, "thinking");
    }

    #[tokio::test]
    async fn test_plan_appends_planner_message() {
        let oracle = Arc::new(
            ScriptedOracle::new().with_fallback(r#"{"next_action": "report_generator", "rationale": "enough"}"#),
        );
        let planner = Planner::new(oracle, 2000);
        let state = TaskState::new(ThreadId::from("t"), "q");

        let update = planner.plan(&state).await;
        assert_eq!(update.messages.len(), 1);
        assert_eq!(update.messages[0].role, Role::Planner);
        assert_eq!(update.messages[0].content, "Planner decision: enough");
        assert_eq!(update.decision.unwrap().next_action, Some(NextAction::Report));
    }

    #[tokio::test]
    async fn test_oracle_timeout_routes_to_report() {
        let oracle = Arc::new(TimeoutOracle::new(
            ScriptedOracle::new().with_fallback(ScriptedReply::Hang),
            Duration::from_millis(20),
        ));
        let planner = Planner::new(oracle, 2000);
        let decision = planner.decide(&TaskState::new(ThreadId::from("t"), "q")).await;

        assert_eq!(decision.next_action, Some(NextAction::Report));
        assert!(decision.rationale.starts_with("oracle-failure"));
    }
}
