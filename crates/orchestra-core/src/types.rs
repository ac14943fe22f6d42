//! Core type definitions for the Orchestra decision loop

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::query::Record;

/// Stable identifier for one independent run of the decision loop
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    /// Generate a fresh random thread id
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Author of a message in the observability trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Planner,
    Tool,
    Analyst,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Planner => write!(f, "planner"),
            Self::Tool => write!(f, "tool"),
            Self::Analyst => write!(f, "analyst"),
        }
    }
}

/// Role-tagged entry of the message log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Where an analytical finding came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    /// Output of a synthesized capability run in the sandbox
    Sandbox,
    /// Findings summary produced by the Interpret node
    Interpretation,
}

impl AnalysisSource {
    fn heading(&self) -> &'static str {
        match self {
            Self::Sandbox => "Computed result",
            Self::Interpretation => "Analyst insight",
        }
    }
}

/// One entry of the append-only analysis log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisEntry {
    pub source: AnalysisSource,
    pub text: String,
}

impl AnalysisEntry {
    pub fn new(source: AnalysisSource, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
        }
    }
}

/// Action the planner can select
///
/// Names follow the wire vocabulary the planner prompt advertises. Anything
/// else is kept verbatim as [`NextAction::Unrecognized`] so the router can
/// fall back deterministically instead of failing to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NextAction {
    Query,
    DynamicAnalysis,
    Interpret,
    Report,
    Unrecognized(String),
}

impl NextAction {
    /// Canonical wire name
    pub fn as_str(&self) -> &str {
        match self {
            Self::Query => "sql_generator",
            Self::DynamicAnalysis => "mcp_analysis",
            Self::Interpret => "deep_analyzer",
            Self::Report => "report_generator",
            Self::Unrecognized(name) => name,
        }
    }

    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "sql_generator" | "query" => Self::Query,
            "mcp_analysis" | "analysis" => Self::DynamicAnalysis,
            "deep_analyzer" | "interpret" => Self::Interpret,
            "report_generator" | "report" => Self::Report,
            _ => Self::Unrecognized(name.to_string()),
        }
    }
}

impl From<String> for NextAction {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<NextAction> for String {
    fn from(action: NextAction) -> Self {
        action.as_str().to_string()
    }
}

impl std::fmt::Display for NextAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rationale attached to the fallback decision for unparseable completions
pub const PARSE_FAILURE_RATIONALE: &str = "parse-failure";

/// Rationale attached to the synthetic decision once the iteration cap is hit
pub const ITERATION_CAP_RATIONALE: &str = "iteration-cap";

/// Structured output of the planner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub next_action: Option<NextAction>,
    pub rationale: String,
    #[serde(default)]
    pub task_spec: Option<String>,
}

impl Decision {
    pub fn new(next_action: NextAction, rationale: impl Into<String>) -> Self {
        Self {
            next_action: Some(next_action),
            rationale: rationale.into(),
            task_spec: None,
        }
    }

    pub fn with_task_spec(mut self, spec: impl Into<String>) -> Self {
        self.task_spec = Some(spec.into());
        self
    }

    /// Fallback used whenever a completion cannot be parsed
    pub fn parse_failure() -> Self {
        Self::new(NextAction::Report, PARSE_FAILURE_RATIONALE)
    }

    /// Synthetic decision forcing the terminal action
    pub fn iteration_cap() -> Self {
        Self::new(NextAction::Report, ITERATION_CAP_RATIONALE)
    }

    /// Fallback used when the oracle itself failed or timed out
    pub fn oracle_failure(detail: impl std::fmt::Display) -> Self {
        Self::new(NextAction::Report, format!("oracle-failure: {}", detail))
    }
}

/// State of the orchestration state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    Planning,
    QueryGen,
    QueryExec,
    DynamicAnalysis,
    Interpret,
    Report,
    Done,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Planning => "PLANNING",
            Self::QueryGen => "QUERY_GEN",
            Self::QueryExec => "QUERY_EXEC",
            Self::DynamicAnalysis => "DYNAMIC_ANALYSIS",
            Self::Interpret => "INTERPRET",
            Self::Report => "REPORT",
            Self::Done => "DONE",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PLANNING" => Ok(Self::Planning),
            "QUERY_GEN" => Ok(Self::QueryGen),
            "QUERY_EXEC" => Ok(Self::QueryExec),
            "DYNAMIC_ANALYSIS" => Ok(Self::DynamicAnalysis),
            "INTERPRET" => Ok(Self::Interpret),
            "REPORT" => Ok(Self::Report),
            "DONE" => Ok(Self::Done),
            _ => Err(format!("Invalid phase: {}", s)),
        }
    }
}

/// The single mutable record threaded through the loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub thread_id: ThreadId,
    pub user_query: String,
    pub message_log: Vec<Message>,
    #[serde(default)]
    pub sql_query: Option<String>,
    #[serde(default)]
    pub result_payload: Option<Vec<Record>>,
    #[serde(default)]
    pub analysis_log: Vec<AnalysisEntry>,
    #[serde(default)]
    pub final_report: Option<String>,
    #[serde(default)]
    pub pending_decision: Option<Decision>,
    #[serde(default)]
    pub phase: Phase,
    /// Bounded step counter: number of planner runs so far
    #[serde(default)]
    pub planner_invocations: usize,
    /// Set when the iteration cap forced the report
    #[serde(default)]
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskState {
    /// Seed a fresh state for a thread
    pub fn new(thread_id: ThreadId, user_query: impl Into<String>) -> Self {
        let user_query = user_query.into();
        let now = Utc::now();
        Self {
            thread_id,
            message_log: vec![Message::new(Role::User, user_query.clone())],
            user_query,
            sql_query: None,
            result_payload: None,
            analysis_log: Vec::new(),
            final_report: None,
            pending_decision: None,
            phase: Phase::Planning,
            planner_invocations: 0,
            degraded: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Most recent message not authored by the planner
    pub fn most_recent_output(&self) -> Option<&Message> {
        self.message_log
            .iter()
            .rev()
            .find(|m| m.role != Role::Planner)
    }

    /// Analysis log rendered as text, entries in insertion order
    pub fn analysis_text(&self) -> String {
        self.analysis_log
            .iter()
            .map(|entry| format!("{}:\n{}", entry.source.heading(), entry.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Apply a partial update produced by a node
    ///
    /// Logs only grow. The final report is write-once: a second report is
    /// dropped with a warning.
    pub fn apply(&mut self, update: StateUpdate) {
        self.message_log.extend(update.messages);
        self.analysis_log.extend(update.analysis);

        if let Some(sql) = update.sql_query {
            self.sql_query = Some(sql);
        }
        if let Some(payload) = update.result_payload {
            self.result_payload = payload;
        }
        if let Some(decision) = update.decision {
            self.pending_decision = Some(decision);
        }
        if let Some(report) = update.final_report {
            if self.final_report.is_some() {
                warn!(
                    "Thread {} already has a final report; ignoring replacement",
                    self.thread_id
                );
            } else {
                self.final_report = Some(report);
            }
        }

        self.updated_at = Utc::now();
    }
}

/// Partial state update returned by planner and action nodes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub sql_query: Option<String>,
    /// Outer `None` leaves the payload untouched; `Some(None)` clears it
    pub result_payload: Option<Option<Vec<Record>>>,
    pub analysis: Vec<AnalysisEntry>,
    pub final_report: Option<String>,
    pub decision: Option<Decision>,
}

impl StateUpdate {
    /// Update carrying a single message
    pub fn message(role: Role, content: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::new(role, content)],
            ..Default::default()
        }
    }

    pub fn with_sql_query(mut self, sql: impl Into<String>) -> Self {
        self.sql_query = Some(sql.into());
        self
    }

    pub fn with_payload(mut self, payload: Option<Vec<Record>>) -> Self {
        self.result_payload = Some(payload);
        self
    }

    pub fn with_analysis(mut self, entry: AnalysisEntry) -> Self {
        self.analysis.push(entry);
        self
    }

    pub fn with_final_report(mut self, report: impl Into<String>) -> Self {
        self.final_report = Some(report.into());
        self
    }

    pub fn with_decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }
}

/// Listing entry for persisted threads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: ThreadId,
    pub phase: Phase,
    pub step: usize,
    pub updated_at: DateTime<Utc>,
}

/// Truncate `text` to at most `max_chars` characters for prompt previews
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}... (truncated)", &text[..idx]),
        None => text.to_string(),
    }
}
