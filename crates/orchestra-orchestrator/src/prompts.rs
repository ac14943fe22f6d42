//! Oracle prompt templates
//!
//! Markers such as `Task:` and `Requirements:` are stable so scripted oracles
//! in tests can route on them.

use orchestra_core::{truncate_preview, TaskState, DATA_SENTINEL};

/// Marker present in every planner prompt
pub const PLANNER_MARKER: &str = "You are the coordinator of an analytics assistant.";
/// Marker present in every SQL generation prompt
pub const SQL_MARKER: &str = "You are a SQL expert.";
/// Marker present in every interpretation prompt
pub const INTERPRET_MARKER: &str = "You are a data analyst.";
/// Marker present in every report prompt
pub const REPORT_MARKER: &str = "As head of e-commerce operations";

/// Directive prompt asking for the next decision as JSON
pub fn planner_prompt(state: &TaskState, preview_chars: usize) -> String {
    let latest = state
        .most_recent_output()
        .map(|m| truncate_preview(&m.content, preview_chars))
        .unwrap_or_else(|| "None".to_string());

    format!(
        r#"{marker}
Goal: {goal}

Current state / latest result:
{latest}

Decide the next step. Reply with JSON only:
{{
  "next_action": "sql_generator" (query the database) | "mcp_analysis" (process the data with Python) | "deep_analyzer" (interpret the data) | "report_generator" (write the report and finish),
  "rationale": "why this step",
  "task_spec": "if mcp_analysis, describe what to compute (e.g. weighted average inventory turnover)"
}}

Rules:
1. If there is no data yet, go to sql_generator.
2. If there are SQL results that need non-trivial computation (correlation, complex cleaning), go to mcp_analysis.
3. If the data is sufficient, go to deep_analyzer for a business interpretation.
4. Once interpretation is complete, go to report_generator.
"#,
        marker = PLANNER_MARKER,
        goal = state.user_query,
        latest = latest,
    )
}

pub fn sql_prompt(schema: &str, user_query: &str) -> String {
    format!(
        r#"{marker}
Schema:
{schema}

Request: {user_query}

Write one executable SQLite statement.
Requirements:
1. Use SQLite syntax (LIMIT, strftime for dates).
2. Output only the SQL, no markdown, no explanation.
"#,
        marker = SQL_MARKER,
    )
}

pub fn interpret_prompt(user_query: &str, data_result: &str) -> String {
    format!(
        r#"{marker}
Request: {user_query}
Database/tool result:
{data_result}

Analyse the result above and extract the key insights.
If the result contains a "{sentinel}" marker, ignore the raw data after it and interpret only the summary or tool output before it.
Focus on outliers, trends and correlations.
"#,
        marker = INTERPRET_MARKER,
        sentinel = DATA_SENTINEL,
    )
}

/// Final report prompt; `partial` asks for a best-effort report
pub fn report_prompt(user_query: &str, analysis: &str, latest: &str, partial: bool) -> String {
    let analysis = if analysis.trim().is_empty() {
        "(no analysis recorded)"
    } else {
        analysis
    };
    let partial_note = if partial {
        "\nThe analysis was stopped before it finished. Report only what the material above supports and say what is missing.\n"
    } else {
        ""
    };

    format!(
        r#"{marker}, write the final report from the material below.

Original request: {user_query}
Analysis so far:
{analysis}

Latest result:
{latest}
{partial_note}
Produce a Markdown report with:
1. Key conclusions
2. Supporting data (cite the analysis)
3. Concrete business recommendations
"#,
        marker = REPORT_MARKER,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_core::{Role, StateUpdate, ThreadId};

    #[test]
    fn test_planner_prompt_truncates_latest_output() {
        let mut state = TaskState::new(ThreadId::from("t"), "total revenue last month");
        state.apply(StateUpdate::message(Role::Tool, "x".repeat(50)));
        state.apply(StateUpdate::message(Role::Planner, "Planner decision: query"));

        let prompt = planner_prompt(&state, 10);
        assert!(prompt.starts_with(PLANNER_MARKER));
        assert!(prompt.contains("Goal: total revenue last month"));
        assert!(prompt.contains("xxxxxxxxxx... (truncated)"));
        assert!(!prompt.contains("Planner decision"));
        for action in ["sql_generator", "mcp_analysis", "deep_analyzer", "report_generator"] {
            assert!(prompt.contains(action));
        }
    }

    #[test]
    fn test_report_prompt_partial_note() {
        let full = report_prompt("q", "", "12000", false);
        assert!(full.contains("(no analysis recorded)"));
        assert!(full.contains("Latest result:\n12000"));
        assert!(!full.contains("stopped before it finished"));

        let partial = report_prompt("q", "a", "b", true);
        assert!(partial.contains("stopped before it finished"));
    }
}
