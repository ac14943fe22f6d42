//! Capability synthesis through the oracle

use crate::capability::DynamicCapability;
use orchestra_agent::Oracle;
use orchestra_core::{Record, Result};
use std::sync::Arc;
use tracing::{info, instrument};

/// Task used when the planner did not describe one
pub const DEFAULT_TASK_DESCRIPTION: &str = "general data processing";

/// Writes single-use analysis logic for a task and a data table
///
/// The completion is taken verbatim. Nothing here inspects or validates the
/// generated logic; it only ever runs behind the sandbox boundary.
#[derive(Clone)]
pub struct CapabilitySynthesizer {
    oracle: Arc<dyn Oracle>,
}

impl CapabilitySynthesizer {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    #[instrument(skip(self, input), fields(rows = input.len()))]
    pub async fn synthesize(&self, task: &str, input: &[Record]) -> Result<DynamicCapability> {
        let task = if task.trim().is_empty() {
            DEFAULT_TASK_DESCRIPTION
        } else {
            task.trim()
        };

        let prompt = synthesis_prompt(task, input.first());
        let logic = self.oracle.complete(&prompt).await?;
        info!("Synthesized {} chars of logic for '{}'", logic.len(), task);

        Ok(DynamicCapability::new(task, logic, input.to_vec()))
    }
}

fn synthesis_prompt(task: &str, sample: Option<&Record>) -> String {
    let sample = sample
        .and_then(|row| serde_json::to_string(row).ok())
        .unwrap_or_else(|| "No data".to_string());

    format!(
        "You are a Python data processing expert.\n\
         Task: {task}\n\
         Data sample (first row): {sample}\n\n\
         Write Python logic that processes the variable `df` (a pandas DataFrame).\n\
         Requirements:\n\
         1. Assume `df` already exists and operate on it directly.\n\
         2. Print the results at the end.\n\
         3. Do not import pandas or load any data; write only the core logic.\n\
         4. Do not wrap the code in markdown; output plain code text.\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_agent::ScriptedOracle;
    use orchestra_core::OrchestraError;
    use serde_json::json;

    fn rows() -> Vec<Record> {
        serde_json::from_value(json!([
            {"region": "north", "revenue": 7000},
            {"region": "south", "revenue": 5000}
        ]))
        .unwrap()
    }

    #[tokio::test]
    async fn test_completion_used_verbatim() {
        let logic = "```python\nprint(df.groupby('region')['revenue'].sum())\n```";
        let oracle = Arc::new(ScriptedOracle::new().on("Python data processing", [logic]));
        let synth = CapabilitySynthesizer::new(oracle.clone());

        let cap = synth.synthesize("revenue by region", &rows()).await.unwrap();
        assert_eq!(cap.generated_logic, logic);
        assert_eq!(cap.source_task_description, "revenue by region");
        assert_eq!(cap.bound_input.len(), 2);

        let prompt = &oracle.prompts()[0];
        assert!(prompt.contains("Task: revenue by region"));
        assert!(prompt.contains("\"region\":\"north\""));
        assert!(!prompt.contains("south"));
    }

    #[tokio::test]
    async fn test_blank_task_uses_default() {
        let oracle = Arc::new(ScriptedOracle::new().with_fallback("print(len(df))"));
        let synth = CapabilitySynthesizer::new(oracle.clone());

        let cap = synth.synthesize("  ", &[]).await.unwrap();
        assert_eq!(cap.source_task_description, DEFAULT_TASK_DESCRIPTION);
        assert!(cap.bound_sample.is_none());
        assert!(oracle.prompts()[0].contains("Data sample (first row): No data"));
    }

    #[tokio::test]
    async fn test_oracle_error_propagates() {
        let synth = CapabilitySynthesizer::new(Arc::new(ScriptedOracle::new()));
        let err = synth.synthesize("x", &rows()).await.unwrap_err();
        assert!(matches!(err, OrchestraError::Oracle(_)));
    }
}
