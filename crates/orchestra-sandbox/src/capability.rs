//! Synthesized capability and its execution harness

use orchestra_core::Record;
use serde::{Deserialize, Serialize};

/// Printed by the harness when the generated logic raises
pub const EXECUTION_ERROR_PREFIX: &str = "Execution Error: ";

pub const ANALYSIS_START_MARKER: &str = "--- Analysis Start ---";
pub const ANALYSIS_END_MARKER: &str = "--- Analysis End ---";

/// Single-use analysis program bound to its input data
///
/// Created per dynamic-analysis invocation and discarded after execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicCapability {
    pub source_task_description: String,
    /// Oracle completion, verbatim
    pub generated_logic: String,
    /// Representative row shown to the oracle
    pub bound_sample: Option<Record>,
    /// Full table the harness reconstructs as `df`
    pub bound_input: Vec<Record>,
}

impl DynamicCapability {
    pub fn new(
        source_task_description: impl Into<String>,
        generated_logic: impl Into<String>,
        bound_input: Vec<Record>,
    ) -> Self {
        Self {
            source_task_description: source_task_description.into(),
            generated_logic: generated_logic.into(),
            bound_sample: bound_input.first().cloned(),
            bound_input,
        }
    }

    /// Render the Python harness
    ///
    /// Both the data and the logic are embedded as string literals. The logic
    /// is compiled and executed inside the `try`, so syntax errors are caught
    /// just like runtime errors. `sys.exit()` and interrupts are caught too.
    /// stdout is flushed before exit.
    pub fn render_script(&self) -> String {
        let data_json = serde_json::to_string(&self.bound_input).unwrap_or_else(|_| "[]".to_string());

        format!(
            r#"import json
import sys

import pandas as pd

RAW_INPUT = {data}
LOGIC = {logic}

try:
    df = pd.DataFrame(json.loads(RAW_INPUT))
    print("{start}")
    exec(compile(LOGIC, "<capability>", "exec"), {{"df": df, "pd": pd, "json": json}})
    print("{end}")
except Exception as e:
    print(f"{prefix}{{e}}")
except BaseException as e:
    print(f"{prefix}{{type(e).__name__}}: {{e}}")
finally:
    sys.stdout.flush()
"#,
            data = python_str_literal(&data_json),
            logic = python_str_literal(&self.generated_logic),
            start = ANALYSIS_START_MARKER,
            end = ANALYSIS_END_MARKER,
            prefix = EXECUTION_ERROR_PREFIX,
        )
    }
}

/// A JSON string literal is a valid Python string literal
fn python_str_literal(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<Record> {
        serde_json::from_value(json!([
            {"sku": "A", "qty": 3, "price": 9.5},
            {"sku": "B", "qty": 5, "price": 2.0}
        ]))
        .unwrap()
    }

    #[test]
    fn test_new_binds_first_row_as_sample() {
        let cap = DynamicCapability::new("weighted price", "print(df)", rows());
        assert_eq!(cap.bound_sample.as_ref().unwrap()["sku"], json!("A"));
        assert_eq!(cap.bound_input.len(), 2);

        let empty = DynamicCapability::new("x", "print(1)", Vec::new());
        assert!(empty.bound_sample.is_none());
    }

    #[test]
    fn test_script_catches_and_flushes() {
        let script = DynamicCapability::new("t", "raise ValueError('boom')", rows()).render_script();
        assert!(script.contains("except Exception as e:"));
        assert!(script.contains("except BaseException as e:"));
        assert!(script.contains("print(f\"Execution Error: {e}\")"));
        assert!(script.contains("finally:\n    sys.stdout.flush()"));
        assert!(script.contains(ANALYSIS_START_MARKER));
    }

    #[test]
    fn test_logic_embedded_verbatim_as_literal() {
        let logic = "total = (df['qty'] * df['price']).sum()\nprint(f\"total={total}\")";
        let script = DynamicCapability::new("t", logic, rows()).render_script();

        let literal_line = script
            .lines()
            .find(|l| l.starts_with("LOGIC = "))
            .unwrap();
        let decoded: String = serde_json::from_str(&literal_line["LOGIC = ".len()..]).unwrap();
        assert_eq!(decoded, logic);
    }

    #[test]
    fn test_data_embedded_as_json() {
        let script = DynamicCapability::new("t", "print(df)", rows()).render_script();
        let literal_line = script
            .lines()
            .find(|l| l.starts_with("RAW_INPUT = "))
            .unwrap();
        let raw: String = serde_json::from_str(&literal_line["RAW_INPUT = ".len()..]).unwrap();
        let back: Vec<Record> = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, rows());
    }
}
