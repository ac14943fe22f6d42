//! Typed query envelope and its sentinel wire form
//!
//! The warehouse boundary speaks a text protocol: a human readable summary
//! followed by the raw rows as JSON, fenced by a pair of [`DATA_SENTINEL`]
//! markers. Inside the workspace results travel as [`QueryResult`]; only
//! [`QueryResult::to_wire`] and [`QueryResult::from_wire`] know the markers.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// One row of tabular data
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Marker delimiting the structured payload inside a wire summary
pub const DATA_SENTINEL: &str = "<<DATA_JSON>>";

/// Summary returned when a query succeeds without rows
pub const EMPTY_RESULT_SUMMARY: &str = "Query executed successfully but returned no data.";

/// Result of executing a query against the warehouse
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub summary: String,
    pub payload: Option<Vec<Record>>,
}

impl QueryResult {
    pub fn new(summary: impl Into<String>, payload: Option<Vec<Record>>) -> Self {
        Self {
            summary: summary.into(),
            payload,
        }
    }

    /// Result for a successful query that produced no rows
    pub fn empty() -> Self {
        Self::new(EMPTY_RESULT_SUMMARY, None)
    }

    /// Serialize to the delimited text form
    pub fn to_wire(&self) -> String {
        match &self.payload {
            Some(rows) => {
                // Map<String, Value> always serializes
                let json = serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string());
                format!(
                    "{}\n\n{}{}{}",
                    self.summary, DATA_SENTINEL, json, DATA_SENTINEL
                )
            }
            None => self.summary.clone(),
        }
    }

    /// Parse the delimited text form
    ///
    /// Text before the first marker is the summary. The payload runs to the
    /// closing marker, or to the end of input when the closing marker is
    /// missing. A payload that is not a JSON array of objects is dropped.
    pub fn from_wire(text: &str) -> Self {
        let Some(start) = text.find(DATA_SENTINEL) else {
            return Self::new(text, None);
        };

        let summary = text[..start].trim_end().to_string();
        let rest = &text[start + DATA_SENTINEL.len()..];
        let raw = match rest.find(DATA_SENTINEL) {
            Some(end) => &rest[..end],
            None => rest,
        };

        let payload = match serde_json::from_str::<Vec<Record>>(raw.trim()) {
            Ok(rows) => Some(rows),
            Err(e) => {
                warn!("Dropping malformed structured payload: {}", e);
                None
            }
        };

        Self { summary, payload }
    }
}
