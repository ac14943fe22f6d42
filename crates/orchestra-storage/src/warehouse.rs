//! Schema/query collaborator
//!
//! The planner loop only sees [`Warehouse`]. Query tools speak text: a
//! [`QueryTool`] answers with a summary followed by the sentinel-delimited
//! JSON rows, and [`WireWarehouse`] decodes that text back into a
//! [`QueryResult`]. [`TursoWarehouse`] is the embedded analytic database behind
//! that adapter; [`StaticWarehouse`] answers with canned results for tests.

use crate::db::open_local;
use async_trait::async_trait;
use orchestra_core::{OrchestraError, QueryResult, Record, Result};
use serde_json::Value as Json;
use std::path::Path;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use turso::{params, Connection, Value};

/// Rows rendered into the human readable summary
pub const SUMMARY_ROWS: usize = 5;

/// Schema description and query execution (allows mocking in tests)
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn describe_schema(&self) -> Result<String>;

    async fn execute(&self, sql: &str) -> Result<QueryResult>;
}

/// Remove markdown code fences the oracle may wrap SQL in
pub fn strip_sql_fences(sql: &str) -> String {
    sql.replace("```sql", "")
        .replace("```SQL", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Text-speaking schema/query tool
///
/// `run_query` returns [`QueryResult::to_wire`] text: the summary, then the
/// full rows between two [`orchestra_core::DATA_SENTINEL`] markers.
#[async_trait]
pub trait QueryTool: Send + Sync {
    async fn describe_schema(&self) -> Result<String>;

    async fn run_query(&self, sql: &str) -> Result<String>;
}

/// [`Warehouse`] over a [`QueryTool`], splitting its text at the sentinel
pub struct WireWarehouse<T> {
    tool: T,
}

impl<T: QueryTool> WireWarehouse<T> {
    pub fn new(tool: T) -> Self {
        Self { tool }
    }
}

#[async_trait]
impl<T: QueryTool> Warehouse for WireWarehouse<T> {
    async fn describe_schema(&self) -> Result<String> {
        self.tool.describe_schema().await
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult> {
        let text = self.tool.run_query(sql).await?;
        let result = QueryResult::from_wire(&text);
        if result.payload.is_none() && text.contains(orchestra_core::DATA_SENTINEL) {
            warn!("Query tool sent an unreadable payload, keeping the summary only");
        }
        Ok(result)
    }
}

/// Embedded analytic database behind the wire adapter
pub type TursoWarehouse = WireWarehouse<TursoQueryTool>;

impl TursoWarehouse {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(TursoQueryTool::open(path).await?))
    }
}

fn db_err(e: turso::Error) -> OrchestraError {
    OrchestraError::Warehouse(e.to_string())
}

/// Query tool over an embedded Turso file
pub struct TursoQueryTool {
    conn: Mutex<Connection>,
}

impl TursoQueryTool {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = open_local(path, OrchestraError::Warehouse).await?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    async fn query_rows(&self, sql: &str) -> Result<QueryResult> {
        let sql = strip_sql_fences(sql);
        if sql.is_empty() {
            return Err(OrchestraError::Warehouse("empty statement".to_string()));
        }

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql).await.map_err(db_err)?;
        let columns: Vec<String> = stmt
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let mut rows = stmt.query(params![]).await.map_err(db_err)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let mut record = Record::new();
            for (idx, name) in columns.iter().enumerate() {
                let value = row.get_value(idx).map_err(db_err)?;
                record.insert(name.clone(), to_json(value));
            }
            records.push(record);
        }

        info!("Query returned {} rows", records.len());
        if records.is_empty() {
            return Ok(QueryResult::empty());
        }
        Ok(QueryResult::new(
            format!("Summary:\n{}", markdown_table(&columns, &records)),
            Some(records),
        ))
    }
}

#[async_trait]
impl QueryTool for TursoQueryTool {
    async fn describe_schema(&self) -> Result<String> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut tables = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            if let Value::Text(ddl) = row.get_value(0).map_err(db_err)? {
                tables.push(format!("{};", ddl.trim()));
            }
        }
        Ok(tables.join("\n\n"))
    }

    #[instrument(skip(self, sql))]
    async fn run_query(&self, sql: &str) -> Result<String> {
        Ok(self.query_rows(sql).await?.to_wire())
    }
}

fn to_json(value: Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Integer(i) => Json::from(i),
        Value::Real(f) => serde_json::Number::from_f64(f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Text(s) => Json::String(s),
        Value::Blob(bytes) => Json::String(format!("<blob {} bytes>", bytes.len())),
    }
}

fn cell(value: Option<&Json>) -> String {
    match value {
        None | Some(Json::Null) => String::new(),
        Some(Json::String(s)) => s.replace('|', "\\|").replace('\n', " "),
        Some(other) => other.to_string(),
    }
}

/// First [`SUMMARY_ROWS`] records as a markdown table
fn markdown_table(columns: &[String], records: &[Record]) -> String {
    let mut lines = Vec::with_capacity(SUMMARY_ROWS + 3);
    lines.push(format!("| {} |", columns.join(" | ")));
    lines.push(format!(
        "|{}|",
        columns.iter().map(|_| " --- ").collect::<Vec<_>>().join("|")
    ));
    for record in records.iter().take(SUMMARY_ROWS) {
        let cells: Vec<String> = columns.iter().map(|c| cell(record.get(c))).collect();
        lines.push(format!("| {} |", cells.join(" | ")));
    }
    if records.len() > SUMMARY_ROWS {
        lines.push(format!("({} rows total)", records.len()));
    }
    lines.join("\n")
}

/// Canned warehouse for testing
///
/// Replies to every statement with the same result and records the SQL it
/// was asked to run.
pub struct StaticWarehouse {
    schema: String,
    reply: std::result::Result<QueryResult, String>,
    executed: StdMutex<Vec<String>>,
}

impl StaticWarehouse {
    pub fn new(schema: impl Into<String>, result: QueryResult) -> Self {
        Self {
            schema: schema.into(),
            reply: Ok(result),
            executed: StdMutex::new(Vec::new()),
        }
    }

    /// Warehouse whose every query fails with `message`
    pub fn failing(schema: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            reply: Err(message.into()),
            executed: StdMutex::new(Vec::new()),
        }
    }

    /// Warehouse answering with rows decoded from a wire-form result
    pub fn from_wire(schema: impl Into<String>, wire: &str) -> Self {
        Self::new(schema, QueryResult::from_wire(wire))
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Warehouse for StaticWarehouse {
    async fn describe_schema(&self) -> Result<String> {
        Ok(self.schema.clone())
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult> {
        match self.executed.lock() {
            Ok(mut executed) => executed.push(sql.to_string()),
            Err(_) => warn!("Statement log poisoned"),
        }
        self.reply.clone().map_err(OrchestraError::Warehouse)
    }
}
