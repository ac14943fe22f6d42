//! Integration tests for the Turso warehouse

use orchestra_core::{OrchestraError, DATA_SENTINEL, EMPTY_RESULT_SUMMARY};
use orchestra_storage::{open_local, QueryTool, TursoQueryTool, TursoWarehouse, Warehouse};
use serde_json::json;
use tempfile::TempDir;
use turso::params;

/// Helper to seed a small sales database file
async fn seed_sales_db() -> (std::path::PathBuf, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("sales.db");

    {
        let conn = open_local(&path, OrchestraError::Warehouse).await.unwrap();
        conn.execute(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, month TEXT NOT NULL, revenue INTEGER NOT NULL)",
            params![],
        )
        .await
        .unwrap();
        for (id, month, revenue) in [(1, "2024-05", 9000), (2, "2024-06", 7000), (3, "2024-06", 5000)] {
            conn.execute(
                "INSERT INTO orders (id, month, revenue) VALUES (?, ?, ?)",
                params![id, month, revenue],
            )
            .await
            .unwrap();
        }
    }

    (path, temp_dir)
}

async fn create_sales_db() -> (TursoWarehouse, TempDir) {
    let (path, temp_dir) = seed_sales_db().await;
    let warehouse = TursoWarehouse::open(&path).await.expect("Failed to open warehouse");
    (warehouse, temp_dir)
}

#[tokio::test]
async fn test_describe_schema_lists_tables() {
    let (warehouse, _dir) = create_sales_db().await;
    let schema = warehouse.describe_schema().await.unwrap();
    assert!(schema.contains("CREATE TABLE orders"));
    assert!(schema.contains("revenue INTEGER"));
}

#[tokio::test]
async fn test_execute_returns_summary_and_payload() {
    let (warehouse, _dir) = create_sales_db().await;
    let result = warehouse
        .execute("```sql\nSELECT SUM(revenue) AS revenue FROM orders WHERE month = '2024-06'\n```")
        .await
        .unwrap();

    assert!(result.summary.starts_with("Summary:"));
    assert!(result.summary.contains("| revenue |"));
    assert!(result.summary.contains("12000"));
    assert_eq!(result.payload.unwrap(), vec![json!({"revenue": 12000}).as_object().unwrap().clone()]);
}

#[tokio::test]
async fn test_execute_empty_result() {
    let (warehouse, _dir) = create_sales_db().await;
    let result = warehouse
        .execute("SELECT * FROM orders WHERE month = '1999-01'")
        .await
        .unwrap();
    assert_eq!(result.summary, EMPTY_RESULT_SUMMARY);
    assert!(result.payload.is_none());
}

#[tokio::test]
async fn test_execute_bad_sql_is_warehouse_error() {
    let (warehouse, _dir) = create_sales_db().await;
    let err = warehouse.execute("SELECT * FROM missing_table").await.unwrap_err();
    assert!(matches!(err, OrchestraError::Warehouse(_)));
}

#[tokio::test]
async fn test_query_tool_speaks_wire_text() {
    let (path, _dir) = seed_sales_db().await;
    let tool = TursoQueryTool::open(&path).await.unwrap();

    let text = tool
        .run_query("SELECT month, SUM(revenue) AS revenue FROM orders GROUP BY month ORDER BY month")
        .await
        .unwrap();
    let (summary, rest) = text.split_once(DATA_SENTINEL).expect("payload marker");
    assert!(summary.contains("| 2024-06 | 12000 |"));
    assert!(rest.ends_with(DATA_SENTINEL));
    assert!(rest.contains("\"revenue\":12000"));

    let empty = tool
        .run_query("SELECT * FROM orders WHERE month = '1999-01'")
        .await
        .unwrap();
    assert_eq!(empty, EMPTY_RESULT_SUMMARY);
}
