//! Database abstraction.
//!
//! The concrete SQL driver and its pool live outside this crate; everything
//! here talks to this trait. Rows travel as JSON objects keyed by the
//! driver's column labels, which keeps decoding symmetric with how args
//! flatten.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use strata_core::QueryError;

use crate::args::ArgMap;

/// One result row: column label → value.
pub type Row = serde_json::Map<String, Value>;

/// Driver-facing contract.
///
/// Implementations must convert driver panics and transport faults into
/// `QueryError::Execution`; nothing above this trait recovers panics.
#[async_trait]
pub trait Database: Send + Sync {
    /// Liveness probe.
    async fn ping(&self) -> Result<(), QueryError>;

    /// Run a statement that returns rows.
    async fn query(&self, statement: &str, args: &ArgMap) -> Result<Vec<Row>, QueryError>;

    /// Run a statement for its side effects.
    async fn execute(&self, statement: &str, args: &ArgMap) -> Result<(), QueryError>;

    /// Names of the columns currently present on a table; empty when the
    /// table does not exist yet.
    async fn table_columns(&self, dataset: &str, table: &str) -> Result<Vec<String>, QueryError>;

    /// Apply any configured prefix to a dataset name.
    fn dataset(&self, name: &str) -> String;

    /// Release the underlying pool.
    async fn close(&self);
}

/// In-memory database stand-in for tests.
///
/// Records every statement it is handed and serves queued canned rows, one
/// batch per `query` call (an empty queue yields no rows).
#[derive(Default)]
pub struct MockDatabase {
    statements: Mutex<Vec<(String, ArgMap)>>,
    canned_rows: Mutex<VecDeque<Vec<Row>>>,
    existing_columns: Mutex<Vec<String>>,
    prefix: String,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Queue one batch of rows for the next `query` call.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.canned_rows.lock().push_back(rows);
    }

    /// Seed the column listing served by `table_columns`.
    pub fn set_existing_columns(&self, columns: Vec<String>) {
        *self.existing_columns.lock() = columns;
    }

    /// Everything executed or queried so far, in order.
    pub fn statements(&self) -> Vec<(String, ArgMap)> {
        self.statements.lock().clone()
    }

    pub fn last_statement(&self) -> Option<(String, ArgMap)> {
        self.statements.lock().last().cloned()
    }

    pub fn statement_count(&self) -> usize {
        self.statements.lock().len()
    }
}

#[async_trait]
impl Database for MockDatabase {
    async fn ping(&self) -> Result<(), QueryError> {
        Ok(())
    }

    async fn query(&self, statement: &str, args: &ArgMap) -> Result<Vec<Row>, QueryError> {
        self.statements
            .lock()
            .push((statement.to_string(), args.clone()));
        Ok(self.canned_rows.lock().pop_front().unwrap_or_default())
    }

    async fn execute(&self, statement: &str, args: &ArgMap) -> Result<(), QueryError> {
        self.statements
            .lock()
            .push((statement.to_string(), args.clone()));
        Ok(())
    }

    async fn table_columns(&self, _dataset: &str, _table: &str) -> Result<Vec<String>, QueryError> {
        Ok(self.existing_columns.lock().clone())
    }

    fn dataset(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_records_statements() {
        let db = MockDatabase::new();
        let mut args = ArgMap::new();
        args.insert("id".to_string(), json!("u1"));
        db.execute("DELETE FROM ds.user WHERE id = :id", &args)
            .await
            .unwrap();

        let (statement, recorded) = db.last_statement().unwrap();
        assert!(statement.starts_with("DELETE"));
        assert_eq!(recorded.get("id").unwrap(), "u1");
    }

    #[tokio::test]
    async fn test_mock_serves_canned_rows_in_order() {
        let db = MockDatabase::new();
        let mut row = Row::new();
        row.insert("id".to_string(), json!("u1"));
        db.push_rows(vec![row]);

        let first = db.query("SELECT 1", &ArgMap::new()).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = db.query("SELECT 1", &ArgMap::new()).await.unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_prefix_applies_to_dataset() {
        let db = MockDatabase::with_prefix("stage_");
        assert_eq!(db.dataset("auth"), "stage_auth");
    }
}
