//! Storage interface.
//!
//! The engine treats persistence as a collaborator behind a narrow trait.
//! Handlers issue parameterized statements; what sits behind them (a real
//! database, a file, a test double) is the embedder's business. The crate
//! ships [`MemoryStorage`], an in-memory double that records every
//! statement it sees, which the built-in services and the tests use.

use std::collections::VecDeque;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Failures from the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The statement could not be executed.
    #[error("statement failed: {detail}")]
    Statement {
        /// Backend-provided detail.
        detail: String,
    },

    /// The backend is unreachable.
    #[error("storage unavailable: {detail}")]
    Unavailable {
        /// Backend-provided detail.
        detail: String,
    },
}

/// Rows returned by a query, each a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    /// The rows, in backend order.
    pub rows: Vec<Value>,
}

impl ResultSet {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` when no rows matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Persistence seam used by handlers and the audit trail.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Runs a read statement and returns the matching rows.
    async fn query(&self, statement: &str, params: &[&str]) -> Result<ResultSet, StorageError>;

    /// Runs a write statement.
    async fn execute(&self, statement: &str, params: &[&str]) -> Result<(), StorageError>;
}

/// One statement as recorded by [`MemoryStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStatement {
    /// The statement text.
    pub statement: String,
    /// Bound parameters, in order.
    pub params: Vec<String>,
}

/// In-memory storage double.
///
/// Writes are recorded in arrival order; queries answer from a queue of
/// canned result sets (empty once the queue runs dry).
#[derive(Debug, Default)]
pub struct MemoryStorage {
    recorded: RwLock<Vec<RecordedStatement>>,
    canned: RwLock<VecDeque<ResultSet>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a result set for a future query.
    pub fn push_result(&self, result: ResultSet) {
        self.canned.write().expect("lock poisoned").push_back(result);
    }

    /// Every statement executed so far, oldest first.
    #[must_use]
    pub fn recorded(&self) -> Vec<RecordedStatement> {
        self.recorded.read().expect("lock poisoned").clone()
    }

    fn record(&self, statement: &str, params: &[&str]) {
        self.recorded
            .write()
            .expect("lock poisoned")
            .push(RecordedStatement {
                statement: statement.to_string(),
                params: params.iter().map(|p| (*p).to_string()).collect(),
            });
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn query(&self, statement: &str, params: &[&str]) -> Result<ResultSet, StorageError> {
        self.record(statement, params);
        Ok(self
            .canned
            .write()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or_default())
    }

    async fn execute(&self, statement: &str, params: &[&str]) -> Result<(), StorageError> {
        self.record(statement, params);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn statements_are_recorded_in_order() {
        let storage = MemoryStorage::new();
        storage
            .execute("insert into logins values (?, ?)", &["abc", "alice"])
            .await
            .expect("execute");
        storage
            .execute("insert into logouts values (?)", &["abc"])
            .await
            .expect("execute");
        let recorded = storage.recorded();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].params, vec!["abc", "alice"]);
        assert!(recorded[1].statement.contains("logouts"));
    }

    #[tokio::test]
    async fn queries_drain_canned_results() {
        let storage = MemoryStorage::new();
        storage.push_result(ResultSet {
            rows: vec![serde_json::json!({"name": "alice"})],
        });
        let first = storage.query("select", &[]).await.expect("query");
        assert_eq!(first.len(), 1);
        let second = storage.query("select", &[]).await.expect("query");
        assert!(second.is_empty());
    }
}
