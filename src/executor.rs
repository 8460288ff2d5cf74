//! Query execution
//!
//! The executor seam: run Guardian-approved SQL and return a tabular
//! result. Execution uses the text protocol so every column type renders
//! uniformly without per-type conversion; the result is capped to a
//! configured row limit while reporting the true row count.

use crate::error::AppError;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_postgres::SimpleQueryMessage;

/// Columns-and-rows result of one query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Rows the query produced, before any truncation
    pub row_count: usize,
    pub truncated: bool,
}

/// External collaborator contract: execute validated, read-only SQL.
/// Implementations are only ever handed Guardian-allowed statements.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<TabularResult, AppError>;
}

/// PostgreSQL executor over the shared connection pool
pub struct PostgresExecutor {
    pool: Pool,
    max_rows: usize,
}

impl PostgresExecutor {
    pub fn new(pool: Pool, max_rows: usize) -> Self {
        Self {
            pool,
            max_rows: max_rows.max(1),
        }
    }
}

#[async_trait]
impl QueryExecutor for PostgresExecutor {
    async fn execute(&self, sql: &str) -> Result<TabularResult, AppError> {
        let client = self.pool.get().await?;
        let messages = client.simple_query(sql).await?;

        let mut columns: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<Value>> = Vec::new();
        let mut row_count = 0usize;

        for message in messages {
            match message {
                SimpleQueryMessage::RowDescription(description) => {
                    if columns.is_empty() {
                        columns = description.iter().map(|c| c.name().to_string()).collect();
                    }
                }
                SimpleQueryMessage::Row(row) => {
                    if columns.is_empty() {
                        columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                    }
                    row_count += 1;
                    if rows.len() < self.max_rows {
                        let cells = (0..row.len())
                            .map(|i| match row.get(i) {
                                Some(text) => Value::String(text.to_string()),
                                None => Value::Null,
                            })
                            .collect();
                        rows.push(cells);
                    }
                }
                _ => {}
            }
        }

        let truncated = row_count > rows.len();
        Ok(TabularResult {
            columns,
            rows,
            row_count,
            truncated,
        })
    }
}
