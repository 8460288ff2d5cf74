//! Workflow state types
//!
//! Each pipeline transition hands over an explicit typed value instead of a
//! loose bag of keys, so every state's inputs are checkable at the boundary.

use crate::catalog::SchemaSnippet;
use crate::executor::TabularResult;
use crate::guardian::{GuardianVerdict, RejectReason};
use crate::session::{Turn, TurnStatus};
use serde::Serialize;

/// Output of RETRIEVE_CONTEXT
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub snippets: Vec<SchemaSnippet>,
    /// True when retrieval failed or timed out and the pipeline continued
    /// with whatever it had
    pub degraded: bool,
}

impl RetrievedContext {
    pub fn empty_degraded() -> Self {
        Self {
            snippets: Vec::new(),
            degraded: true,
        }
    }

    pub fn from_snippets(snippets: Vec<SchemaSnippet>) -> Self {
        Self {
            snippets,
            degraded: false,
        }
    }
}

/// Output of GENERATE_SQL: raw model text plus the normalized statement
#[derive(Debug, Clone)]
pub struct CandidateSql {
    pub raw: String,
    pub cleaned: String,
}

/// Output of EXECUTE_QUERY
#[derive(Debug)]
pub enum ExecutionOutcome {
    Executed(TabularResult),
    Rejected(RejectReason),
    Failed(String),
}

/// Final product of one request. The history snapshot lets a stateless
/// caller resume the session by passing the session id back.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub session_id: String,
    pub answer: String,
    /// SQL that was executed - or, for a rejected request, the attempted
    /// (unexecuted) statement, kept for transparency
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TabularResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<GuardianVerdict>,
    pub status: TurnStatus,
    /// Schema snippet texts that grounded generation
    pub context_used: Vec<String>,
    /// True when context retrieval failed or timed out and the request ran
    /// with whatever context was left
    pub context_degraded: bool,
    pub history: Vec<Turn>,
}
