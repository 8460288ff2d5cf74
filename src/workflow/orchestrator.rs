//! Workflow orchestrator
//!
//! Drives one chat request through RETRIEVE_CONTEXT, GENERATE_SQL,
//! EXECUTE_QUERY, and RESPOND. Retrieval failures degrade to empty context;
//! generation and execution failures are terminal for the request but never
//! for the session. Every path ends at RESPOND and appends exactly one Turn,
//! so a follow-up question always sees what happened before - including
//! failures. Only a session-store failure escapes as a hard error.

use crate::config::WorkflowConfig;
use crate::error::AppError;
use crate::executor::{QueryExecutor, TabularResult};
use crate::guardian::{Guardian, GuardianVerdict};
use crate::llm::SqlGenerator;
use crate::retrieval::SchemaRetriever;
use crate::session::{SessionStore, Turn, TurnStatus};
use crate::workflow::prompts;
use crate::workflow::types::{CandidateSql, ExecutionOutcome, RetrievedContext, WorkflowResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

/// The per-request state machine plus the session store it reports into
pub struct WorkflowEngine {
    retriever: Arc<dyn SchemaRetriever>,
    generator: Arc<dyn SqlGenerator>,
    executor: Arc<dyn QueryExecutor>,
    guardian: Guardian,
    sessions: SessionStore,
    config: WorkflowConfig,
}

impl WorkflowEngine {
    pub fn new(
        retriever: Arc<dyn SchemaRetriever>,
        generator: Arc<dyn SqlGenerator>,
        executor: Arc<dyn QueryExecutor>,
        guardian: Guardian,
        sessions: SessionStore,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            retriever,
            generator,
            executor,
            guardian,
            sessions,
            config,
        }
    }

    /// Run one request end to end. Unknown session ids are created
    /// transparently; the returned history snapshot reflects this request's
    /// appended turn.
    pub async fn handle_chat(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<WorkflowResult, AppError> {
        info!("🚀 Workflow started for session {}", session_id);
        let history = self.sessions.history(session_id).await?;

        // RETRIEVE_CONTEXT - failure here is recoverable degradation
        let context = self.retrieve_context(message).await;

        // GENERATE_SQL - failure is terminal for the request
        let snippet_texts: Vec<String> =
            context.snippets.iter().map(|s| s.text.clone()).collect();
        let prompt = prompts::build_sql_prompt(
            &snippet_texts,
            &history,
            self.config.history_context_turns,
            message,
        );
        let candidate = match self.generate_sql(&prompt).await {
            Ok(candidate) => candidate,
            Err(e) => {
                let error = e.to_string();
                warn!("SQL generation failed for session {}: {}", session_id, error);
                return self
                    .respond(
                        session_id,
                        message,
                        context,
                        None,
                        None,
                        TurnStatus::GenerationFailed,
                        None,
                        error.clone(),
                        prompts::generation_failure_answer(&error),
                    )
                    .await;
            }
        };

        // EXECUTE_QUERY - the Guardian gates the executor
        let outcome = self.execute_query(&candidate).await;

        // RESPOND - exactly one turn is appended on every path
        match outcome {
            ExecutionOutcome::Executed(result) => {
                let summary = prompts::result_summary(&result);
                let answer = prompts::success_answer(&result);
                info!(
                    "✅ Query executed for session {}: {}",
                    session_id, summary
                );
                self.respond(
                    session_id,
                    message,
                    context,
                    Some(candidate.cleaned),
                    Some(GuardianVerdict::Allow),
                    TurnStatus::Completed,
                    Some(result),
                    summary,
                    answer,
                )
                .await
            }
            ExecutionOutcome::Rejected(reason) => {
                warn!(
                    "🚫 Guardian rejected query for session {}: {}",
                    session_id,
                    reason.message()
                );
                self.respond(
                    session_id,
                    message,
                    context,
                    Some(candidate.cleaned),
                    Some(GuardianVerdict::reject(reason)),
                    TurnStatus::Rejected,
                    None,
                    format!("Rejected: {}", reason.message()),
                    prompts::rejection_answer(reason),
                )
                .await
            }
            ExecutionOutcome::Failed(error) => {
                warn!(
                    "Query execution failed for session {}: {}",
                    session_id, error
                );
                self.respond(
                    session_id,
                    message,
                    context,
                    Some(candidate.cleaned),
                    Some(GuardianVerdict::Allow),
                    TurnStatus::ExecutionFailed,
                    None,
                    error.clone(),
                    prompts::execution_failure_answer(&error),
                )
                .await
            }
        }
    }

    /// Ordered history for a session (empty for unknown ids)
    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>, AppError> {
        self.sessions.history(session_id).await
    }

    /// Drop all turns for a session
    pub async fn clear(&self, session_id: &str) -> Result<(), AppError> {
        self.sessions.clear(session_id).await
    }

    async fn retrieve_context(&self, question: &str) -> RetrievedContext {
        let limit = Duration::from_secs(self.config.retrieval_timeout_secs);
        match timeout(limit, self.retriever.retrieve(question)).await {
            Ok(Ok(snippets)) => {
                info!("🔍 Retrieved {} schema snippets", snippets.len());
                RetrievedContext::from_snippets(snippets)
            }
            Ok(Err(e)) => {
                warn!(
                    "Context retrieval failed, continuing without schema context: {}",
                    e
                );
                RetrievedContext::empty_degraded()
            }
            Err(_) => {
                warn!(
                    "Context retrieval timed out after {}s, continuing without schema context",
                    self.config.retrieval_timeout_secs
                );
                RetrievedContext::empty_degraded()
            }
        }
    }

    async fn generate_sql(&self, prompt: &str) -> Result<CandidateSql, AppError> {
        let limit = Duration::from_secs(self.config.generation_timeout_secs);
        let raw = match timeout(limit, self.generator.generate(prompt)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AppError::Generation(format!(
                    "generation timed out after {}s",
                    self.config.generation_timeout_secs
                )))
            }
        };
        let cleaned = self.guardian.normalize(&raw);
        Ok(CandidateSql { raw, cleaned })
    }

    /// Classify the candidate; call the executor only on Allow
    async fn execute_query(&self, candidate: &CandidateSql) -> ExecutionOutcome {
        match self.guardian.classify(&candidate.raw) {
            GuardianVerdict::Reject { reason } => ExecutionOutcome::Rejected(reason),
            GuardianVerdict::Allow => {
                let limit = Duration::from_secs(self.config.execution_timeout_secs);
                match timeout(limit, self.executor.execute(&candidate.cleaned)).await {
                    Ok(Ok(result)) => ExecutionOutcome::Executed(result),
                    Ok(Err(e)) => ExecutionOutcome::Failed(e.to_string()),
                    Err(_) => ExecutionOutcome::Failed(format!(
                        "query timed out after {}s",
                        self.config.execution_timeout_secs
                    )),
                }
            }
        }
    }

    /// Terminal state: append the turn and assemble the result. A failure
    /// here means no turn was committed and surfaces as a store error.
    #[allow(clippy::too_many_arguments)]
    async fn respond(
        &self,
        session_id: &str,
        question: &str,
        context: RetrievedContext,
        sql: Option<String>,
        verdict: Option<GuardianVerdict>,
        status: TurnStatus,
        result: Option<TabularResult>,
        summary: String,
        answer: String,
    ) -> Result<WorkflowResult, AppError> {
        let turn = Turn::new(
            question,
            sql.clone(),
            verdict.clone(),
            status,
            summary,
            answer.clone(),
        );
        let history = self.sessions.append(session_id, turn).await?;

        Ok(WorkflowResult {
            session_id: session_id.to_string(),
            answer,
            sql,
            result,
            verdict,
            status,
            context_degraded: context.degraded,
            context_used: context.snippets.into_iter().map(|s| s.text).collect(),
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{SchemaSnippet, SnippetKind};
    use crate::guardian::RejectReason;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct StaticRetriever;

    #[async_trait]
    impl SchemaRetriever for StaticRetriever {
        async fn retrieve(&self, _question: &str) -> Result<Vec<SchemaSnippet>, AppError> {
            Ok(vec![SchemaSnippet {
                id: "table:products".to_string(),
                kind: SnippetKind::Table,
                text: "Table products: contains columns id, category.".to_string(),
            }])
        }
    }

    struct FailingRetriever;

    #[async_trait]
    impl SchemaRetriever for FailingRetriever {
        async fn retrieve(&self, _question: &str) -> Result<Vec<SchemaSnippet>, AppError> {
            Err(AppError::Retrieval("vector index offline".to_string()))
        }
    }

    struct SlowRetriever;

    #[async_trait]
    impl SchemaRetriever for SlowRetriever {
        async fn retrieve(&self, _question: &str) -> Result<Vec<SchemaSnippet>, AppError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    struct StaticGenerator(&'static str);

    #[async_trait]
    impl SqlGenerator for StaticGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, AppError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl SqlGenerator for FailingGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, AppError> {
            Err(AppError::Generation("model endpoint unreachable".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingExecutor {
        calls: AtomicUsize,
        last_sql: Mutex<Option<String>>,
    }

    #[async_trait]
    impl QueryExecutor for RecordingExecutor {
        async fn execute(&self, sql: &str) -> Result<TabularResult, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_sql.lock().await = Some(sql.to_string());
            Ok(TabularResult {
                columns: vec!["count".to_string()],
                rows: vec![vec![serde_json::json!("42")]],
                row_count: 1,
                truncated: false,
            })
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl QueryExecutor for FailingExecutor {
        async fn execute(&self, _sql: &str) -> Result<TabularResult, AppError> {
            Err(AppError::Internal("column \"nope\" does not exist".to_string()))
        }
    }

    fn engine_with(
        retriever: Arc<dyn SchemaRetriever>,
        generator: Arc<dyn SqlGenerator>,
        executor: Arc<dyn QueryExecutor>,
    ) -> WorkflowEngine {
        WorkflowEngine::new(
            retriever,
            generator,
            executor,
            Guardian::new(),
            SessionStore::new(10),
            WorkflowConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_success_path_appends_one_turn() {
        let executor = Arc::new(RecordingExecutor::default());
        let engine = engine_with(
            Arc::new(StaticRetriever),
            Arc::new(StaticGenerator("SELECT COUNT(*) FROM products")),
            executor.clone(),
        );

        let result = engine.handle_chat("s1", "how many products?").await.unwrap();

        assert_eq!(result.status, TurnStatus::Completed);
        assert_eq!(result.verdict, Some(GuardianVerdict::Allow));
        assert_eq!(result.sql.as_deref(), Some("SELECT COUNT(*) FROM products"));
        assert!(result.result.is_some());
        assert_eq!(result.history.len(), 1);
        assert_eq!(result.history[0].question, "how many products?");
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        let history = engine.history("s1").await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_fenced_model_output_is_normalized_before_execution() {
        let executor = Arc::new(RecordingExecutor::default());
        let engine = engine_with(
            Arc::new(StaticRetriever),
            Arc::new(StaticGenerator("```sql\nSELECT id FROM products;\n```")),
            executor.clone(),
        );

        engine.handle_chat("s1", "list ids").await.unwrap();

        let executed = executor.last_sql.lock().await.clone();
        assert_eq!(executed.as_deref(), Some("SELECT id FROM products"));
    }

    #[tokio::test]
    async fn test_rejected_query_never_reaches_executor() {
        let executor = Arc::new(RecordingExecutor::default());
        let engine = engine_with(
            Arc::new(StaticRetriever),
            Arc::new(StaticGenerator("DROP TABLE products")),
            executor.clone(),
        );

        let result = engine.handle_chat("s1", "delete everything").await.unwrap();

        assert_eq!(result.status, TurnStatus::Rejected);
        assert_eq!(
            result.verdict,
            Some(GuardianVerdict::reject(RejectReason::ForbiddenVerb))
        );
        // attempted SQL is surfaced for transparency, but no rows exist
        assert_eq!(result.sql.as_deref(), Some("DROP TABLE products"));
        assert!(result.result.is_none());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);

        // the failed attempt is visible to the next turn
        let history = engine.history("s1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TurnStatus::Rejected);
    }

    #[tokio::test]
    async fn test_stacked_statements_are_rejected() {
        let executor = Arc::new(RecordingExecutor::default());
        let engine = engine_with(
            Arc::new(StaticRetriever),
            Arc::new(StaticGenerator("SELECT * FROM users; DROP TABLE users;")),
            executor.clone(),
        );

        let result = engine.handle_chat("s1", "users?").await.unwrap();

        assert_eq!(
            result.verdict,
            Some(GuardianVerdict::reject(RejectReason::MultipleStatements))
        );
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generation_failure_is_terminal_but_recorded() {
        let executor = Arc::new(RecordingExecutor::default());
        let engine = engine_with(
            Arc::new(StaticRetriever),
            Arc::new(FailingGenerator),
            executor.clone(),
        );

        let result = engine.handle_chat("s1", "anything").await.unwrap();

        assert_eq!(result.status, TurnStatus::GenerationFailed);
        assert!(result.sql.is_none());
        assert!(result.verdict.is_none());
        assert!(result.result.is_none());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.history("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retrieval_failure_degrades_to_empty_context() {
        let engine = engine_with(
            Arc::new(FailingRetriever),
            Arc::new(StaticGenerator("SELECT 1")),
            Arc::new(RecordingExecutor::default()),
        );

        let result = engine.handle_chat("s1", "ping").await.unwrap();

        assert_eq!(result.status, TurnStatus::Completed);
        assert!(result.context_used.is_empty());
        assert!(result.context_degraded);
        assert_eq!(result.history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrieval_timeout_degrades_to_empty_context() {
        let engine = engine_with(
            Arc::new(SlowRetriever),
            Arc::new(StaticGenerator("SELECT 1")),
            Arc::new(RecordingExecutor::default()),
        );

        let result = engine.handle_chat("s1", "ping").await.unwrap();

        assert_eq!(result.status, TurnStatus::Completed);
        assert!(result.context_used.is_empty());
        assert!(result.context_degraded);
    }

    #[tokio::test]
    async fn test_execution_failure_records_attempted_sql() {
        let engine = engine_with(
            Arc::new(StaticRetriever),
            Arc::new(StaticGenerator("SELECT nope FROM products")),
            Arc::new(FailingExecutor),
        );

        let result = engine.handle_chat("s1", "bad column").await.unwrap();

        assert_eq!(result.status, TurnStatus::ExecutionFailed);
        assert_eq!(result.sql.as_deref(), Some("SELECT nope FROM products"));
        assert!(result.result.is_none());

        let history = engine.history("s1").await.unwrap();
        assert_eq!(history[0].sql.as_deref(), Some("SELECT nope FROM products"));
        assert_eq!(history[0].status, TurnStatus::ExecutionFailed);
    }

    #[tokio::test]
    async fn test_multi_turn_history_accumulates() {
        let engine = engine_with(
            Arc::new(StaticRetriever),
            Arc::new(StaticGenerator("SELECT 1")),
            Arc::new(RecordingExecutor::default()),
        );

        engine.handle_chat("s1", "first").await.unwrap();
        let result = engine.handle_chat("s1", "second").await.unwrap();

        assert_eq!(result.history.len(), 2);
        let questions: Vec<&str> = result
            .history
            .iter()
            .map(|t| t.question.as_str())
            .collect();
        assert_eq!(questions, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_concurrent_requests_on_one_session_lose_nothing() {
        let engine = Arc::new(engine_with(
            Arc::new(StaticRetriever),
            Arc::new(StaticGenerator("SELECT 1")),
            Arc::new(RecordingExecutor::default()),
        ));

        let mut tasks = Vec::new();
        for i in 0..10 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                engine
                    .handle_chat("shared", &format!("question {}", i))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let history = engine.history("shared").await.unwrap();
        assert_eq!(history.len(), 10);
    }

    #[tokio::test]
    async fn test_clear_then_history_is_empty() {
        let engine = engine_with(
            Arc::new(StaticRetriever),
            Arc::new(StaticGenerator("SELECT 1")),
            Arc::new(RecordingExecutor::default()),
        );

        engine.handle_chat("s1", "q").await.unwrap();
        engine.clear("s1").await.unwrap();
        assert!(engine.history("s1").await.unwrap().is_empty());
    }
}
