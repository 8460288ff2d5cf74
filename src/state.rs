//! Application state management
//!
//! Wires the collaborators into the workflow engine once at startup and
//! shares the result across all handlers.

use crate::catalog::SchemaCatalog;
use crate::config::Settings;
use crate::executor::PostgresExecutor;
use crate::guardian::Guardian;
use crate::llm::OllamaGenerator;
use crate::retrieval::KeywordRetriever;
use crate::session::SessionStore;
use crate::workflow::WorkflowEngine;
use deadpool_postgres::Pool;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// The per-request pipeline engine
    pub engine: WorkflowEngine,

    /// Conversation store (also owned by the engine; kept here for liveness
    /// reporting)
    pub sessions: SessionStore,

    /// Fingerprint of the schema catalog the retriever was built from
    pub catalog_checksum: String,
}

impl AppState {
    pub fn new(pool: Pool, settings: &Settings, catalog: &SchemaCatalog) -> Self {
        let sessions = SessionStore::new(settings.workflow.max_history_turns);
        let guardian = Guardian::from_allow_list(settings.workflow.allowed_objects.as_deref());

        let retriever = Arc::new(KeywordRetriever::new(
            catalog,
            settings.workflow.retrieval_top_k,
        ));
        let generator = Arc::new(OllamaGenerator::new(&settings.llm));
        let executor = Arc::new(PostgresExecutor::new(
            pool,
            settings.workflow.max_result_rows,
        ));

        let engine = WorkflowEngine::new(
            retriever,
            generator,
            executor,
            guardian,
            sessions.clone(),
            settings.workflow.clone(),
        );

        Self {
            engine,
            sessions,
            catalog_checksum: catalog.checksum.clone(),
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
