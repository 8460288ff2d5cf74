//! QueryFlow API - Conversational SQL Analytics
//!
//! Chat with your database: natural-language questions are turned into SQL
//! by a generative model, screened by the Guardian so only single read-only
//! statements ever run, executed against PostgreSQL, and answered with the
//! conversation history in mind.
//!
//! REQUEST PIPELINE: every chat message runs the same four stages:
//! - Stage 1 (Retrieve): rank schema snippets relevant to the question
//! - Stage 2 (Generate): build the prompt and ask the model for SQL
//! - Stage 3 (Guard + Execute): classify the candidate, run it if allowed
//! - Stage 4 (Respond): format the answer and append the turn to history

mod catalog;
mod config;
mod error;
mod executor;
mod guardian;
mod llm;
mod models;
mod retrieval;
mod routes;
mod seed;
mod session;
mod state;
mod workflow;

use crate::catalog::SchemaCatalog;
use crate::config::Settings;
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting QueryFlow - Conversational SQL Analytics...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    // Initialize database pool - REQUIRED (no in-memory fallback)
    let pool = match init_database_pool(&settings).await {
        Ok(pool) => {
            info!("✅ Database pool created successfully");
            pool
        }
        Err(e) => {
            error!("❌ FATAL: Failed to initialize database pool: {}", e);
            error!("DATABASE_URL must be set in .env and database must be accessible");
            panic!("Cannot start server without database connection");
        }
    };

    // Bootstrap the demo retail schema so the service answers out of the box
    if settings.seed_demo_data {
        if let Err(e) = seed::ensure_demo_schema(&pool).await {
            warn!("⚠️  Warning creating demo schema: {}", e);
        }
        if let Err(e) = seed::seed_demo_data(&pool).await {
            warn!("⚠️  Warning seeding demo data: {}", e);
        }
    }

    // Build the schema catalog that grounds SQL generation
    let catalog = SchemaCatalog::build(&pool).await?;
    if catalog.is_empty() {
        warn!("⚠️  Schema catalog is empty - generation will run without context");
    } else {
        info!(
            "📚 Schema catalog ready ({} snippets)",
            catalog.snippets.len()
        );
    }

    let state = Arc::new(AppState::new(pool, &settings, &catalog));

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   POST   /api/chat                           - Ask a question");
    info!("   GET    /api/sessions/:id/history           - Session history");
    info!("   DELETE /api/sessions/:id/history           - Clear session history");
    info!("   GET    /health                             - Liveness check");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,queryflow_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Initialize database pool from settings
async fn init_database_pool(settings: &Settings) -> anyhow::Result<deadpool_postgres::Pool> {
    use deadpool_postgres::{Config, ManagerConfig, RecyclingMethod};

    let db = &settings.database;

    // Determine if TLS is needed (managed providers like Neon require it)
    let use_tls = db.host.contains("neon.tech")
        || std::env::var("DATABASE_URL")
            .map(|u| u.contains("sslmode=require"))
            .unwrap_or(false);

    let mut cfg = Config::new();
    cfg.host = Some(db.host.clone());
    cfg.port = Some(db.port);
    cfg.user = Some(db.user.clone());
    cfg.password = Some(db.password.clone());
    cfg.dbname = Some(db.database.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = if use_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(deadpool_postgres::Runtime::Tokio1), tls)
            .map_err(|e| anyhow::anyhow!("Failed to create TLS pool: {}", e))?
    } else {
        cfg.create_pool(Some(deadpool_postgres::Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| anyhow::anyhow!("Failed to create pool: {}", e))?
    };

    // Test the connection
    let client = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get pool connection: {}", e))?;

    let _row = client
        .query_one("SELECT 1 as ok", &[])
        .await
        .map_err(|e| anyhow::anyhow!("Failed to verify database connection: {}", e))?;

    info!("✅ Database connection successful (TLS: {})", use_tls);
    Ok(pool)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
