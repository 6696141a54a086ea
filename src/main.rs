use decision_platform::{
    agents::AgentRegistry,
    api::{build_router, AppState},
    audit::InMemoryAuditLog,
    bootstrap,
    cases::CaseService,
    config::Config,
    orchestrator::AgentOrchestrator,
    policy::PolicyEngine,
    queues::QueueService,
    state::InMemoryStore,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "decision_platform=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    if let Err(message) = config.validate() {
        eprintln!("Configuration invalid: {message}");
        std::process::exit(1);
    }

    tracing::info!("Starting Decision Platform v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(environment = %config.security.environment, "Environment");

    // Storage + audit log (in-memory backend for local development;
    // production backends plug in behind the repository traits)
    let store = Arc::new(InMemoryStore::new());
    let audit = Arc::new(InMemoryAuditLog::new());
    tracing::info!("Storage backend initialized");

    // Policy engine with read-mostly cache
    let policy_engine = Arc::new(PolicyEngine::new(
        store.clone(),
        audit.clone(),
        config.processing.policy_cache_ttl_secs,
    ));

    // Seed the default admin user and KYC policy if absent
    let report = bootstrap::ensure_defaults(store.clone(), &policy_engine).await?;
    tracing::info!(
        admin_created = report.admin_created,
        policy_created = report.policy_created,
        "Bootstrap complete"
    );

    // Agent registry and orchestrator
    let registry = AgentRegistry::with_default_agents();
    tracing::info!(agents = registry.len(), "Agent registry initialized");

    let orchestrator = Arc::new(AgentOrchestrator::new(
        registry,
        store.clone(),
        policy_engine.clone(),
        audit.clone(),
        config.processing.agent_timeout_secs,
    ));

    // Case manager
    let case_service = Arc::new(CaseService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        policy_engine.clone(),
        orchestrator,
        audit.clone(),
    ));

    let queue_service = Arc::new(QueueService::new(store.clone()));

    // Reaper: re-drives stuck PROCESSING cases and expires overdue ones
    let shutdown = CancellationToken::new();
    let reaper_service = case_service.clone();
    let reaper_cancel = shutdown.clone();
    let reaper_interval = config.processing.reaper_interval_secs;
    let stuck_timeout = config.processing.stuck_processing_timeout_secs;
    tokio::spawn(async move {
        reaper_service
            .run_reaper(reaper_interval, stuck_timeout, reaper_cancel)
            .await;
    });
    tracing::info!(interval_secs = reaper_interval, "Reaper started");

    // Build HTTP router
    let app_state = AppState::new(case_service, queue_service, policy_engine);
    let app = build_router(app_state);

    // Start HTTP server
    let http_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("HTTP API server listening on http://{}", http_addr);
    tracing::info!("   Health check: http://{}/v1/health", http_addr);
    tracing::info!("   Cases API:    http://{}/v1/cases", http_addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    shutdown.cancel();
    tracing::info!("Shutting down gracefully...");
    Ok(())
}
