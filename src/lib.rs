//! Agent Supervisor — local orchestration server for coding-assistant
//! CLI subprocesses (spec.md §1).
//!
//! Split into a library (this crate) plus a thin `main.rs` binary, the
//! way `mira_backend` in the pack separates its `Router`/`AppState`
//! wiring from its binary entrypoint so integration tests can build
//! the same `Router` in-process instead of driving a live server.
//!
//! Wires together the modules named in SPEC_FULL.md §1: `config` for
//! environment-driven settings, `store` for the durable project/
//! conversation registries, `eventbus` for pub/sub, `agent` for the
//! supervisor + per-project runtimes, `router` for per-client
//! subscriptions, and `api` for the HTTP/WebSocket surface.

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod eventbus;
pub mod model;
pub mod router;
pub mod store;

use std::sync::Arc;

use agent::{AgentSupervisor, ProcessChildSpawner};
use api::{create_router, AppState};
use config::Config;
use eventbus::EventBus;
use router::SubscriptionRouter;
use store::{ConversationStore, FileProjectStore};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_supervisor=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();
}

/// Build the `AppState` for a given config, without starting a listener.
/// Exposed for integration tests that want the real router wired to a
/// real (but test-scoped) supervisor rather than the HTTP server.
pub fn build_state(config: Config, spawner: Arc<dyn agent::ChildSpawner>) -> AppState {
    let project_store = Arc::new(
        FileProjectStore::open(&config.data_dir).expect("failed to open project store"),
    );
    let conversation_store = Arc::new(ConversationStore::default());
    let event_bus = Arc::new(EventBus::default());
    let config = Arc::new(config);
    let supervisor = AgentSupervisor::new(
        (*config).clone(),
        project_store.clone(),
        conversation_store.clone(),
        event_bus.clone(),
        spawner,
    );
    let router = SubscriptionRouter::new(event_bus.clone());

    AppState {
        config,
        project_store,
        conversation_store,
        event_bus,
        supervisor,
        router,
    }
}

/// Entry point shared by `main.rs`: resolve configuration, build
/// `AppState`, bind a listener, and serve until Ctrl-C.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::from_env();
    std::fs::create_dir_all(&config.data_dir)?;

    tracing::info!(
        data_dir = %config.data_dir.display(),
        port = config.port,
        max_concurrent = config.max_concurrent,
        agent_bin = %config.agent_bin,
        "starting agent supervisor"
    );

    let port = config.port;
    let state = build_state(config, Arc::new(ProcessChildSpawner));
    let supervisor = state.supervisor.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("agent supervisor listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(supervisor))
        .await?;

    Ok(())
}

/// Waits for Ctrl-C, then drives supervisor shutdown (spec.md §4.E
/// Shutdown: cancel every runtime, then flush the conversation store).
async fn shutdown_signal(supervisor: Arc<AgentSupervisor>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, cancelling agent runtimes");
    supervisor.shutdown().await;
}
