use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wm_kernel::internal::{
    api::{create_router, AppState},
    exec::policy::ExecutionPolicy,
    registry::load_tool_registry,
};

const DEFAULT_PORT: u16 = 7777;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "wm_kernel=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let registry = Arc::new(load_tool_registry().await);
    let policy = ExecutionPolicy::from_env();
    tracing::info!("Loaded {} tools: {:?}", registry.len(), registry.names());

    let mut state = AppState::new(registry, policy);
    if let Some(retention) = std::env::var("WM_TRACE_RETENTION")
        .ok()
        .and_then(|v| v.parse().ok())
    {
        state = state.with_trace_retention(retention);
    }

    let app = create_router(state).layer(CorsLayer::permissive());

    let port = std::env::var("WM_KERNEL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Plan kernel API server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
