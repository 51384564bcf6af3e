use anyhow::Result;
use axum::{extract::State, routing::get, Extension, Json, Router};
use shipguard::{
    audit::{AuditEventType, NewAuditEvent},
    config::SecurityConfig,
    create_app_router,
    middleware::CurrentUser,
    state::AppState,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, starting graceful shutdown");
}

/// Example host route showing how handlers record domain events through
/// the shared audit log.
async fn list_shipments(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Json<serde_json::Value> {
    state.audit.record(
        NewAuditEvent::new(AuditEventType::DataAccess, "listed shipments")
            .identity(user.identity())
            .resource("shipment", "*"),
    );
    Json(serde_json::json!({ "shipments": [], "total": 0 }))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env, silently skipped if absent.
    dotenvy::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = SecurityConfig::from_env();
    let app_state = Arc::new(AppState::new(config)?);
    info!("🛡️ security core initialized");

    let host_routes = Router::new().route("/api/shipments", get(list_shipments));
    let app = create_app_router(app_state, host_routes);

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8000".to_string())
        .parse::<u16>()
        .unwrap_or(8000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
