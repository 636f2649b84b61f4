use crate::web::{handlers, AppState};
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Serve the admin API until `shutdown` resolves
pub async fn start_web_server<F>(state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server running on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // === SCHEDULE ROUTES ===
        .route(
            "/api/schedules",
            get(handlers::list_schedules).post(handlers::create_schedule),
        )
        .route(
            "/api/schedules/{schedule_id}",
            get(handlers::get_schedule).delete(handlers::delete_schedule),
        )
        .route(
            "/api/schedules/{schedule_id}/snapshots",
            get(handlers::list_schedule_snapshots),
        )
        .route(
            "/api/schedules/{schedule_id}/restore",
            post(handlers::restore_schedule),
        )
        // === RESTORATION ROUTES ===
        .route("/api/restorations", get(handlers::list_restorations))
        .route(
            "/api/restorations/active",
            get(handlers::get_active_restorations),
        )
        .route(
            "/api/restorations/{restoration_id}",
            get(handlers::get_restoration),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
