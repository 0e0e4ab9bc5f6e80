use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{handlers, middleware::metrics_middleware, shipments, tracking};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Shipments
        .route(
            "/shipments",
            post(shipments::create_shipment).get(shipments::list_shipments),
        )
        .route(
            "/shipments/{id}",
            get(shipments::get_shipment)
                .put(shipments::update_shipment)
                .delete(shipments::delete_shipment),
        )
        .route(
            "/shipments/{id}/update-tracking",
            post(shipments::update_tracking),
        )
        .route("/shipments/{id}/jobs", get(shipments::list_shipment_jobs))
        // Tracking worker
        .route("/tracking/status", get(tracking::get_status))
        .with_state(Arc::clone(&state));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
