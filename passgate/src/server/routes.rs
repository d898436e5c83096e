//! Router configuration.

use super::health::{health_check, metrics, readiness_check};
use super::state::AppState;
use crate::api::{admin, passes, qr};
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use passgate_web::correlation_id;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Build the complete Axum router.
///
/// - `/health`, `/ready`, `/metrics`
/// - `/api/qr/*`: issue, validate and public view
/// - `/api/passes`: the caller's passes
/// - `/api/admin/*`: registration, status changes and redemption reset
///
/// Requests running longer than `request_timeout` are answered with 408.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let api_routes = Router::new()
        // Token lifecycle
        .route("/qr/issue", post(qr::issue))
        .route("/qr/validate", post(qr::validate))
        .route("/qr/public", get(qr::public_view))
        // Owner listing
        .route("/passes", get(passes::list))
        // Administration
        .route("/admin/tickets", post(admin::register_ticket))
        .route("/admin/subscriptions", post(admin::register_subscription))
        .route("/admin/tickets/:id/status", put(admin::update_ticket_status))
        .route(
            "/admin/subscriptions/:id/status",
            put(admin::update_subscription_status),
        )
        .route("/admin/tickets/:id/reset", post(admin::reset_redemption));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .nest("/api", api_routes)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(correlation_id))
        .with_state(state)
}
