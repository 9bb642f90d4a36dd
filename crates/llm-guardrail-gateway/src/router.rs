//! Route configuration

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::{admin_middleware, auth_middleware, ingress_middleware};
use crate::state::AppState;

/// Create the application router
///
/// ## Routes
/// - GET /health - Basic health check
/// - GET /health/ready - Readiness probe
/// - GET /health/live - Liveness probe
/// - GET /version - Version information
/// - GET /metrics - Prometheus exposition
/// - POST /v1/guardrails - Direct API-call screening
/// - POST /v1/gateway/chat/completions - Screening reverse proxy
/// - POST /v1/chat/completions - Alias of the proxy route
/// - POST /admin/reload - Reload the policy file
/// - DELETE /admin/bans/:end_user_id - Lift a ban
///
/// Guarded routes authenticate the bearer key and count the request against
/// the tenant's limit before any handler runs. Admin routes require the
/// admin token. Probes are not guarded.
pub fn create_router(state: AppState) -> Router {
    let guarded_routes = Router::new()
        .route("/v1/guardrails", post(handlers::check_guardrails))
        .route("/v1/gateway/chat/completions", post(handlers::chat_completions))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/admin/reload", post(handlers::reload))
        .route("/admin/bans/:end_user_id", delete(handlers::unban))
        .layer(middleware::from_fn_with_state(state.clone(), admin_middleware));

    let body_limit = state.body_limit;
    Router::new()
        .route("/health", get(handlers::health))
        .route("/health/ready", get(handlers::ready))
        .route("/health/live", get(handlers::live))
        .route("/version", get(handlers::version))
        .route("/metrics", get(handlers::metrics))
        .merge(guarded_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(state.clone(), ingress_middleware))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
