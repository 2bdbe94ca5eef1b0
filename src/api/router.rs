//! Triage API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::types::ApiContext;

/// Build the triage API router.
///
/// NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
pub fn triage_api_router(ctx: ApiContext) -> Router {
    let body_limit = ctx.body_limit();

    let v1 = Router::new()
        .route("/triage/:triage_id/status", get(endpoints::triage::status))
        .route("/triage/:triage_id/cancel", post(endpoints::triage::cancel));

    Router::new()
        .route("/", get(endpoints::home::root))
        .route("/upload", post(endpoints::triage::upload))
        .nest("/api/v1", v1)
        .with_state(ctx)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
