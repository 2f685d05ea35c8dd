// SPDX-License-Identifier: GPL-3.0-or-later
pub mod handlers;
pub mod middleware;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use catalogd_application::AppState;
use handlers::follow::{follow_artist, ErrorResponse, FollowResponse};
use middleware::auth::auth_middleware;
use serde::Serialize;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Serialize, utoipa::ToSchema)]
struct HealthResponse {
    status: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
#[allow(dead_code)]
async fn health() -> Json<HealthResponse> {
    health_handler().await
}

#[derive(OpenApi)]
#[openapi(
    paths(health, follow_artist),
    components(schemas(HealthResponse, FollowResponse, ErrorResponse)),
    tags(
        (name = "system", description = "System health and status endpoints"),
        (name = "artists", description = "Manual subscription triggers")
    ),
    info(
        title = "catalogd API",
        version = "0.1.0",
        description = "Minimal operator surface over the catalog daemon's job queue",
    )
)]
struct ApiDoc;

/// This daemon's own surface is deliberately thin: browsing and import
/// requests belong to a separate HTTP handler pool that writes to the
/// catalog store and job queue directly. This router only exposes health
/// and a manual follow trigger an operator can call without waiting on the
/// scheduler's own cadence.
pub fn router(state: AppState) -> Router {
    info!(target: "api", "building router");

    let api_v1 = Router::new()
        .route("/artists/:artist_id/follow", post(follow_artist))
        .layer(axum_middleware::from_fn(auth_middleware));

    let openapi = ApiDoc::openapi();

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/v1", api_v1)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", openapi))
        .with_state(state)
}
