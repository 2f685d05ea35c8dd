// SPDX-License-Identifier: GPL-3.0-or-later
//! Manual follow trigger: the one write path this crate exposes directly,
//! everything else (browsing, import requests) lives in the out-of-scope
//! HTTP handler pool this daemon's C1/C2 merely back.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use catalogd_application::AppState;
use catalogd_domain::{Artist, JobType};
use catalogd_infrastructure::queue::{enqueue, EnqueueRequest};
use catalogd_infrastructure::sqlite_adapters::{get_artist, set_artist_followed, upsert_artist};
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct FollowResponse {
    pub artist_id: String,
    pub job_id: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

/// Marks an artist followed (creating a bare row if unknown yet) and
/// enqueues an immediate `sync_artist` job at the scheduler's own priority
///, so an operator doesn't wait for the next sync cadence.
#[utoipa::path(
        post,
        path = "/api/v1/artists/{artist_id}/follow",
        params(("artist_id" = String, Path, description = "Opaque upstream artist id")),
        responses(
            (status = 202, description = "Follow recorded and sync enqueued", body = FollowResponse),
            (status = 500, description = "Store error", body = ErrorResponse),
        ),
        tag = "artists"
)]
pub async fn follow_artist(
    State(state): State<AppState>,
    Path(artist_id): Path<String>,
) -> impl IntoResponse {
    let mut tx = match state.pool.begin().await {
        Ok(tx) => tx,
        Err(e) => return internal_error(e),
    };

    match get_artist(&state.pool, &artist_id).await {
        Ok(Some(_)) => {
            if let Err(e) = set_artist_followed(&mut tx, &artist_id, true).await {
                return internal_error(e);
            }
        }
        Ok(None) => {
            let artist = Artist::new(artist_id.clone(), artist_id.clone());
            if let Err(e) = upsert_artist(&mut tx, &artist).await {
                return internal_error(e);
            }
        }
        Err(e) => return internal_error(e),
    }

    if let Err(e) = tx.commit().await {
        return internal_error(e);
    }

    let payload = serde_json::json!({ "artist_id": artist_id });
    let req = EnqueueRequest::new(JobType::SyncArtist, payload).with_priority(5);
    let job_id = match enqueue(&state.pool, req).await {
        Ok(id) => id,
        Err(e) => return internal_error(e),
    };

    info!(target: "api", artist_id = %artist_id, job_id, "follow recorded, sync enqueued");
    (StatusCode::ACCEPTED, Json(FollowResponse { artist_id, job_id })).into_response()
}

fn internal_error(e: impl std::fmt::Display) -> axum::response::Response {
    warn!(target: "api", error = %e, "follow_artist failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: e.to_string() }),
    )
    .into_response()
}
