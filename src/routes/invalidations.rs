//! Quality-control invalidation endpoint.
//!
//! `POST /invalidations` resolves the (station, data type) scope to a single
//! station-sensor link, then performs the idempotent bulk transition. A zero
//! count is a normal outcome (nothing active matched), reported in the
//! response detail rather than as an error.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::errors::{ApiError, ApiResult};
use crate::invalidate;
use crate::query;
use crate::routes::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/invalidations", post(create))
}

#[derive(Debug, Deserialize)]
struct InvalidationBody {
    station: i32,
    data_type: i32,
    time_start: String,
    time_end: String,
}

#[derive(Debug, Serialize)]
struct InvalidationResponse {
    count: u64,
    detail: String,
}

// ---

async fn create(
    State((pool, _)): State<AppState>,
    Json(body): Json<InvalidationBody>,
) -> ApiResult<Json<InvalidationResponse>> {
    // ---
    let time_start = query::parse_timestamp(&body.time_start)?;
    let time_end = query::parse_timestamp(&body.time_end)?;

    if time_start > time_end {
        return Err(ApiError::Validation(
            "time_start must not be after time_end".into(),
        ));
    }

    let count =
        invalidate::invalidate_range(&pool, body.station, body.data_type, time_start, time_end)
            .await?;

    let detail = if count > 0 {
        format!(
            "Invalidated {count} readings on interval [{}, {}].",
            time_start, time_end
        )
    } else {
        "No active readings were found within those restrictions.".to_string()
    };

    Ok(Json(InvalidationResponse { count, detail }))
}
