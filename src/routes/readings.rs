//! Reading queries and CRUD.
//!
//! `GET /readings` is the front door of the query engine: window bounds
//! (defaulting to the last week), start exclusivity, interval down-sampling
//! and the compact projection are all resolved here, once, before the
//! engine runs. `/readings/latest` anchors its window on the most recent
//! message arrival across all stations.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::errors::{ApiError, ApiResult};
use crate::models::{Reading, SOURCE_DEVICE_LOG, SOURCE_GOES};
use crate::query::{self, IntervalCode, ReadingQuery, TimeWindow};
use crate::routes::{flag, sensor_id_params, AppState};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/readings", get(list).post(create))
        .route("/readings/latest", get(latest))
        .route("/readings/{id}", get(detail).put(update).delete(destroy))
}

#[derive(Debug, Deserialize)]
struct ReadingsParams {
    start: Option<String>,
    end: Option<String>,
    start_exclusive: Option<String>,
    interval: Option<String>,
    /// Comma-separated sensor id list; the repeated `sensors[]` key is also
    /// accepted.
    sensors: Option<String>,
    compact: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadingPayload {
    read_time: DateTime<Utc>,
    #[serde(default = "default_data_source")]
    data_source: String,
    value: Option<i32>,
    #[serde(default)]
    qc_processed: bool,
    #[serde(default)]
    invalid: bool,
    sensor_id: Option<i32>,
    station_id: Option<i32>,
    station_sensor_link_id: Option<i32>,
    message_id: Option<i32>,
}

fn default_data_source() -> String {
    SOURCE_GOES.to_string()
}

impl ReadingPayload {
    fn validate(&self) -> ApiResult<()> {
        // ---
        if self.data_source != SOURCE_GOES && self.data_source != SOURCE_DEVICE_LOG {
            return Err(ApiError::Validation(format!(
                "data_source must be '{SOURCE_GOES}' or '{SOURCE_DEVICE_LOG}'"
            )));
        }
        Ok(())
    }
}

// ---

async fn list(
    State((pool, _)): State<AppState>,
    Query(params): Query<ReadingsParams>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    // ---
    let start = query::parse_timestamp_opt(params.start.as_deref())?;
    let end = query::parse_timestamp_opt(params.end.as_deref())?;
    let start_exclusive = flag(params.start_exclusive.as_deref());

    let q = ReadingQuery {
        station: None,
        sensor: None,
        sensors: sensor_id_params(params.sensors.as_deref(), &pairs)?,
        require_station: false,
        window: TimeWindow::resolve(start, end, start_exclusive, Utc::now()),
        interval: IntervalCode::from_param(params.interval.as_deref()),
    };

    if flag(params.compact.as_deref()) {
        let rows = query::fetch_compact(&pool, &q).await?;
        Ok(Json(rows).into_response())
    } else {
        let rows = query::fetch_full(&pool, &q).await?;
        Ok(Json(rows).into_response())
    }
}

/// All readings taken since one hour before the most recent message arrival
/// across every station, excluding readings orphaned by station deletion.
/// Always served in the compact projection.
async fn latest(State((pool, _)): State<AppState>) -> ApiResult<Response> {
    // ---
    let start = query::latest_window_start(&pool, None).await?;
    let mut q = ReadingQuery::for_window(TimeWindow::since(start));
    q.require_station = true;

    let rows = query::fetch_compact(&pool, &q).await?;
    Ok(Json(rows).into_response())
}

async fn create(
    State((pool, _)): State<AppState>,
    Json(payload): Json<ReadingPayload>,
) -> ApiResult<(StatusCode, Json<Reading>)> {
    // ---
    payload.validate()?;

    let row = sqlx::query_as::<_, Reading>(
        r#"
        INSERT INTO readings
            (read_time, data_source, value, qc_processed, invalid,
             sensor_id, station_id, station_sensor_link_id, message_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(payload.read_time)
    .bind(&payload.data_source)
    .bind(payload.value)
    .bind(payload.qc_processed)
    .bind(payload.invalid)
    .bind(payload.sensor_id)
    .bind(payload.station_id)
    .bind(payload.station_sensor_link_id)
    .bind(payload.message_id)
    .fetch_one(&pool)
    .await?;

    Ok((StatusCode::CREATED, Json(row)))
}

async fn detail(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<Reading>> {
    // ---
    let row = sqlx::query_as::<_, Reading>("SELECT * FROM readings WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("reading {id}")))?;

    Ok(Json(row))
}

/// Full update; this is the per-row QC review path (flipping `invalid` or
/// `qc_processed` on a single reading).
async fn update(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<ReadingPayload>,
) -> ApiResult<Json<Reading>> {
    // ---
    payload.validate()?;

    let row = sqlx::query_as::<_, Reading>(
        r#"
        UPDATE readings
        SET read_time = $1, data_source = $2, value = $3, qc_processed = $4,
            invalid = $5, sensor_id = $6, station_id = $7,
            station_sensor_link_id = $8, message_id = $9, updated = NOW()
        WHERE id = $10
        RETURNING *
        "#,
    )
    .bind(payload.read_time)
    .bind(&payload.data_source)
    .bind(payload.value)
    .bind(payload.qc_processed)
    .bind(payload.invalid)
    .bind(payload.sensor_id)
    .bind(payload.station_id)
    .bind(payload.station_sensor_link_id)
    .bind(payload.message_id)
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| ApiError::not_found(format!("reading {id}")))?;

    Ok(Json(row))
}

async fn destroy(State((pool, _)): State<AppState>, Path(id): Path<i32>) -> ApiResult<StatusCode> {
    // ---
    let result = sqlx::query("DELETE FROM readings WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found(format!("reading {id}")));
    }

    Ok(StatusCode::NO_CONTENT)
}
