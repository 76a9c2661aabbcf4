//! Station CRUD and station-scoped sub-resources.
//!
//! The data routes here are thin wrappers over the reading query engine:
//! `/stations/{id}/data` resolves the effective window (explicit bounds or
//! the 7-day default) and `/stations/{id}/data/latest` anchors the window
//! one hour before the station's most recent message arrival.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;

use crate::errors::{ApiError, ApiResult};
use crate::models::{Message, Sensor, Station, StationSensorLink};
use crate::query::{self, ReadingQuery, TimeWindow};
use crate::routes::{flag, AppState};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/stations", get(list).post(create))
        .route("/stations/{id}", get(detail).put(update).delete(destroy))
        .route("/stations/{id}/data", get(data))
        .route("/stations/{id}/data/latest", get(latest_data))
        .route("/stations/{id}/sensors", get(sensors))
        .route("/stations/{id}/links", get(links))
        .route("/stations/{id}/messages", get(messages))
        .route("/stations/{id}/messages/latest", get(latest_message))
}

#[derive(Debug, Deserialize)]
struct StationPayload {
    name: String,
    goes_id: String,
}

impl StationPayload {
    fn validate(&self) -> ApiResult<()> {
        // ---
        if self.name.is_empty() {
            return Err(ApiError::Validation("name must not be empty".into()));
        }
        if self.goes_id.is_empty() || self.goes_id.len() > 8 {
            return Err(ApiError::Validation(
                "goes_id must be 1-8 characters".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct StationListParams {
    goes_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StationDataParams {
    start: Option<String>,
    end: Option<String>,
    compact: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompactParams {
    compact: Option<String>,
}

// ---

async fn list(
    State((pool, _)): State<AppState>,
    Query(params): Query<StationListParams>,
) -> ApiResult<Json<Vec<Station>>> {
    // ---
    let rows = match params.goes_id {
        Some(goes_id) => {
            sqlx::query_as::<_, Station>(
                "SELECT * FROM stations WHERE goes_id = $1 ORDER BY id",
            )
            .bind(goes_id)
            .fetch_all(&pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Station>("SELECT * FROM stations ORDER BY id")
                .fetch_all(&pool)
                .await?
        }
    };

    Ok(Json(rows))
}

async fn create(
    State((pool, _)): State<AppState>,
    Json(payload): Json<StationPayload>,
) -> ApiResult<(StatusCode, Json<Station>)> {
    // ---
    payload.validate()?;

    let row = sqlx::query_as::<_, Station>(
        "INSERT INTO stations (name, goes_id) VALUES ($1, $2) RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.goes_id)
    .fetch_one(&pool)
    .await?;

    Ok((StatusCode::CREATED, Json(row)))
}

async fn detail(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<Station>> {
    // ---
    fetch_station(&pool, id).await.map(Json)
}

async fn update(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<StationPayload>,
) -> ApiResult<Json<Station>> {
    // ---
    payload.validate()?;

    let row = sqlx::query_as::<_, Station>(
        "UPDATE stations SET name = $1, goes_id = $2, updated = NOW() WHERE id = $3 RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.goes_id)
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| ApiError::not_found(format!("station {id}")))?;

    Ok(Json(row))
}

async fn destroy(State((pool, _)): State<AppState>, Path(id): Path<i32>) -> ApiResult<StatusCode> {
    // ---
    let result = sqlx::query("DELETE FROM stations WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found(format!("station {id}")));
    }

    Ok(StatusCode::NO_CONTENT)
}

// ---

/// Readings for a station over an explicit or default window. The compact
/// projection drops the station column since the path already names it.
async fn data(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
    Query(params): Query<StationDataParams>,
) -> ApiResult<Response> {
    // ---
    fetch_station(&pool, id).await?;

    let start = query::parse_timestamp_opt(params.start.as_deref())?;
    let end = query::parse_timestamp_opt(params.end.as_deref())?;

    let mut q = ReadingQuery::for_window(TimeWindow::resolve(start, end, false, Utc::now()));
    q.station = Some(id);

    if flag(params.compact.as_deref()) {
        let rows = query::fetch_station_compact(&pool, &q).await?;
        Ok(Json(rows).into_response())
    } else {
        let rows = query::fetch_full(&pool, &q).await?;
        Ok(Json(rows).into_response())
    }
}

/// Readings since one hour before the station's most recent message.
async fn latest_data(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
    Query(params): Query<CompactParams>,
) -> ApiResult<Response> {
    // ---
    fetch_station(&pool, id).await?;

    let start = query::latest_window_start(&pool, Some(id)).await?;

    let mut q = ReadingQuery::for_window(TimeWindow::since(start));
    q.station = Some(id);

    if flag(params.compact.as_deref()) {
        let rows = query::fetch_station_compact(&pool, &q).await?;
        Ok(Json(rows).into_response())
    } else {
        let rows = query::fetch_full(&pool, &q).await?;
        Ok(Json(rows).into_response())
    }
}

/// The station's sensors in message parse order.
async fn sensors(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<Vec<Sensor>>> {
    // ---
    fetch_station(&pool, id).await?;

    let rows = sqlx::query_as::<_, Sensor>(
        r#"
        SELECT s.*
        FROM sensors s
        JOIN station_sensor_links l ON l.sensor_id = s.id
        WHERE l.station_id = $1
        ORDER BY l.station_order
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(rows))
}

async fn links(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<Vec<StationSensorLink>>> {
    // ---
    fetch_station(&pool, id).await?;

    let rows = sqlx::query_as::<_, StationSensorLink>(
        "SELECT * FROM station_sensor_links WHERE station_id = $1 ORDER BY station_order",
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(rows))
}

async fn messages(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<Vec<Message>>> {
    // ---
    fetch_station(&pool, id).await?;

    let rows = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages WHERE station_id = $1 ORDER BY arrival_time",
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(rows))
}

async fn latest_message(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<Message>> {
    // ---
    fetch_station(&pool, id).await?;

    let row = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages WHERE station_id = $1 ORDER BY arrival_time DESC LIMIT 1",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| ApiError::not_found(format!("message for station {id}")))?;

    Ok(Json(row))
}

pub(crate) async fn fetch_station(pool: &PgPool, id: i32) -> ApiResult<Station> {
    // ---
    sqlx::query_as::<_, Station>("SELECT * FROM stations WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("station {id}")))
}
