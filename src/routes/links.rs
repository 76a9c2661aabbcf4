//! Station-sensor link CRUD.
//!
//! Links bind a sensor to a station with a parse/display order and an
//! assigned data type. Creation pre-checks that the referenced station and
//! sensor exist so a dangling id surfaces as NotFound instead of a raw
//! foreign-key violation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::errors::{ApiError, ApiResult};
use crate::models::StationSensorLink;
use crate::routes::{data_types, sensors, stations, AppState};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/links", get(list).post(create))
        .route("/links/{id}", get(detail).put(update).delete(destroy))
}

#[derive(Debug, Deserialize)]
struct LinkPayload {
    station_order: i16,
    #[serde(default = "default_read_frequency")]
    read_frequency: i16,
    station_id: i32,
    sensor_id: i32,
    data_type_id: Option<i32>,
}

fn default_read_frequency() -> i16 {
    4
}

impl LinkPayload {
    fn validate(&self) -> ApiResult<()> {
        // ---
        if self.station_order < 0 {
            return Err(ApiError::Validation(
                "station_order must be non-negative".into(),
            ));
        }
        if self.read_frequency <= 0 {
            return Err(ApiError::Validation(
                "read_frequency must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct LinkListParams {
    station: Option<i32>,
    sensor: Option<i32>,
}

// ---

async fn list(
    State((pool, _)): State<AppState>,
    Query(params): Query<LinkListParams>,
) -> ApiResult<Json<Vec<StationSensorLink>>> {
    // ---
    let mut qb = sqlx::QueryBuilder::<sqlx::Postgres>::new(
        "SELECT * FROM station_sensor_links WHERE TRUE",
    );

    if let Some(station) = params.station {
        qb.push(" AND station_id = ");
        qb.push_bind(station);
    }

    if let Some(sensor) = params.sensor {
        qb.push(" AND sensor_id = ");
        qb.push_bind(sensor);
    }

    qb.push(" ORDER BY created");

    let rows = qb
        .build_query_as::<StationSensorLink>()
        .fetch_all(&pool)
        .await?;

    Ok(Json(rows))
}

async fn create(
    State((pool, _)): State<AppState>,
    Json(payload): Json<LinkPayload>,
) -> ApiResult<(StatusCode, Json<StationSensorLink>)> {
    // ---
    payload.validate()?;

    stations::fetch_station(&pool, payload.station_id).await?;
    sensors::fetch_sensor(&pool, payload.sensor_id).await?;
    if let Some(dt) = payload.data_type_id {
        data_types::fetch_data_type(&pool, dt).await?;
    }

    let row = sqlx::query_as::<_, StationSensorLink>(
        r#"
        INSERT INTO station_sensor_links
            (station_order, read_frequency, station_id, sensor_id, data_type_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(payload.station_order)
    .bind(payload.read_frequency)
    .bind(payload.station_id)
    .bind(payload.sensor_id)
    .bind(payload.data_type_id)
    .fetch_one(&pool)
    .await?;

    Ok((StatusCode::CREATED, Json(row)))
}

async fn detail(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<StationSensorLink>> {
    // ---
    let row = sqlx::query_as::<_, StationSensorLink>(
        "SELECT * FROM station_sensor_links WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| ApiError::not_found(format!("station-sensor link {id}")))?;

    Ok(Json(row))
}

async fn update(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<LinkPayload>,
) -> ApiResult<Json<StationSensorLink>> {
    // ---
    payload.validate()?;

    stations::fetch_station(&pool, payload.station_id).await?;
    sensors::fetch_sensor(&pool, payload.sensor_id).await?;
    if let Some(dt) = payload.data_type_id {
        data_types::fetch_data_type(&pool, dt).await?;
    }

    let row = sqlx::query_as::<_, StationSensorLink>(
        r#"
        UPDATE station_sensor_links
        SET station_order = $1, read_frequency = $2, station_id = $3,
            sensor_id = $4, data_type_id = $5, updated = NOW()
        WHERE id = $6
        RETURNING *
        "#,
    )
    .bind(payload.station_order)
    .bind(payload.read_frequency)
    .bind(payload.station_id)
    .bind(payload.sensor_id)
    .bind(payload.data_type_id)
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| ApiError::not_found(format!("station-sensor link {id}")))?;

    Ok(Json(row))
}

async fn destroy(State((pool, _)): State<AppState>, Path(id): Path<i32>) -> ApiResult<StatusCode> {
    // ---
    let result = sqlx::query("DELETE FROM station_sensor_links WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found(format!("station-sensor link {id}")));
    }

    Ok(StatusCode::NO_CONTENT)
}
