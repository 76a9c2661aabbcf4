//! Sensor CRUD and sensor-scoped sub-resources.
//!
//! `decimals` is the power-of-ten scaling for every reading the sensor has
//! ever produced; updates that try to change it are rejected rather than
//! silently reinterpreting history.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use sqlx::PgPool;

use crate::errors::{ApiError, ApiResult};
use crate::models::{Reading, Sensor, Station};
use crate::routes::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/sensors", get(list).post(create))
        .route("/sensors/{id}", get(detail).put(update).delete(destroy))
        .route("/sensors/{id}/data", get(data))
        .route("/sensors/{id}/stations", get(stations))
}

#[derive(Debug, Deserialize)]
struct SensorPayload {
    name: String,
    #[serde(default)]
    data_id: String,
    decimals: i16,
}

impl SensorPayload {
    fn validate(&self) -> ApiResult<()> {
        // ---
        if self.name.is_empty() {
            return Err(ApiError::Validation("name must not be empty".into()));
        }
        if self.decimals < 0 {
            return Err(ApiError::Validation("decimals must be non-negative".into()));
        }
        Ok(())
    }
}

// ---

async fn list(State((pool, _)): State<AppState>) -> ApiResult<Json<Vec<Sensor>>> {
    // ---
    let rows = sqlx::query_as::<_, Sensor>("SELECT * FROM sensors ORDER BY id")
        .fetch_all(&pool)
        .await?;
    Ok(Json(rows))
}

async fn create(
    State((pool, _)): State<AppState>,
    Json(payload): Json<SensorPayload>,
) -> ApiResult<(StatusCode, Json<Sensor>)> {
    // ---
    payload.validate()?;

    let row = sqlx::query_as::<_, Sensor>(
        "INSERT INTO sensors (name, data_id, decimals) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.data_id)
    .bind(payload.decimals)
    .fetch_one(&pool)
    .await?;

    Ok((StatusCode::CREATED, Json(row)))
}

async fn detail(State((pool, _)): State<AppState>, Path(id): Path<i32>) -> ApiResult<Json<Sensor>> {
    // ---
    fetch_sensor(&pool, id).await.map(Json)
}

async fn update(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<SensorPayload>,
) -> ApiResult<Json<Sensor>> {
    // ---
    payload.validate()?;

    let existing = fetch_sensor(&pool, id).await?;
    if existing.decimals != payload.decimals {
        return Err(ApiError::Validation(
            "decimals is immutable: changing it would reinterpret all historical readings".into(),
        ));
    }

    let row = sqlx::query_as::<_, Sensor>(
        "UPDATE sensors SET name = $1, data_id = $2, updated = NOW() WHERE id = $3 RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.data_id)
    .bind(id)
    .fetch_one(&pool)
    .await?;

    Ok(Json(row))
}

async fn destroy(State((pool, _)): State<AppState>, Path(id): Path<i32>) -> ApiResult<StatusCode> {
    // ---
    let result = sqlx::query("DELETE FROM sensors WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found(format!("sensor {id}")));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// All readings taken by this sensor, ascending by read time.
async fn data(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<Vec<Reading>>> {
    // ---
    fetch_sensor(&pool, id).await?;

    let rows = sqlx::query_as::<_, Reading>(
        "SELECT * FROM readings WHERE sensor_id = $1 ORDER BY read_time",
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(rows))
}

/// Stations this sensor is linked to.
async fn stations(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<Vec<Station>>> {
    // ---
    fetch_sensor(&pool, id).await?;

    let rows = sqlx::query_as::<_, Station>(
        r#"
        SELECT DISTINCT s.*
        FROM stations s
        JOIN station_sensor_links l ON l.station_id = s.id
        WHERE l.sensor_id = $1
        ORDER BY s.id
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(rows))
}

pub(crate) async fn fetch_sensor(pool: &PgPool, id: i32) -> ApiResult<Sensor> {
    // ---
    sqlx::query_as::<_, Sensor>("SELECT * FROM sensors WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("sensor {id}")))
}
