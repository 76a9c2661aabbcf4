//! Process-wide key-value settings.
//!
//! Simple name → text pairs looked up by id or by name. Creation happens
//! out-of-band (seed data); the API lists, reads and updates.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::errors::{ApiError, ApiResult};
use crate::models::Setting;
use crate::routes::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/settings", get(list))
        .route("/settings/{id}", get(detail).put(update))
        .route("/settings/name/{name}", get(detail_by_name))
}

#[derive(Debug, Deserialize)]
struct SettingPayload {
    name: String,
    value: String,
}

// ---

async fn list(State((pool, _)): State<AppState>) -> ApiResult<Json<Vec<Setting>>> {
    // ---
    let rows = sqlx::query_as::<_, Setting>("SELECT * FROM settings ORDER BY id")
        .fetch_all(&pool)
        .await?;
    Ok(Json(rows))
}

async fn detail(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<Setting>> {
    // ---
    let row = sqlx::query_as::<_, Setting>("SELECT * FROM settings WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("setting {id}")))?;

    Ok(Json(row))
}

async fn detail_by_name(
    State((pool, _)): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Setting>> {
    // ---
    let row = sqlx::query_as::<_, Setting>("SELECT * FROM settings WHERE name = $1")
        .bind(&name)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("setting '{name}'")))?;

    Ok(Json(row))
}

async fn update(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<SettingPayload>,
) -> ApiResult<Json<Setting>> {
    // ---
    if payload.name.is_empty() || payload.name.len() > 63 {
        return Err(ApiError::Validation("name must be 1-63 characters".into()));
    }

    let row = sqlx::query_as::<_, Setting>(
        "UPDATE settings SET name = $1, value = $2, updated = NOW() WHERE id = $3 RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.value)
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| ApiError::not_found(format!("setting {id}")))?;

    Ok(Json(row))
}
