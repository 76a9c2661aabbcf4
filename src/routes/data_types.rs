//! Data type CRUD.
//!
//! Data types carry the physical unit and the valid-value bounds used by
//! exports. Bounds default to the full signed-32-bit range when a payload
//! leaves them out. Short names become XML element names and CSV column
//! headers, so they are restricted to a safe character set at write time.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use sqlx::PgPool;

use crate::errors::{ApiError, ApiResult};
use crate::models::{Bounds, DataType, UNITS};
use crate::routes::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/data-types", get(list).post(create))
        .route(
            "/data-types/{id}",
            get(detail).put(update).delete(destroy),
        )
}

#[derive(Debug, Deserialize)]
struct DataTypePayload {
    name: String,
    short_name: String,
    unit: Option<String>,
    bound_lower: Option<f64>,
    bound_upper: Option<f64>,
}

impl DataTypePayload {
    /// Validate the payload and resolve the effective bounds.
    fn validate(&self) -> ApiResult<Bounds> {
        // ---
        if self.name.is_empty() {
            return Err(ApiError::Validation("name must not be empty".into()));
        }

        if !valid_short_name(&self.short_name) {
            return Err(ApiError::Validation(format!(
                "short_name '{}' is not a valid identifier",
                self.short_name
            )));
        }

        if let Some(unit) = &self.unit {
            if !UNITS.contains(&unit.as_str()) {
                return Err(ApiError::Validation(format!("unknown unit '{unit}'")));
            }
        }

        let defaults = Bounds::default();
        let bounds = Bounds {
            lower: self.bound_lower.unwrap_or(defaults.lower),
            upper: self.bound_upper.unwrap_or(defaults.upper),
        };

        if bounds.lower >= bounds.upper {
            return Err(ApiError::Validation(format!(
                "bounds [{}, {}) are empty",
                bounds.lower, bounds.upper
            )));
        }

        Ok(bounds)
    }
}

/// Leading ASCII letter or underscore, then letters, digits, `_` or `-`.
fn valid_short_name(s: &str) -> bool {
    // ---
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ---

async fn list(State((pool, _)): State<AppState>) -> ApiResult<Json<Vec<DataType>>> {
    // ---
    let rows = sqlx::query_as::<_, DataType>("SELECT * FROM data_types ORDER BY id")
        .fetch_all(&pool)
        .await?;
    Ok(Json(rows))
}

async fn create(
    State((pool, _)): State<AppState>,
    Json(payload): Json<DataTypePayload>,
) -> ApiResult<(StatusCode, Json<DataType>)> {
    // ---
    let bounds = payload.validate()?;

    let row = sqlx::query_as::<_, DataType>(
        r#"
        INSERT INTO data_types (name, short_name, unit, bound_lower, bound_upper)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(&payload.name)
    .bind(&payload.short_name)
    .bind(&payload.unit)
    .bind(bounds.lower)
    .bind(bounds.upper)
    .fetch_one(&pool)
    .await?;

    Ok((StatusCode::CREATED, Json(row)))
}

async fn detail(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<DataType>> {
    // ---
    fetch_data_type(&pool, id).await.map(Json)
}

async fn update(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<DataTypePayload>,
) -> ApiResult<Json<DataType>> {
    // ---
    let bounds = payload.validate()?;

    let row = sqlx::query_as::<_, DataType>(
        r#"
        UPDATE data_types
        SET name = $1, short_name = $2, unit = $3,
            bound_lower = $4, bound_upper = $5, updated = NOW()
        WHERE id = $6
        RETURNING *
        "#,
    )
    .bind(&payload.name)
    .bind(&payload.short_name)
    .bind(&payload.unit)
    .bind(bounds.lower)
    .bind(bounds.upper)
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| ApiError::not_found(format!("data type {id}")))?;

    Ok(Json(row))
}

async fn destroy(State((pool, _)): State<AppState>, Path(id): Path<i32>) -> ApiResult<StatusCode> {
    // ---
    let result = sqlx::query("DELETE FROM data_types WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found(format!("data type {id}")));
    }

    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn fetch_data_type(pool: &PgPool, id: i32) -> ApiResult<DataType> {
    // ---
    sqlx::query_as::<_, DataType>("SELECT * FROM data_types WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("data type {id}")))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn payload() -> DataTypePayload {
        DataTypePayload {
            name: "Air Temperature".to_string(),
            short_name: "atemp".to_string(),
            unit: Some("°C".to_string()),
            bound_lower: Some(-50.0),
            bound_upper: Some(60.0),
        }
    }

    #[test]
    fn test_payload_validation() {
        // ---
        assert!(payload().validate().is_ok());

        let mut bad_unit = payload();
        bad_unit.unit = Some("furlongs".to_string());
        assert!(bad_unit.validate().is_err());

        let mut bad_name = payload();
        bad_name.short_name = "2fast".to_string();
        assert!(bad_name.validate().is_err());

        let mut empty_bounds = payload();
        empty_bounds.bound_lower = Some(10.0);
        empty_bounds.bound_upper = Some(10.0);
        assert!(empty_bounds.validate().is_err());
    }

    #[test]
    fn test_missing_bounds_default_to_full_range() {
        // ---
        let mut p = payload();
        p.bound_lower = None;
        p.bound_upper = None;

        let bounds = p.validate().unwrap();
        assert_eq!(bounds, Bounds::default());
    }

    #[test]
    fn test_short_name_charset() {
        // ---
        assert!(valid_short_name("atemp"));
        assert!(valid_short_name("_wspeed2"));
        assert!(valid_short_name("water-temp"));
        assert!(!valid_short_name(""));
        assert!(!valid_short_name("9lives"));
        assert!(!valid_short_name("has space"));
        assert!(!valid_short_name("<tag>"));
    }
}
