//! Route gateway for the climate data API.
//!
//! Each sibling module exports a subrouter for one resource; this module
//! merges them and attaches the shared state, so `main.rs` never needs to
//! know about individual endpoints.

use axum::Router;
use sqlx::PgPool;

use crate::errors::{ApiError, ApiResult};
use crate::Config;

mod data_types;
mod export;
mod health;
mod invalidations;
mod links;
mod messages;
mod readings;
mod root;
mod sensors;
mod settings;
mod stations;

// ---

/// Shared state for all routes.
pub type AppState = (PgPool, Config);

pub fn router(pool: PgPool, config: Config) -> Router {
    // ---
    Router::new()
        .merge(root::router())
        .merge(health::router())
        .merge(data_types::router())
        .merge(sensors::router())
        .merge(stations::router())
        .merge(links::router())
        .merge(readings::router())
        .merge(messages::router())
        .merge(settings::router())
        .merge(export::router())
        .merge(invalidations::router())
        .with_state((pool, config))
}

// ---

/// Historical boolean flag parsing: only `true` and `1` enable a flag, any
/// other value (or absence) leaves it off.
pub(crate) fn flag(value: Option<&str>) -> bool {
    matches!(value, Some("true") | Some("1"))
}

/// Parse a comma-separated id list query parameter (e.g. `sensors=3,7,12`).
pub(crate) fn parse_id_list(value: Option<&str>) -> ApiResult<Vec<i32>> {
    // ---
    let Some(raw) = value else {
        return Ok(Vec::new());
    };

    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<i32>()
                .map_err(|_| ApiError::Validation(format!("invalid id '{}'", part.trim())))
        })
        .collect()
}

/// Collect sensor ids from both accepted forms: a comma-separated `sensors`
/// value and the repeated `sensors[]` key.
pub(crate) fn sensor_id_params(
    single: Option<&str>,
    pairs: &[(String, String)],
) -> ApiResult<Vec<i32>> {
    // ---
    let mut ids = parse_id_list(single)?;
    for (key, value) in pairs {
        if key == "sensors[]" {
            ids.extend(parse_id_list(Some(value))?);
        }
    }
    Ok(ids)
}
