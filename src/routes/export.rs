//! Report export endpoint.
//!
//! `POST /export` validates the request (station, non-empty data-type
//! selection, parseable window, known format) before anything is fetched,
//! resolves the column headers from the station's link order, then hands
//! off to the CSV (streaming) or XML (in-memory tree) renderer.

use axum::{extract::State, response::Response, routing::post, Json, Router};
use serde::Deserialize;

use crate::errors::{ApiError, ApiResult};
use crate::export::{self, ExportFormat, ExportPolicy, ExportSpec};
use crate::query;
use crate::routes::{stations, AppState};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/export", post(export))
}

#[derive(Debug, Deserialize)]
struct ExportBody {
    station: i32,
    #[serde(default)]
    data_types: Vec<i32>,
    time_start: Option<String>,
    time_end: Option<String>,
    #[serde(default)]
    include_invalid: bool,
    #[serde(default)]
    include_out_of_bounds: bool,
    #[serde(default)]
    only_qc_processed: bool,
    format: String,
}

// ---

async fn export(
    State((pool, _)): State<AppState>,
    Json(body): Json<ExportBody>,
) -> ApiResult<Response> {
    // ---
    let format = ExportFormat::parse(&body.format)?;

    if body.data_types.is_empty() {
        return Err(ApiError::Validation(
            "at least one data type must be selected".into(),
        ));
    }

    let station = stations::fetch_station(&pool, body.station).await?;

    let time_start = query::parse_timestamp_opt(body.time_start.as_deref())?;
    let time_end = query::parse_timestamp_opt(body.time_end.as_deref())?;

    if let (Some(start), Some(end)) = (time_start, time_end) {
        if start > end {
            return Err(ApiError::Validation(
                "time_start must not be after time_end".into(),
            ));
        }
    }

    let spec = ExportSpec {
        station_id: station.id,
        station_name: station.name,
        data_type_ids: body.data_types,
        time_start,
        time_end,
        policy: ExportPolicy {
            include_invalid: body.include_invalid,
            include_out_of_bounds: body.include_out_of_bounds,
            only_qc_processed: body.only_qc_processed,
        },
    };

    let columns = export::export_header(&pool, &spec).await?;

    tracing::info!(
        "exporting station {} ({} columns, format {:?})",
        spec.station_id,
        columns.len(),
        format
    );

    match format {
        ExportFormat::Csv => Ok(export::csv::respond(pool, spec, columns)),
        ExportFormat::Xml => export::xml::respond(&pool, spec, columns).await,
    }
}
