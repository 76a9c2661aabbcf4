//! Quality-control invalidation: idempotent bulk state transition.
//!
//! A QC operator picks a station, a data type and a time window; every
//! matching reading that is not already invalid becomes
//! `invalid = TRUE, qc_processed = TRUE` in one UPDATE statement. Already
//! invalid readings are excluded from the match, so re-running an overlapping
//! invalidation writes nothing and reports a count of zero. Scope resolution
//! happens before the update so a missing or ambiguous link never leaves a
//! partial write.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::errors::{ApiError, ApiResult};
use crate::models::StationSensorLink;

// ---

/// Resolve a (station, data type) pair to its single station-sensor link.
///
/// Zero matches is NotFound; more than one is a configuration fault in the
/// link table and fails closed as AmbiguousLink rather than picking one.
pub async fn resolve_link(
    pool: &PgPool,
    station_id: i32,
    data_type_id: i32,
) -> ApiResult<StationSensorLink> {
    // ---
    let mut links: Vec<StationSensorLink> = sqlx::query_as(
        r#"
        SELECT id, created, updated, station_order, read_frequency,
               station_id, sensor_id, data_type_id
        FROM station_sensor_links
        WHERE station_id = $1 AND data_type_id = $2
        "#,
    )
    .bind(station_id)
    .bind(data_type_id)
    .fetch_all(pool)
    .await?;

    match links.len() {
        0 => Err(ApiError::not_found(format!(
            "station-sensor link for station {station_id} and data type {data_type_id}"
        ))),
        1 => Ok(links.remove(0)),
        n => Err(ApiError::AmbiguousLink(format!(
            "{n} links match station {station_id} and data type {data_type_id}"
        ))),
    }
}

/// Mark every active reading for the link in `[time_start, time_end]` as
/// invalid and QC-processed, returning how many rows changed.
///
/// The whole transition is a single UPDATE, so concurrent readers never see
/// a partially-invalidated window, and the count is exactly what was
/// written (not a separate pre-count that could race).
pub async fn invalidate_range(
    pool: &PgPool,
    station_id: i32,
    data_type_id: i32,
    time_start: DateTime<Utc>,
    time_end: DateTime<Utc>,
) -> ApiResult<u64> {
    // ---
    let link = resolve_link(pool, station_id, data_type_id).await?;

    let result = sqlx::query(
        r#"
        UPDATE readings
        SET invalid = TRUE, qc_processed = TRUE, updated = NOW()
        WHERE station_id = $1
          AND station_sensor_link_id = $2
          AND read_time >= $3
          AND read_time <= $4
          AND invalid = FALSE
        "#,
    )
    .bind(station_id)
    .bind(link.id)
    .bind(time_start)
    .bind(time_end)
    .execute(pool)
    .await?;

    let count = result.rows_affected();

    if count > 0 {
        tracing::info!(
            "invalidated {} readings for station {} / data type {} on [{}, {}]",
            count,
            station_id,
            data_type_id,
            time_start,
            time_end
        );
    } else {
        tracing::info!(
            "no active readings to invalidate for station {} / data type {} on [{}, {}]",
            station_id,
            data_type_id,
            time_start,
            time_end
        );
    }

    Ok(count)
}
