//! Satellite message ingest and queries.
//!
//! Messages are the raw DCP envelopes readings are decoded from; the API
//! stores them verbatim and uses their `arrival_time` as the anchor for
//! latest-reading windows. They are created by ingest and immutable apart
//! from administrative correction via PUT.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::errors::{ApiError, ApiResult};
use crate::models::Message;
use crate::query::{self, TimeWindow};
use crate::routes::{flag, AppState};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/messages", get(list).post(create))
        .route("/messages/latest", get(latest))
        .route("/messages/{id}", get(detail).put(update).delete(destroy))
}

#[derive(Debug, Deserialize)]
struct MessagesParams {
    start: Option<String>,
    end: Option<String>,
    start_exclusive: Option<String>,
    goes_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    goes_id: String,
    goes_channel: i16,
    #[serde(default = "default_spacecraft")]
    goes_spacecraft: String,
    arrival_time: DateTime<Utc>,
    failure_code: String,
    signal_strength: i16,
    frequency_offset: String,
    #[serde(default = "default_normal")]
    modulation_index: String,
    #[serde(default = "default_normal")]
    data_quality: String,
    data_source: String,
    recorded_message_length: i16,
    values: Vec<Option<i32>>,
    message_text: String,
    station_id: Option<i32>,
}

fn default_spacecraft() -> String {
    "E".to_string()
}

fn default_normal() -> String {
    "N".to_string()
}

impl MessagePayload {
    fn validate(&self) -> ApiResult<()> {
        // ---
        if self.goes_id.is_empty() || self.goes_id.len() > 8 {
            return Err(ApiError::Validation("goes_id must be 1-8 characters".into()));
        }
        if !matches!(self.goes_spacecraft.as_str(), "E" | "W") {
            return Err(ApiError::Validation(
                "goes_spacecraft must be 'E' or 'W'".into(),
            ));
        }
        if !matches!(self.modulation_index.as_str(), "N" | "L" | "H") {
            return Err(ApiError::Validation(
                "modulation_index must be 'N', 'L' or 'H'".into(),
            ));
        }
        if !matches!(self.data_quality.as_str(), "N" | "F" | "P") {
            return Err(ApiError::Validation(
                "data_quality must be 'N', 'F' or 'P'".into(),
            ));
        }
        if self.data_source.len() != 2 {
            return Err(ApiError::Validation(
                "data_source must be a 2-character relay code".into(),
            ));
        }
        Ok(())
    }
}

// ---

async fn list(
    State((pool, _)): State<AppState>,
    Query(params): Query<MessagesParams>,
) -> ApiResult<Json<Vec<Message>>> {
    // ---
    let start = query::parse_timestamp_opt(params.start.as_deref())?;
    let end = query::parse_timestamp_opt(params.end.as_deref())?;
    let window = TimeWindow::resolve(start, end, flag(params.start_exclusive.as_deref()), Utc::now());

    let mut qb = sqlx::QueryBuilder::<sqlx::Postgres>::new(
        "SELECT * FROM messages WHERE arrival_time ",
    );
    qb.push(if window.start_exclusive { "> " } else { ">= " });
    qb.push_bind(window.start);

    if let Some(end) = window.end {
        qb.push(" AND arrival_time <= ");
        qb.push_bind(end);
    }

    if let Some(goes_id) = params.goes_id {
        qb.push(" AND goes_id = ");
        qb.push_bind(goes_id);
    }

    qb.push(" ORDER BY arrival_time");

    let rows = qb.build_query_as::<Message>().fetch_all(&pool).await?;
    Ok(Json(rows))
}

/// Messages that arrived within one hour of the most recent arrival.
async fn latest(State((pool, _)): State<AppState>) -> ApiResult<Json<Vec<Message>>> {
    // ---
    let anchor: Option<DateTime<Utc>> =
        sqlx::query_scalar("SELECT MAX(arrival_time) FROM messages")
            .fetch_one(&pool)
            .await?;

    let anchor = anchor.ok_or_else(|| ApiError::not_found("message"))?;

    let rows = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages WHERE arrival_time >= $1 ORDER BY arrival_time",
    )
    .bind(anchor - Duration::hours(1))
    .fetch_all(&pool)
    .await?;

    Ok(Json(rows))
}

async fn create(
    State((pool, _)): State<AppState>,
    Json(payload): Json<MessagePayload>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    // ---
    payload.validate()?;

    let row = insert_or_update(&pool, None, &payload).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn detail(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<Message>> {
    // ---
    let row = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("message {id}")))?;

    Ok(Json(row))
}

/// Administrative correction of an ingested message.
async fn update(
    State((pool, _)): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<MessagePayload>,
) -> ApiResult<Json<Message>> {
    // ---
    payload.validate()?;
    let row = insert_or_update(&pool, Some(id), &payload).await?;
    Ok(Json(row))
}

async fn destroy(State((pool, _)): State<AppState>, Path(id): Path<i32>) -> ApiResult<StatusCode> {
    // ---
    let result = sqlx::query("DELETE FROM messages WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found(format!("message {id}")));
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn insert_or_update(
    pool: &sqlx::PgPool,
    id: Option<i32>,
    payload: &MessagePayload,
) -> ApiResult<Message> {
    // ---
    let sql = match id {
        None => {
            r#"
            INSERT INTO messages
                (goes_id, goes_channel, goes_spacecraft, arrival_time, failure_code,
                 signal_strength, frequency_offset, modulation_index, data_quality,
                 data_source, recorded_message_length, "values", message_text, station_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#
        }
        Some(_) => {
            r#"
            UPDATE messages
            SET goes_id = $1, goes_channel = $2, goes_spacecraft = $3, arrival_time = $4,
                failure_code = $5, signal_strength = $6, frequency_offset = $7,
                modulation_index = $8, data_quality = $9, data_source = $10,
                recorded_message_length = $11, "values" = $12, message_text = $13,
                station_id = $14, updated = NOW()
            WHERE id = $15
            RETURNING *
            "#
        }
    };

    let mut q = sqlx::query_as::<_, Message>(sql)
        .bind(&payload.goes_id)
        .bind(payload.goes_channel)
        .bind(&payload.goes_spacecraft)
        .bind(payload.arrival_time)
        .bind(&payload.failure_code)
        .bind(payload.signal_strength)
        .bind(&payload.frequency_offset)
        .bind(&payload.modulation_index)
        .bind(&payload.data_quality)
        .bind(&payload.data_source)
        .bind(payload.recorded_message_length)
        .bind(&payload.values)
        .bind(&payload.message_text)
        .bind(payload.station_id);

    if let Some(id) = id {
        q = q.bind(id);
    }

    let row = q.fetch_optional(pool).await?;
    row.ok_or_else(|| match id {
        Some(id) => ApiError::not_found(format!("message {id}")),
        None => ApiError::Validation("message insert returned no row".into()),
    })
}
