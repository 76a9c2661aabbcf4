//! Reading query engine: time windows, interval down-sampling, projections.
//!
//! Turns a station/sensor/time-range/interval request into an ordered
//! (ascending `read_time`) set of readings. Down-sampling is a timestamp
//! predicate over existing rows, never an aggregation: interval code 2 keeps
//! readings on the hour and half hour, 4 keeps those on the hour, 96 keeps
//! exact-midnight readings. The predicate exists both as a pure function
//! (unit tested) and as the SQL filter it generates, so the two cannot
//! drift apart silently.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::errors::{ApiError, ApiResult};
use crate::models::{CompactReading, Reading, StationCompactReading};

// ---

/// Columns selected for the compact projection of global reading queries.
pub const COMPACT_COLUMNS: &str = "id, read_time, value, invalid, sensor_id, station_id";

/// Compact columns for station-scoped queries (station implied by the path).
pub const STATION_COMPACT_COLUMNS: &str = "id, read_time, value, invalid, sensor_id";

const FULL_COLUMNS: &str = "id, created, updated, read_time, data_source, value, qc_processed, \
                            invalid, sensor_id, station_id, station_sensor_link_id, message_id";

// ---

/// Sampling interval selector. Codes follow the historical wire values:
/// readings arrive four times an hour, so code 2 halves the stream, 4 keeps
/// one an hour, 96 one a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalCode {
    /// Code 1 (default): every reading.
    Every,
    /// Code 2: minute component 00 or 30.
    HalfHourly,
    /// Code 4: minute component 00.
    Hourly,
    /// Code 96: exact midnight (hour 00, minute 00).
    Daily,
}

impl IntervalCode {
    /// Lenient parse of the `interval` query parameter. Unknown or
    /// unparseable values fall back to `Every`, matching the historical
    /// behavior of the endpoint.
    pub fn from_param(param: Option<&str>) -> Self {
        match param.and_then(|p| p.parse::<u32>().ok()) {
            Some(2) => IntervalCode::HalfHourly,
            Some(4) => IntervalCode::Hourly,
            Some(96) => IntervalCode::Daily,
            _ => IntervalCode::Every,
        }
    }

    /// Pure form of the down-sampling predicate.
    pub fn keeps(&self, t: DateTime<Utc>) -> bool {
        match self {
            IntervalCode::Every => true,
            IntervalCode::HalfHourly => t.minute() == 0 || t.minute() == 30,
            IntervalCode::Hourly => t.minute() == 0,
            IntervalCode::Daily => t.hour() == 0 && t.minute() == 0,
        }
    }

    /// Append the SQL form of the predicate to a WHERE clause. The column is
    /// converted to UTC explicitly: `date_part` on a bare timestamptz uses
    /// the session TimeZone, which is not ours to assume.
    fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            IntervalCode::Every => {}
            IntervalCode::HalfHourly => {
                qb.push(" AND date_part('minute', read_time AT TIME ZONE 'UTC') IN (0, 30)");
            }
            IntervalCode::Hourly => {
                qb.push(" AND date_part('minute', read_time AT TIME ZONE 'UTC') = 0");
            }
            IntervalCode::Daily => {
                qb.push(
                    " AND date_part('hour', read_time AT TIME ZONE 'UTC') = 0 \
                     AND date_part('minute', read_time AT TIME ZONE 'UTC') = 0",
                );
            }
        }
    }
}

// ---

/// Effective time window of a reading query. The start bound is `>=` unless
/// `start_exclusive`; the end bound, when present, is always `<=`.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub start_exclusive: bool,
}

impl TimeWindow {
    /// Resolve explicit bounds against the defaults: a week back from `now`
    /// for the start, `now` for the end.
    pub fn resolve(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        start_exclusive: bool,
        now: DateTime<Utc>,
    ) -> Self {
        TimeWindow {
            start: start.unwrap_or(now - Duration::days(7)),
            end: Some(end.unwrap_or(now)),
            start_exclusive,
        }
    }

    /// Open-ended window used by latest-reading queries.
    pub fn since(start: DateTime<Utc>) -> Self {
        TimeWindow {
            start,
            end: None,
            start_exclusive: false,
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        let after_start = if self.start_exclusive {
            t > self.start
        } else {
            t >= self.start
        };
        after_start && self.end.map_or(true, |end| t <= end)
    }
}

// ---

/// Scope plus window plus sampling for one reading query.
#[derive(Debug, Clone)]
pub struct ReadingQuery {
    pub station: Option<i32>,
    pub sensor: Option<i32>,
    /// Non-empty restricts to this sensor id set.
    pub sensors: Vec<i32>,
    /// Drop readings whose station reference was nulled by deletion.
    pub require_station: bool,
    pub window: TimeWindow,
    pub interval: IntervalCode,
}

impl ReadingQuery {
    pub fn for_window(window: TimeWindow) -> Self {
        ReadingQuery {
            station: None,
            sensor: None,
            sensors: Vec::new(),
            require_station: false,
            window,
            interval: IntervalCode::Every,
        }
    }
}

fn build_readings_query(q: &ReadingQuery, columns: &str) -> QueryBuilder<'static, Postgres> {
    // ---
    let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
    qb.push(columns);
    qb.push(" FROM readings WHERE read_time ");
    qb.push(if q.window.start_exclusive { "> " } else { ">= " });
    qb.push_bind(q.window.start);

    if let Some(end) = q.window.end {
        qb.push(" AND read_time <= ");
        qb.push_bind(end);
    }

    if let Some(station) = q.station {
        qb.push(" AND station_id = ");
        qb.push_bind(station);
    }

    if q.require_station {
        qb.push(" AND station_id IS NOT NULL");
    }

    if let Some(sensor) = q.sensor {
        qb.push(" AND sensor_id = ");
        qb.push_bind(sensor);
    }

    if !q.sensors.is_empty() {
        qb.push(" AND sensor_id = ANY(");
        qb.push_bind(q.sensors.clone());
        qb.push(")");
    }

    q.interval.push_sql(&mut qb);

    qb.push(" ORDER BY read_time");
    qb
}

async fn fetch_rows<T>(pool: &PgPool, q: &ReadingQuery, columns: &str) -> ApiResult<Vec<T>>
where
    T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
{
    // ---
    let mut qb = build_readings_query(q, columns);
    let rows = qb.build_query_as::<T>().fetch_all(pool).await?;
    Ok(rows)
}

/// Fetch readings with all columns.
pub async fn fetch_full(pool: &PgPool, q: &ReadingQuery) -> ApiResult<Vec<Reading>> {
    fetch_rows(pool, q, FULL_COLUMNS).await
}

/// Fetch readings in the compact projection (station column included).
pub async fn fetch_compact(pool: &PgPool, q: &ReadingQuery) -> ApiResult<Vec<CompactReading>> {
    fetch_rows(pool, q, COMPACT_COLUMNS).await
}

/// Fetch readings in the station-scoped compact projection.
pub async fn fetch_station_compact(
    pool: &PgPool,
    q: &ReadingQuery,
) -> ApiResult<Vec<StationCompactReading>> {
    fetch_rows(pool, q, STATION_COMPACT_COLUMNS).await
}

// ---

/// Resolve the start of the "latest" window for a scope: the maximum message
/// `arrival_time` (for one station, or globally) minus one hour.
///
/// Fails with NotFound when no message exists for the scope, since there is
/// nothing to anchor on.
pub async fn latest_window_start(
    pool: &PgPool,
    station: Option<i32>,
) -> ApiResult<DateTime<Utc>> {
    // ---
    let anchor: Option<DateTime<Utc>> = match station {
        Some(id) => {
            sqlx::query_scalar("SELECT MAX(arrival_time) FROM messages WHERE station_id = $1")
                .bind(id)
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT MAX(arrival_time) FROM messages")
                .fetch_one(pool)
                .await?
        }
    };

    let anchor = anchor.ok_or_else(|| match station {
        Some(id) => ApiError::not_found(format!("message for station {id}")),
        None => ApiError::not_found("message"),
    })?;

    Ok(anchor - Duration::hours(1))
}

// ---

/// Parse a timestamp query parameter. RFC 3339 is preferred; a handful of
/// naive formats (assumed UTC) are accepted for hand-written requests.
pub fn parse_timestamp(s: &str) -> ApiResult<DateTime<Utc>> {
    // ---
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }

    Err(ApiError::Validation(format!("unparseable timestamp '{s}'")))
}

/// Parse an optional timestamp parameter, passing None through.
pub fn parse_timestamp_opt(s: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
    s.map(parse_timestamp).transpose()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_interval_code_parsing() {
        // ---
        assert_eq!(IntervalCode::from_param(None), IntervalCode::Every);
        assert_eq!(IntervalCode::from_param(Some("1")), IntervalCode::Every);
        assert_eq!(IntervalCode::from_param(Some("2")), IntervalCode::HalfHourly);
        assert_eq!(IntervalCode::from_param(Some("4")), IntervalCode::Hourly);
        assert_eq!(IntervalCode::from_param(Some("96")), IntervalCode::Daily);

        // Unknown or garbage values fall back to every-reading
        assert_eq!(IntervalCode::from_param(Some("3")), IntervalCode::Every);
        assert_eq!(IntervalCode::from_param(Some("abc")), IntervalCode::Every);
    }

    #[test]
    fn test_down_sampling_is_a_subset_predicate() {
        // ---
        // One day of quarter-hourly readings
        let mut times = Vec::new();
        for h in 0..24 {
            for m in [0, 15, 30, 45] {
                times.push(ts(2017, 6, 23, h, m));
            }
        }

        for code in [
            IntervalCode::HalfHourly,
            IntervalCode::Hourly,
            IntervalCode::Daily,
        ] {
            let kept: Vec<_> = times.iter().copied().filter(|t| code.keeps(*t)).collect();

            // Every kept element is in the full set with the right components
            for t in &kept {
                assert!(times.contains(t));
                match code {
                    IntervalCode::HalfHourly => assert!(t.minute() == 0 || t.minute() == 30),
                    IntervalCode::Hourly => assert_eq!(t.minute(), 0),
                    IntervalCode::Daily => {
                        assert_eq!(t.hour(), 0);
                        assert_eq!(t.minute(), 0);
                    }
                    IntervalCode::Every => unreachable!(),
                }
            }

            assert!(kept.len() < times.len());
        }

        // And the expected counts for a quarter-hourly day
        let count = |c: IntervalCode| times.iter().filter(|t| c.keeps(**t)).count();
        assert_eq!(count(IntervalCode::Every), 96);
        assert_eq!(count(IntervalCode::HalfHourly), 48);
        assert_eq!(count(IntervalCode::Hourly), 24);
        assert_eq!(count(IntervalCode::Daily), 1);
    }

    #[test]
    fn test_interval_sql_pins_components_to_utc() {
        // ---
        // The SQL predicate must extract hour/minute in UTC regardless of
        // the server's session TimeZone, or it diverges from keeps().
        let mut q = ReadingQuery::for_window(TimeWindow::since(ts(2017, 6, 1, 0, 0)));

        q.interval = IntervalCode::HalfHourly;
        let sql = build_readings_query(&q, COMPACT_COLUMNS).into_sql();
        assert!(sql.contains("date_part('minute', read_time AT TIME ZONE 'UTC') IN (0, 30)"));

        q.interval = IntervalCode::Hourly;
        let sql = build_readings_query(&q, COMPACT_COLUMNS).into_sql();
        assert!(sql.contains("date_part('minute', read_time AT TIME ZONE 'UTC') = 0"));

        q.interval = IntervalCode::Daily;
        let sql = build_readings_query(&q, COMPACT_COLUMNS).into_sql();
        assert!(sql.contains("date_part('hour', read_time AT TIME ZONE 'UTC') = 0"));
        assert!(sql.contains("date_part('minute', read_time AT TIME ZONE 'UTC') = 0"));
        assert!(!sql.contains("date_part('minute', read_time)"));

        q.interval = IntervalCode::Every;
        let sql = build_readings_query(&q, COMPACT_COLUMNS).into_sql();
        assert!(!sql.contains("date_part"));
    }

    #[test]
    fn test_require_station_filters_orphaned_readings() {
        // ---
        let mut q = ReadingQuery::for_window(TimeWindow::since(ts(2017, 6, 1, 0, 0)));
        let sql = build_readings_query(&q, COMPACT_COLUMNS).into_sql();
        assert!(!sql.contains("station_id IS NOT NULL"));

        q.require_station = true;
        let sql = build_readings_query(&q, COMPACT_COLUMNS).into_sql();
        assert!(sql.contains("AND station_id IS NOT NULL"));
    }

    #[test]
    fn test_default_window_is_last_seven_days() {
        // ---
        let now = ts(2017, 6, 23, 12, 0);
        let w = TimeWindow::resolve(None, None, false, now);

        assert_eq!(w.start, now - Duration::days(7));
        assert_eq!(w.end, Some(now));

        assert!(w.contains(now));
        assert!(w.contains(now - Duration::days(7)));
        assert!(!w.contains(now - Duration::days(7) - Duration::seconds(1)));
        assert!(!w.contains(now + Duration::seconds(1)));
    }

    #[test]
    fn test_start_exclusive_flips_lower_bound() {
        // ---
        let start = ts(2017, 6, 1, 0, 0);
        let end = ts(2017, 6, 2, 0, 0);

        let inclusive = TimeWindow::resolve(Some(start), Some(end), false, end);
        let exclusive = TimeWindow::resolve(Some(start), Some(end), true, end);

        assert!(inclusive.contains(start));
        assert!(!exclusive.contains(start));
        // End bound is always inclusive
        assert!(inclusive.contains(end));
        assert!(exclusive.contains(end));
    }

    #[test]
    fn test_open_ended_window() {
        // ---
        let start = ts(2017, 6, 1, 0, 0);
        let w = TimeWindow::since(start);

        assert!(w.contains(start));
        assert!(w.contains(start + Duration::days(365)));
        assert!(!w.contains(start - Duration::seconds(1)));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        // ---
        let expect = ts(2017, 6, 23, 2, 36);

        assert_eq!(parse_timestamp("2017-06-23T02:36:00Z").unwrap(), expect);
        assert_eq!(parse_timestamp("2017-06-23T02:36:00+00:00").unwrap(), expect);
        assert_eq!(parse_timestamp("2017-06-23T02:36:00").unwrap(), expect);
        assert_eq!(parse_timestamp("2017-06-23 02:36:00").unwrap(), expect);
        assert_eq!(parse_timestamp("2017-06-23 02:36").unwrap(), expect);
        assert_eq!(
            parse_timestamp("2017-06-23").unwrap(),
            ts(2017, 6, 23, 0, 0)
        );

        // Offsets are normalized to UTC
        assert_eq!(
            parse_timestamp("2017-06-22T22:36:00-04:00").unwrap(),
            expect
        );

        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_timestamp("").is_err());
    }
}
