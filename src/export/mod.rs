//! Report export: long-form readings pivoted into wide-form rows.
//!
//! The backing store hands back one row per (read time, data type); reports
//! want one row per read time with one column per data type. Because the
//! input is fully sorted by `read_time`, the pivot is a single-pass grouping
//! state machine: accumulate cells for the current timestamp, flush a wide
//! row when the timestamp changes, and flush once more when the stream ends
//! so the final group (possibly of size one) is never dropped.
//!
//! Column order always follows the station's link order (`station_order`),
//! never the caller's selection order.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::errors::{ApiError, ApiResult};
use crate::models::{decimal_value, decimal_value_str, Bounds};

pub mod csv;
pub mod xml;

// ---

/// Row-selection policy flags for an export.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportPolicy {
    /// Keep readings marked invalid by QC.
    pub include_invalid: bool,
    /// Place cells whose decimal value falls outside the data type's bounds.
    pub include_out_of_bounds: bool,
    /// Restrict to QC-processed readings.
    pub only_qc_processed: bool,
}

/// Accepted report formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xml,
}

impl ExportFormat {
    /// `json` is a recognized value with no implementation behind it; it is
    /// rejected explicitly rather than silently producing nothing.
    pub fn parse(s: &str) -> ApiResult<Self> {
        match s {
            "csv" => Ok(ExportFormat::Csv),
            "xml" => Ok(ExportFormat::Xml),
            "json" => Err(ApiError::BadFormat(
                "json export is not implemented".to_string(),
            )),
            other => Err(ApiError::BadFormat(other.to_string())),
        }
    }
}

/// Everything an export run needs besides the format.
#[derive(Debug, Clone)]
pub struct ExportSpec {
    pub station_id: i32,
    pub station_name: String,
    pub data_type_ids: Vec<i32>,
    pub time_start: Option<DateTime<Utc>>,
    pub time_end: Option<DateTime<Utc>>,
    pub policy: ExportPolicy,
}

// ---

/// One long-form input to the pivot: the reading's timestamp, the short name
/// of its data type, its rendered decimal value (None when the sensor
/// reported no data) and whether that value is in bounds.
#[derive(Debug, Clone)]
pub struct PivotReading {
    pub read_time: DateTime<Utc>,
    pub short_name: String,
    pub value: Option<String>,
    pub in_bounds: bool,
}

/// One wide output row: a timestamp and one optional cell per header column.
#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub time: DateTime<Utc>,
    pub cells: Vec<Option<String>>,
}

/// Single-pass grouping state machine. `push` returns a completed row
/// whenever the incoming timestamp differs from the accumulating one;
/// `finish` flushes whatever group remains.
pub struct Pivot {
    header: Vec<String>,
    include_out_of_bounds: bool,
    current_time: Option<DateTime<Utc>>,
    pending: Vec<(String, Option<String>, bool)>,
}

impl Pivot {
    pub fn new(header: Vec<String>, include_out_of_bounds: bool) -> Self {
        Pivot {
            header,
            include_out_of_bounds,
            current_time: None,
            pending: Vec::new(),
        }
    }

    /// Feed one long-form reading; returns the previous group's row when
    /// this reading starts a new timestamp group.
    pub fn push(&mut self, r: PivotReading) -> Option<WideRow> {
        // ---
        let mut flushed = None;

        if let Some(current) = self.current_time {
            if current != r.read_time {
                flushed = self.flush();
            }
        }

        if self.current_time.is_none() {
            self.current_time = Some(r.read_time);
        }

        self.pending.push((r.short_name, r.value, r.in_bounds));
        flushed
    }

    /// Flush the final group. Without this, a dataset whose readings all
    /// share one timestamp would produce no rows at all.
    pub fn finish(mut self) -> Option<WideRow> {
        self.flush()
    }

    fn flush(&mut self) -> Option<WideRow> {
        // ---
        let time = self.current_time.take()?;
        let mut cells: Vec<Option<String>> = vec![None; self.header.len()];

        for (name, value, in_bounds) in self.pending.drain(..) {
            if !(self.include_out_of_bounds || in_bounds) {
                continue; // cell stays absent, position preserved
            }
            if let Some(idx) = self.header.iter().position(|h| *h == name) {
                // First occupant wins if the store ever hands back two
                // readings for the same (time, data type).
                if cells[idx].is_none() {
                    cells[idx] = value;
                }
            }
        }

        Some(WideRow { time, cells })
    }
}

// ---

/// Long-form export row as fetched from the store.
#[derive(Debug, sqlx::FromRow)]
pub struct ExportRow {
    pub read_time: DateTime<Utc>,
    pub value: Option<i32>,
    pub decimals: i16,
    pub short_name: String,
    pub bound_lower: f64,
    pub bound_upper: f64,
}

impl ExportRow {
    pub fn into_pivot_reading(self) -> PivotReading {
        let bounds = Bounds {
            lower: self.bound_lower,
            upper: self.bound_upper,
        };
        let in_bounds = bounds.contains(decimal_value(self.value, self.decimals));

        PivotReading {
            read_time: self.read_time,
            short_name: self.short_name,
            value: decimal_value_str(self.value, self.decimals),
            in_bounds,
        }
    }
}

/// Column headers for the spec: the station's links restricted to the
/// selected data types, in `station_order`.
pub async fn export_header(pool: &PgPool, spec: &ExportSpec) -> ApiResult<Vec<String>> {
    // ---
    let names: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT dt.short_name
        FROM station_sensor_links l
        JOIN data_types dt ON dt.id = l.data_type_id
        WHERE l.station_id = $1 AND l.data_type_id = ANY($2)
        ORDER BY l.station_order
        "#,
    )
    .bind(spec.station_id)
    .bind(spec.data_type_ids.clone())
    .fetch_all(pool)
    .await?;

    Ok(names)
}

/// Build the long-form reading query for an export, filters applied in
/// order: invalid, qc, window, data-type selection. Sorted descending by
/// `read_time`; the pivot only needs equal timestamps to be consecutive.
pub fn build_export_query(spec: &ExportSpec) -> QueryBuilder<'static, Postgres> {
    // ---
    let mut qb = QueryBuilder::new(
        "SELECT r.read_time, r.value, s.decimals, dt.short_name, \
                dt.bound_lower, dt.bound_upper \
         FROM readings r \
         JOIN station_sensor_links l ON l.id = r.station_sensor_link_id \
         JOIN data_types dt ON dt.id = l.data_type_id \
         JOIN sensors s ON s.id = r.sensor_id \
         WHERE r.station_id = ",
    );
    qb.push_bind(spec.station_id);

    if !spec.policy.include_invalid {
        qb.push(" AND r.invalid = FALSE");
    }

    if spec.policy.only_qc_processed {
        qb.push(" AND r.qc_processed = TRUE");
    }

    if let Some(start) = spec.time_start {
        qb.push(" AND r.read_time >= ");
        qb.push_bind(start);
    }

    if let Some(end) = spec.time_end {
        qb.push(" AND r.read_time <= ");
        qb.push_bind(end);
    }

    qb.push(" AND l.data_type_id = ANY(");
    qb.push_bind(spec.data_type_ids.clone());
    qb.push(")");

    qb.push(" ORDER BY r.read_time DESC");
    qb
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 6, 23, h, m, 0).unwrap()
    }

    fn reading(t: DateTime<Utc>, name: &str, value: &str, in_bounds: bool) -> PivotReading {
        PivotReading {
            read_time: t,
            short_name: name.to_string(),
            value: Some(value.to_string()),
            in_bounds,
        }
    }

    fn header() -> Vec<String> {
        vec!["atemp".to_string(), "rh".to_string()]
    }

    #[test]
    fn test_pivot_three_timestamps_two_columns() {
        // ---
        let mut pivot = Pivot::new(header(), false);
        let mut rows = Vec::new();

        for (i, t) in [ts(0, 0), ts(0, 15), ts(0, 30)].iter().enumerate() {
            let a = format!("{}.0", i);
            let b = format!("{}.5", i);
            rows.extend(pivot.push(reading(*t, "atemp", &a, true)));
            rows.extend(pivot.push(reading(*t, "rh", &b, true)));
        }
        rows.extend(pivot.finish());

        // Three data rows, values in header-defined column order, and the
        // final timestamp's row present even though nothing came after it.
        assert_eq!(rows.len(), 3);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.cells.len(), 2);
            assert_eq!(row.cells[0].as_deref(), Some(format!("{}.0", i).as_str()));
            assert_eq!(row.cells[1].as_deref(), Some(format!("{}.5", i).as_str()));
        }
    }

    #[test]
    fn test_pivot_flushes_single_timestamp_group() {
        // ---
        let mut pivot = Pivot::new(header(), false);

        assert!(pivot.push(reading(ts(0, 0), "atemp", "21.5", true)).is_none());
        assert!(pivot.push(reading(ts(0, 0), "rh", "55.0", true)).is_none());

        let last = pivot.finish().expect("single-group dataset must flush");
        assert_eq!(last.time, ts(0, 0));
        assert_eq!(last.cells[0].as_deref(), Some("21.5"));
        assert_eq!(last.cells[1].as_deref(), Some("55.0"));
    }

    #[test]
    fn test_pivot_column_order_follows_header_not_input() {
        // ---
        let mut pivot = Pivot::new(header(), false);

        // Input arrives rh first; the row must still be (atemp, rh)
        pivot.push(reading(ts(0, 0), "rh", "55.0", true));
        pivot.push(reading(ts(0, 0), "atemp", "21.5", true));

        let row = pivot.finish().unwrap();
        assert_eq!(row.cells[0].as_deref(), Some("21.5"));
        assert_eq!(row.cells[1].as_deref(), Some("55.0"));
    }

    #[test]
    fn test_out_of_bounds_cell_left_absent() {
        // ---
        let mut pivot = Pivot::new(header(), false);
        pivot.push(reading(ts(0, 0), "atemp", "150.00", false));
        pivot.push(reading(ts(0, 0), "rh", "55.0", true));

        let row = pivot.finish().unwrap();
        assert_eq!(row.cells[0], None);
        assert_eq!(row.cells[1].as_deref(), Some("55.0"));

        // With the flag set the same reading is placed
        let mut pivot = Pivot::new(header(), true);
        pivot.push(reading(ts(0, 0), "atemp", "150.00", false));
        let row = pivot.finish().unwrap();
        assert_eq!(row.cells[0].as_deref(), Some("150.00"));
    }

    #[test]
    fn test_null_value_reading_is_in_bounds_but_empty() {
        // ---
        let row = ExportRow {
            read_time: ts(0, 0),
            value: None,
            decimals: 2,
            short_name: "atemp".to_string(),
            bound_lower: 0.0,
            bound_upper: 100.0,
        };
        let r = row.into_pivot_reading();
        assert!(r.in_bounds);
        assert_eq!(r.value, None);
    }

    #[test]
    fn test_export_row_bounds_and_scaling() {
        // ---
        let row = ExportRow {
            read_time: ts(0, 0),
            value: Some(15000),
            decimals: 2,
            short_name: "atemp".to_string(),
            bound_lower: 0.0,
            bound_upper: 100.0,
        };
        let r = row.into_pivot_reading();
        assert_eq!(r.value.as_deref(), Some("150.00"));
        assert!(!r.in_bounds); // 150.00 outside [0, 100)
    }

    #[test]
    fn test_pivot_ignores_unselected_short_names() {
        // ---
        let mut pivot = Pivot::new(header(), false);
        pivot.push(reading(ts(0, 0), "wspeed", "3.1", true));
        pivot.push(reading(ts(0, 0), "atemp", "21.5", true));

        let row = pivot.finish().unwrap();
        assert_eq!(row.cells[0].as_deref(), Some("21.5"));
        assert_eq!(row.cells[1], None);
    }

    #[test]
    fn test_empty_input_produces_no_rows() {
        // ---
        let pivot = Pivot::new(header(), false);
        assert!(pivot.finish().is_none());
    }

    #[test]
    fn test_format_parsing() {
        // ---
        assert_eq!(ExportFormat::parse("csv").unwrap(), ExportFormat::Csv);
        assert_eq!(ExportFormat::parse("xml").unwrap(), ExportFormat::Xml);

        // Recognized but unimplemented
        assert!(matches!(
            ExportFormat::parse("json"),
            Err(ApiError::BadFormat(_))
        ));
        assert!(matches!(
            ExportFormat::parse("pdf"),
            Err(ApiError::BadFormat(_))
        ));
    }
}
