//! XML report renderer.
//!
//! Builds a `<report>` element tree: one `<reading_set time="…">` per
//! timestamp, one child element per placed data-type cell, named by the data
//! type's short name with the decimal value string as text. XML reports are
//! built in memory (they are bounded by the same filters as CSV but serve
//! smaller, structured consumers).

use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use sqlx::PgPool;

use crate::errors::{ApiError, ApiResult};
use crate::export::{build_export_query, ExportRow, ExportSpec, Pivot, WideRow};

// ---

/// Serialize the report tree. Short names are assumed to be valid XML
/// element names (enforced at data-type creation).
pub fn render(
    station_name: &str,
    generated: DateTime<Utc>,
    columns: &[String],
    rows: &[WideRow],
) -> ApiResult<Vec<u8>> {
    // ---
    let mut writer = Writer::new(Vec::new());
    let xml = |e: quick_xml::Error| ApiError::Export(e.to_string());

    let mut root = BytesStart::new("report");
    root.push_attribute(("station", station_name));
    root.push_attribute(("generation_time", generated.to_rfc3339().as_str()));
    writer.write_event(Event::Start(root)).map_err(xml)?;

    for row in rows {
        let mut set = BytesStart::new("reading_set");
        set.push_attribute(("time", row.time.to_rfc3339().as_str()));
        writer.write_event(Event::Start(set)).map_err(xml)?;

        for (name, cell) in columns.iter().zip(&row.cells) {
            if let Some(value) = cell {
                writer
                    .write_event(Event::Start(BytesStart::new(name.as_str())))
                    .map_err(xml)?;
                writer
                    .write_event(Event::Text(BytesText::new(value)))
                    .map_err(xml)?;
                writer
                    .write_event(Event::End(BytesEnd::new(name.as_str())))
                    .map_err(xml)?;
            }
        }

        writer
            .write_event(Event::End(BytesEnd::new("reading_set")))
            .map_err(xml)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("report")))
        .map_err(xml)?;

    Ok(writer.into_inner())
}

/// Run the export query, pivot the result set and respond with the XML
/// document.
pub async fn respond(
    pool: &PgPool,
    spec: ExportSpec,
    columns: Vec<String>,
) -> ApiResult<Response> {
    // ---
    let mut qb = build_export_query(&spec);
    let long_rows: Vec<ExportRow> = qb.build_query_as().fetch_all(pool).await?;

    let mut pivot = Pivot::new(columns.clone(), spec.policy.include_out_of_bounds);
    let mut rows = Vec::new();
    for row in long_rows {
        rows.extend(pivot.push(row.into_pivot_reading()));
    }
    rows.extend(pivot.finish());

    let body = render(&spec.station_name, Utc::now(), &columns, &rows)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/xml"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"report.xml\"",
            ),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_render_groups_by_timestamp() {
        // ---
        let generated = Utc.with_ymd_and_hms(2017, 6, 23, 12, 0, 0).unwrap();
        let columns = vec!["atemp".to_string(), "rh".to_string()];
        let rows = vec![
            WideRow {
                time: Utc.with_ymd_and_hms(2017, 6, 23, 0, 0, 0).unwrap(),
                cells: vec![Some("21.50".to_string()), Some("55.0".to_string())],
            },
            WideRow {
                time: Utc.with_ymd_and_hms(2017, 6, 23, 0, 15, 0).unwrap(),
                cells: vec![None, Some("56.0".to_string())],
            },
        ];

        let bytes = render("Elbow Lake", generated, &columns, &rows).unwrap();
        let doc = String::from_utf8(bytes).unwrap();

        assert_eq!(
            doc,
            "<report station=\"Elbow Lake\" generation_time=\"2017-06-23T12:00:00+00:00\">\
             <reading_set time=\"2017-06-23T00:00:00+00:00\">\
             <atemp>21.50</atemp><rh>55.0</rh></reading_set>\
             <reading_set time=\"2017-06-23T00:15:00+00:00\">\
             <rh>56.0</rh></reading_set>\
             </report>"
        );
    }

    #[test]
    fn test_render_empty_report() {
        // ---
        let generated = Utc.with_ymd_and_hms(2017, 6, 23, 12, 0, 0).unwrap();
        let bytes = render("Hill Island", generated, &[], &[]).unwrap();
        let doc = String::from_utf8(bytes).unwrap();

        assert!(doc.starts_with("<report station=\"Hill Island\""));
        assert!(doc.ends_with("</report>"));
        assert!(!doc.contains("reading_set"));
    }
}
