//! Streaming CSV report renderer.
//!
//! Rows are encoded and sent as the pivot flushes them, so an export over a
//! long time range never materializes in memory and cannot time out a
//! buffering proxy. The row stream runs in a spawned task feeding a bounded
//! channel; when the client disconnects the receiver drops, the next send
//! fails, and the task returns, releasing the backing cursor.

use axum::body::{Body, Bytes};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::{channel::mpsc, SinkExt, TryStreamExt};
use sqlx::PgPool;

use crate::errors::{ApiError, ApiResult};
use crate::export::{build_export_query, ExportRow, ExportSpec, Pivot, WideRow};

// ---

/// Encode one CSV record (with terminator) to bytes.
pub fn encode_record(fields: &[String]) -> ApiResult<Bytes> {
    // ---
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer
        .write_record(fields)
        .map_err(|e| ApiError::Export(e.to_string()))?;

    let buf = writer
        .into_inner()
        .map_err(|e| ApiError::Export(e.to_string()))?;

    Ok(Bytes::from(buf))
}

/// Render a wide row as CSV fields: the timestamp then one field per header
/// column, absent cells as empty fields so positions stay aligned.
pub fn row_fields(row: &WideRow) -> Vec<String> {
    // ---
    let mut fields = Vec::with_capacity(row.cells.len() + 1);
    fields.push(row.time.to_rfc3339());
    for cell in &row.cells {
        fields.push(cell.clone().unwrap_or_default());
    }
    fields
}

/// Stream the CSV report for `spec` as an HTTP response.
pub fn respond(pool: PgPool, spec: ExportSpec, columns: Vec<String>) -> Response {
    // ---
    let (mut tx, rx) = mpsc::channel::<Result<Bytes, ApiError>>(16);

    tokio::spawn(async move {
        let mut pivot = Pivot::new(columns.clone(), spec.policy.include_out_of_bounds);

        let mut head = Vec::with_capacity(columns.len() + 1);
        head.push("time".to_string());
        head.extend(columns);

        if send_encoded(&mut tx, encode_record(&head)).await.is_err() {
            return;
        }

        let mut qb = build_export_query(&spec);
        let mut rows = qb.build_query_as::<ExportRow>().fetch(&pool);

        loop {
            match rows.try_next().await {
                Ok(Some(row)) => {
                    if let Some(wide) = pivot.push(row.into_pivot_reading()) {
                        let line = encode_record(&row_fields(&wide));
                        if send_encoded(&mut tx, line).await.is_err() {
                            return; // client went away
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(ApiError::Database(e))).await;
                    return;
                }
            }
        }

        if let Some(wide) = pivot.finish() {
            let _ = send_encoded(&mut tx, encode_record(&row_fields(&wide))).await;
        }
    });

    (
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"report.csv\"",
            ),
        ],
        Body::from_stream(rx),
    )
        .into_response()
}

async fn send_encoded(
    tx: &mut mpsc::Sender<Result<Bytes, ApiError>>,
    line: ApiResult<Bytes>,
) -> Result<(), ()> {
    // ---
    match line {
        Ok(bytes) => tx.send(Ok(bytes)).await.map_err(|_| ()),
        Err(e) => {
            // Encoding failure aborts the stream; the error reaches the
            // client as a broken body.
            let _ = tx.send(Err(e)).await;
            Err(())
        }
    }
}
