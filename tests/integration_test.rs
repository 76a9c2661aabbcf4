//! End-to-end tests against a running server.
//!
//! These talk HTTP to a live instance (with its database) and therefore only
//! run when `TEST_BASE_URL` is set, e.g.
//!
//!   TEST_BASE_URL=http://localhost:8080 cargo test --test integration_test
//!
//! Each test seeds its own station/sensor/data-type fixtures so runs do not
//! interfere with each other.

use anyhow::Result;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

// ---

fn base_url() -> Option<String> {
    std::env::var("TEST_BASE_URL").ok()
}

#[derive(Debug, Deserialize)]
struct Created {
    id: i32,
}

#[derive(Debug, Deserialize)]
struct InvalidationResponse {
    count: u64,
    detail: String,
}

#[derive(Debug, Deserialize)]
struct CompactReading {
    value: Option<i32>,
    invalid: bool,
}

/// Seed a station, sensor, data type and link, returning their ids.
async fn seed_fixture(client: &Client, base: &str, tag: &str) -> Result<(i32, i32, i32, i32)> {
    // ---
    let data_type: Created = client
        .post(format!("{base}/data-types"))
        .json(&json!({
            "name": format!("Air Temperature {tag}"),
            "short_name": format!("temp_{tag}"),
            "unit": "°C",
            "bound_lower": -500,
            "bound_upper": 500,
        }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let sensor: Created = client
        .post(format!("{base}/sensors"))
        .json(&json!({
            "name": format!("thermistor-{tag}"),
            "data_id": format!("TH{tag}"),
            "decimals": 1,
        }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let station: Created = client
        .post(format!("{base}/stations"))
        .json(&json!({
            "name": format!("Test Station {tag}"),
            "goes_id": format!("{tag:0>8}"),
        }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let link: Created = client
        .post(format!("{base}/links"))
        .json(&json!({
            "station_id": station.id,
            "sensor_id": sensor.id,
            "data_type_id": data_type.id,
            "station_order": 0,
        }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok((station.id, sensor.id, data_type.id, link.id))
}

async fn seed_reading(
    client: &Client,
    base: &str,
    station: i32,
    sensor: i32,
    link: i32,
    read_time: chrono::DateTime<Utc>,
    value: i32,
) -> Result<i32> {
    // ---
    let created: Created = client
        .post(format!("{base}/readings"))
        .json(&json!({
            "read_time": read_time.to_rfc3339(),
            "value": value,
            "station_id": station,
            "sensor_id": sensor,
            "station_sensor_link_id": link,
        }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(created.id)
}

// ---

#[tokio::test]
async fn api_root_lists_collections() -> Result<()> {
    // ---
    let Some(base) = base_url() else {
        return Ok(());
    };
    let client = Client::new();

    let map: serde_json::Value = client
        .get(format!("{base}/"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    for key in ["stations", "sensors", "data-types", "readings", "messages"] {
        assert!(map.get(key).is_some(), "root map missing '{key}'");
    }

    Ok(())
}

#[tokio::test]
async fn station_window_query_returns_seeded_readings() -> Result<()> {
    // ---
    let Some(base) = base_url() else {
        return Ok(());
    };
    let client = Client::new();

    let (station, sensor, _data_type, link) = seed_fixture(&client, &base, "win").await?;

    let t0 = Utc::now() - Duration::hours(2);
    for minutes in [0, 15, 30, 45] {
        seed_reading(
            &client,
            &base,
            station,
            sensor,
            link,
            t0 + Duration::minutes(minutes),
            100 + minutes as i32,
        )
        .await?;
    }

    // The default window (last 7 days) covers everything just seeded.
    let rows: Vec<CompactReading> = client
        .get(format!("{base}/stations/{station}/data?compact=true"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(rows.len(), 4);
    let values: Vec<Option<i32>> = rows.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![Some(100), Some(115), Some(130), Some(145)]);

    // A window ending before t0 excludes them all.
    let end = (t0 - Duration::hours(1)).to_rfc3339();
    let rows: Vec<CompactReading> = client
        .get(format!("{base}/stations/{station}/data?compact=true&end={end}"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert!(rows.is_empty());

    Ok(())
}

#[tokio::test]
async fn hourly_interval_downsamples() -> Result<()> {
    // ---
    let Some(base) = base_url() else {
        return Ok(());
    };
    let client = Client::new();

    let (station, sensor, _data_type, link) = seed_fixture(&client, &base, "int").await?;

    // One reading on the hour, three off it.
    let hour = (Utc::now() - Duration::hours(3))
        .date_naive()
        .and_hms_opt(6, 0, 0)
        .and_then(|naive| naive.and_local_timezone(Utc).single())
        .expect("fixed time is valid");
    for minutes in [0, 15, 30, 45] {
        seed_reading(
            &client,
            &base,
            station,
            sensor,
            link,
            hour + Duration::minutes(minutes),
            200 + minutes as i32,
        )
        .await?;
    }

    let start = (hour - Duration::minutes(1)).to_rfc3339();
    let end = (hour + Duration::hours(1)).to_rfc3339();

    let all: Vec<CompactReading> = client
        .get(format!(
            "{base}/readings?compact=true&sensors={sensor}&start={start}&end={end}"
        ))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(all.len(), 4);

    // The repeated-key form selects the same readings as the comma list.
    let repeated: Vec<CompactReading> = client
        .get(format!(
            "{base}/readings?compact=true&sensors[]={sensor}&start={start}&end={end}"
        ))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(repeated.len(), 4);

    let hourly: Vec<CompactReading> = client
        .get(format!(
            "{base}/readings?compact=true&sensors={sensor}&start={start}&end={end}&interval=4"
        ))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(hourly.len(), 1, "interval=4 should keep only :00 readings");

    let half_hourly: Vec<CompactReading> = client
        .get(format!(
            "{base}/readings?compact=true&sensors={sensor}&start={start}&end={end}&interval=2"
        ))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(half_hourly.len(), 2);

    Ok(())
}

#[tokio::test]
async fn invalidation_is_idempotent() -> Result<()> {
    // ---
    let Some(base) = base_url() else {
        return Ok(());
    };
    let client = Client::new();

    let (station, sensor, data_type, link) = seed_fixture(&client, &base, "inv").await?;

    let t0 = Utc::now() - Duration::hours(1);
    for minutes in [0, 10, 20] {
        seed_reading(
            &client,
            &base,
            station,
            sensor,
            link,
            t0 + Duration::minutes(minutes),
            300 + minutes as i32,
        )
        .await?;
    }

    let body = json!({
        "station": station,
        "data_type": data_type,
        "time_start": (t0 - Duration::minutes(1)).to_rfc3339(),
        "time_end": (t0 + Duration::hours(1)).to_rfc3339(),
    });

    let first: InvalidationResponse = client
        .post(format!("{base}/invalidations"))
        .json(&body)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(first.count, 3);
    assert!(first.detail.contains("Invalidated 3"));

    // Replaying the same request matches nothing: the readings are already
    // invalid and the filter only touches active rows.
    let second: InvalidationResponse = client
        .post(format!("{base}/invalidations"))
        .json(&body)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(second.count, 0);

    let rows: Vec<CompactReading> = client
        .get(format!("{base}/stations/{station}/data?compact=true"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert!(rows.iter().all(|r| r.invalid));

    Ok(())
}

#[tokio::test]
async fn latest_window_anchors_on_message_arrival() -> Result<()> {
    // ---
    let Some(base) = base_url() else {
        return Ok(());
    };
    let client = Client::new();

    let (station, sensor, _data_type, link) = seed_fixture(&client, &base, "lat").await?;

    let arrival = Utc::now() - Duration::minutes(5);
    client
        .post(format!("{base}/messages"))
        .json(&json!({
            "goes_id": "0000Alat",
            "goes_channel": 19,
            "arrival_time": arrival.to_rfc3339(),
            "failure_code": "G",
            "signal_strength": 38,
            "frequency_offset": "+0",
            "data_source": "UB",
            "recorded_message_length": 64,
            "values": [1, 2, null, 4],
            "message_text": "test envelope",
            "station_id": station,
        }))
        .send()
        .await?
        .error_for_status()?;

    // One reading inside the anchored window, one well before it.
    let inside = seed_reading(&client, &base, station, sensor, link, arrival, 42).await?;
    seed_reading(
        &client,
        &base,
        station,
        sensor,
        link,
        arrival - Duration::hours(3),
        7,
    )
    .await?;

    let rows: Vec<serde_json::Value> = client
        .get(format!("{base}/stations/{station}/data/latest"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let ids: Vec<i64> = rows
        .iter()
        .filter_map(|r| r.get("id").and_then(|v| v.as_i64()))
        .collect();
    assert!(ids.contains(&(inside as i64)));
    assert_eq!(ids.len(), 1, "only readings within anchor-1h should appear");

    Ok(())
}

#[tokio::test]
async fn csv_export_pivots_by_timestamp() -> Result<()> {
    // ---
    let Some(base) = base_url() else {
        return Ok(());
    };
    let client = Client::new();

    let (station, sensor, data_type, link) = seed_fixture(&client, &base, "csv").await?;

    let t0 = Utc::now() - Duration::hours(1);
    // Raw value 215 with one decimal renders as 21.5.
    seed_reading(&client, &base, station, sensor, link, t0, 215).await?;

    let body_text = client
        .post(format!("{base}/export"))
        .json(&json!({
            "station": station,
            "data_types": [data_type],
            "format": "csv",
        }))
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let mut lines = body_text.lines();
    let header = lines.next().unwrap_or_default();
    assert!(header.starts_with("time,"), "unexpected header: {header}");
    assert!(header.contains("temp_csv"));

    let row = lines.next().unwrap_or_default();
    assert!(row.contains("21.5"), "unexpected data row: {row}");

    Ok(())
}

#[tokio::test]
async fn unknown_export_format_is_rejected() -> Result<()> {
    // ---
    let Some(base) = base_url() else {
        return Ok(());
    };
    let client = Client::new();

    let response = client
        .post(format!("{base}/export"))
        .json(&json!({
            "station": 1,
            "data_types": [1],
            "format": "json",
        }))
        .send()
        .await?;

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let body: serde_json::Value = response.json().await?;
    assert_eq!(
        body.pointer("/error/code").and_then(|v| v.as_str()),
        Some("BAD_FORMAT")
    );

    Ok(())
}
