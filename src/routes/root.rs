//! Browsable API root.
//!
//! Returns a map of collection names to paths so the API can be explored
//! from `/` without external documentation.

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

// ---

async fn api_root() -> Json<Value> {
    // ---
    Json(json!({
        "data-types": "/data-types",
        "sensors": "/sensors",
        "stations": "/stations",
        "station-sensor-links": "/links",
        "readings": "/readings",
        "latest-readings": "/readings/latest",
        "messages": "/messages",
        "latest-messages": "/messages/latest",
        "settings": "/settings",
        "export": "/export",
        "invalidations": "/invalidations",
    }))
}

pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/", get(api_root))
}
