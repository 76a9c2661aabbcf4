//! Entity row types and the pure value-model helpers.
//!
//! Readings store scaled integers; the true decimal value is
//! `value / 10^decimals` where `decimals` comes from the sensor that took
//! the reading. Bounds checking against a data type's `[lower, upper)`
//! range lives here too, so the export layer and tests share one
//! implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Reading came from a GOES satellite message.
pub const SOURCE_GOES: &str = "G";
/// Reading came from a station device log.
pub const SOURCE_DEVICE_LOG: &str = "L";

/// Accepted physical units for data types. `unit` is nullable; when present
/// it must be one of these.
pub const UNITS: &[&str] = &[
    "°C", "°F", "K", // temperature
    "km", "m", "cm", "mm", // distance / depth
    "°", "rad", // direction
    "m/s", "km/h", // speed
    "kPa", "hPa", "Pa", "bar", "mbar", // pressure
    "W/m^2", // irradiance
    "V", "A", "Ω", "J", "W", // electricity
    "%",
];

// ---

/// Valid-value range for a data type, lower inclusive, upper exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Default for Bounds {
    /// Full signed-32-bit range, used when a data type leaves its bounds
    /// unspecified.
    fn default() -> Self {
        Bounds {
            lower: -(2f64.powi(31)),
            upper: 2f64.powi(31),
        }
    }
}

impl Bounds {
    /// A null value is vacuously in bounds; callers decide separately how to
    /// treat "no data".
    pub fn contains(&self, value: Option<f64>) -> bool {
        match value {
            None => true,
            Some(v) => self.lower <= v && v < self.upper,
        }
    }
}

/// Convert a scaled integer reading to its decimal value.
pub fn decimal_value(value: Option<i32>, decimals: i16) -> Option<f64> {
    value.map(|v| f64::from(v) / 10f64.powi(i32::from(decimals)))
}

/// Format the decimal value with exactly `decimals` fractional digits, e.g.
/// raw `12345` at 2 decimals renders as `"123.45"`.
pub fn decimal_value_str(value: Option<i32>, decimals: i16) -> Option<String> {
    decimal_value(value, decimals).map(|v| format!("{:.*}", decimals.max(0) as usize, v))
}

// ---

/// A reading's data type; multiple sensors may share one (e.g. temperature).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DataType {
    pub id: i32,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub name: String,
    /// Short machine-readable name; becomes the column header in exports.
    pub short_name: String,
    pub unit: Option<String>,
    pub bound_lower: f64,
    pub bound_upper: f64,
}

impl DataType {
    pub fn bounds(&self) -> Bounds {
        Bounds {
            lower: self.bound_lower,
            upper: self.bound_upper,
        }
    }
}

/// A class of sensor attached to stations. `decimals` is the power-of-ten
/// scaling applied to every reading the sensor reports; changing it would
/// silently reinterpret all historical values, so it is treated as immutable
/// after creation.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Sensor {
    pub id: i32,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub name: String,
    /// Legacy external identifier.
    pub data_id: String,
    pub decimals: i16,
}

/// A climate station: a named GOES transmitter with an ordered list of
/// sensors, reachable only through [`StationSensorLink`] rows.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Station {
    pub id: i32,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub name: String,
    pub goes_id: String,
}

/// Binding of a sensor to a station. `station_order` defines the parse and
/// display order of sensors within the station's message and drives export
/// column order.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StationSensorLink {
    pub id: i32,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub station_order: i16,
    /// Readings expected per message, default 4.
    pub read_frequency: i16,
    pub station_id: i32,
    pub sensor_id: i32,
    pub data_type_id: Option<i32>,
}

/// One scalar measurement from one sensor at one station at one instant.
/// All parent references are nullable: deleting a parent keeps the
/// historical reading and nulls the reference.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Reading {
    pub id: i32,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub read_time: DateTime<Utc>,
    pub data_source: String,
    /// Scaled integer; None means the sensor reported no data.
    pub value: Option<i32>,
    pub qc_processed: bool,
    pub invalid: bool,
    pub sensor_id: Option<i32>,
    pub station_id: Option<i32>,
    pub station_sensor_link_id: Option<i32>,
    pub message_id: Option<i32>,
}

/// Compact reading projection for global reading queries. Selecting this
/// shape is a caller-visible parameter, not a silent optimization.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CompactReading {
    pub id: i32,
    pub read_time: DateTime<Utc>,
    pub value: Option<i32>,
    pub invalid: bool,
    pub sensor_id: Option<i32>,
    pub station_id: Option<i32>,
}

/// Compact projection for station-scoped queries; the station is implied by
/// the path so its column is dropped.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StationCompactReading {
    pub id: i32,
    pub read_time: DateTime<Utc>,
    pub value: Option<i32>,
    pub invalid: bool,
    pub sensor_id: Option<i32>,
}

/// A raw DCP message relayed through a GOES satellite.
/// See <http://eddn.usgs.gov/dcpformat.html> for the format.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Message {
    pub id: i32,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub goes_id: String,
    pub goes_channel: i16,
    /// `E` (east) or `W` (west).
    pub goes_spacecraft: String,
    pub arrival_time: DateTime<Utc>,
    pub failure_code: String,
    pub signal_strength: i16,
    pub frequency_offset: String,
    /// `N`ormal / `L`ow / `H`igh.
    pub modulation_index: String,
    /// `N`ormal / `F`air / `P`oor.
    pub data_quality: String,
    /// Two-character relay source code.
    pub data_source: String,
    pub recorded_message_length: i16,
    /// One slot per expected reading; entries are nullable.
    pub values: Vec<Option<i32>>,
    pub message_text: String,
    pub station_id: Option<i32>,
}

/// Process-wide name → text configuration pair.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Setting {
    pub id: i32,
    pub updated: DateTime<Utc>,
    pub name: String,
    pub value: String,
}
