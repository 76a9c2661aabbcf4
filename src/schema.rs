//! Database schema management for `climate-data-api`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` inside a single transaction.
//!
//! Deletion policy mirrors the data model: readings and messages keep
//! history when a parent goes away (`ON DELETE SET NULL`); station-sensor
//! links are meaningless without their station or sensor and cascade, but
//! only lose their data-type reference when the data type is deleted.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Safe to call on every startup; no-op if objects already exist.
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data_types (
            id          SERIAL PRIMARY KEY,
            created     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            name        TEXT        NOT NULL,
            short_name  TEXT        NOT NULL,
            unit        TEXT,
            bound_lower DOUBLE PRECISION NOT NULL DEFAULT -2147483648,
            bound_upper DOUBLE PRECISION NOT NULL DEFAULT 2147483648
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensors (
            id       SERIAL PRIMARY KEY,
            created  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            name     TEXT        NOT NULL,
            data_id  TEXT        NOT NULL DEFAULT '',
            decimals SMALLINT    NOT NULL CHECK (decimals >= 0)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stations (
            id      SERIAL PRIMARY KEY,
            created TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            name    TEXT        NOT NULL,
            goes_id VARCHAR(8)  NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS station_sensor_links (
            id             SERIAL PRIMARY KEY,
            created        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            station_order  SMALLINT NOT NULL CHECK (station_order >= 0),
            read_frequency SMALLINT NOT NULL DEFAULT 4,
            station_id     INTEGER  NOT NULL REFERENCES stations (id) ON DELETE CASCADE,
            sensor_id      INTEGER  NOT NULL REFERENCES sensors (id) ON DELETE CASCADE,
            data_type_id   INTEGER  REFERENCES data_types (id) ON DELETE SET NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id                      SERIAL PRIMARY KEY,
            created                 TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated                 TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            goes_id                 VARCHAR(8)  NOT NULL,
            goes_channel            SMALLINT    NOT NULL,
            goes_spacecraft         VARCHAR(1)  NOT NULL DEFAULT 'E',
            arrival_time            TIMESTAMPTZ NOT NULL,
            failure_code            VARCHAR(1)  NOT NULL,
            signal_strength         SMALLINT    NOT NULL,
            frequency_offset        VARCHAR(2)  NOT NULL,
            modulation_index        VARCHAR(1)  NOT NULL DEFAULT 'N',
            data_quality            VARCHAR(1)  NOT NULL DEFAULT 'N',
            data_source             VARCHAR(2)  NOT NULL,
            recorded_message_length SMALLINT    NOT NULL,
            "values"                INTEGER[]   NOT NULL,
            message_text            TEXT        NOT NULL,
            station_id              INTEGER     REFERENCES stations (id) ON DELETE SET NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            id                     SERIAL PRIMARY KEY,
            created                TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated                TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            read_time              TIMESTAMPTZ NOT NULL,
            data_source            VARCHAR(1)  NOT NULL DEFAULT 'G',
            value                  INTEGER,
            qc_processed           BOOLEAN     NOT NULL DEFAULT FALSE,
            invalid                BOOLEAN     NOT NULL DEFAULT FALSE,
            sensor_id              INTEGER REFERENCES sensors (id) ON DELETE SET NULL,
            station_id             INTEGER REFERENCES stations (id) ON DELETE SET NULL,
            station_sensor_link_id INTEGER REFERENCES station_sensor_links (id) ON DELETE SET NULL,
            message_id             INTEGER REFERENCES messages (id) ON DELETE SET NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            id      SERIAL PRIMARY KEY,
            updated TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            name    VARCHAR(63) NOT NULL UNIQUE,
            value   TEXT        NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Indexes for the query engine's access paths: time-range scans over
    // readings, latest-message anchors, and short-name lookups.
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_read_time
            ON readings (read_time);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_station_read_time
            ON readings (station_id, read_time);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_messages_station_arrival
            ON messages (station_id, arrival_time);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_messages_goes_id
            ON messages (goes_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_data_types_short_name
            ON data_types (short_name);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_links_station_order
            ON station_sensor_links (station_id, station_order);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
