use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;

use crate::mqtt::TelemetrySnapshot;

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 500;

const SNAPSHOT_COLUMNS: &str = "id, ts, node_id, \
    temperature_inside, humidity_inside, temperature_outside, humidity_outside, \
    light, moisture_plant_1, moisture_plant_2, sun_up";

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// A persisted snapshot, as served by the telemetry API.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct SnapshotRow {
    pub id: i64,
    pub ts: i64,
    pub node_id: String,
    pub temperature_inside: f64,
    pub humidity_inside: f64,
    pub temperature_outside: f64,
    pub humidity_outside: f64,
    pub light: i64,
    pub moisture_plant_1: f64,
    pub moisture_plant_2: f64,
    pub sun_up: i64,
}

/// Clamp a requested history size into `1..=MAX_HISTORY_LIMIT`.
pub fn history_limit(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/greenhouse/greenhouse.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal);

        // An in-memory database lives and dies with its connection.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Snapshots
    // ----------------------------

    pub async fn insert_snapshot(&self, ts: i64, node_id: &str, s: &TelemetrySnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (
              ts, node_id,
              temperature_inside, humidity_inside,
              temperature_outside, humidity_outside,
              light, moisture_plant_1, moisture_plant_2, sun_up
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ts)
        .bind(node_id)
        .bind(s.temperature_inside)
        .bind(s.humidity_inside)
        .bind(s.temperature_outside)
        .bind(s.humidity_outside)
        .bind(i64::from(s.light))
        .bind(s.moisture_plant_1)
        .bind(s.moisture_plant_2)
        .bind(i64::from(s.sun_up))
        .execute(&self.pool)
        .await
        .context("insert_snapshot failed")?;
        Ok(())
    }

    pub async fn latest_snapshot(&self) -> Result<Option<SnapshotRow>> {
        let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots ORDER BY ts DESC, id DESC LIMIT 1");
        sqlx::query_as::<_, SnapshotRow>(&sql)
            .fetch_optional(&self.pool)
            .await
            .context("latest_snapshot failed")
    }

    /// Newest first.
    pub async fn recent_snapshots(&self, limit: i64) -> Result<Vec<SnapshotRow>> {
        let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots ORDER BY ts DESC, id DESC LIMIT ?");
        sqlx::query_as::<_, SnapshotRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("recent_snapshots failed")
    }
}

// ===========================================================================
// Tests
// ===========================================================================
