//! MariaDB history repository
//!
//! Holds a single connection rather than a pool: the refresh contract is
//! explicit (absent connection or a failed ping tears it down and
//! re-establishes before each query). Query failures yield empty results and
//! a health entry; the caller keeps running.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Connection, Row};
use tokio::sync::Mutex;

use crate::config::DatabaseConfig;
use crate::domain::reading::{
    Reading, LABEL_HISTORICAL_ENV, LABEL_HISTORICAL_SOIL, TIMESTAMP_FORMAT,
};
use crate::error::Result;
use crate::health::HealthRegistry;

const COMPONENT: &str = "history_repository";

const ENVIRONMENTAL_QUERY: &str = "SELECT time, temperature, humidity, light \
     FROM environmental_conditions ORDER BY time DESC LIMIT ?";
const SOIL_AND_AIR_QUERY: &str = "SELECT time, soil, gas, raindrop \
     FROM soil_and_air_quality ORDER BY time DESC LIMIT ?";

/// Pipeline-facing seam over the historical store
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Most recent environmental rows, ascending by time
    async fn load_environmental(&self, limit: usize) -> Vec<Reading>;

    /// Most recent soil/air quality rows, ascending by time
    async fn load_soil_and_air(&self, limit: usize) -> Vec<Reading>;
}

/// Connection-refreshing client for the relational store
pub struct HistoryRepository {
    config: DatabaseConfig,
    health: Arc<HealthRegistry>,
    connection: Mutex<Option<MySqlConnection>>,
}

impl HistoryRepository {
    /// Establish the initial connection; failure here is fatal to startup
    pub async fn connect(config: DatabaseConfig, health: Arc<HealthRegistry>) -> Result<Self> {
        let connection = Self::open(&config).await?;
        health.update(COMPONENT, true, "database connected");
        Ok(Self {
            config,
            health,
            connection: Mutex::new(Some(connection)),
        })
    }

    async fn open(config: &DatabaseConfig) -> Result<MySqlConnection> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.schema);
        Ok(MySqlConnection::connect_with(&options).await?)
    }

    /// Tear down and re-establish the connection when it is absent or fails
    /// a ping round trip. Returns false when no usable connection exists.
    async fn refresh(&self, slot: &mut Option<MySqlConnection>) -> bool {
        if let Some(connection) = slot.as_mut() {
            if connection.ping().await.is_ok() {
                return true;
            }
            tracing::warn!("Refreshing database connection");
        }

        if let Some(stale) = slot.take() {
            let _ = stale.close().await;
        }

        match Self::open(&self.config).await {
            Ok(connection) => {
                *slot = Some(connection);
                self.health.update(COMPONENT, true, "database reconnected");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Database reconnect failed");
                self.health
                    .update(COMPONENT, false, format!("reconnect failed: {e}"));
                false
            }
        }
    }

    async fn fetch(
        &self,
        query: &'static str,
        limit: usize,
        map_row: fn(&MySqlRow) -> Reading,
    ) -> Vec<Reading> {
        let mut slot = self.connection.lock().await;
        if !self.refresh(&mut slot).await {
            return Vec::new();
        }
        let Some(connection) = slot.as_mut() else {
            return Vec::new();
        };

        let rows = match sqlx::query(query)
            .bind(limit as u32)
            .fetch_all(&mut *connection)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "History query failed");
                self.health
                    .update(COMPONENT, false, format!("query failed: {e}"));
                *slot = None;
                return Vec::new();
            }
        };

        let mut readings: Vec<Reading> = rows.iter().map(map_row).collect();
        // Rows arrive newest-first; callers want ascending time order.
        readings.reverse();
        readings
    }
}

#[async_trait]
impl HistorySource for HistoryRepository {
    async fn load_environmental(&self, limit: usize) -> Vec<Reading> {
        self.fetch(ENVIRONMENTAL_QUERY, limit, map_environmental_row)
            .await
    }

    async fn load_soil_and_air(&self, limit: usize) -> Vec<Reading> {
        self.fetch(SOIL_AND_AIR_QUERY, limit, map_soil_row).await
    }
}

fn map_environmental_row(row: &MySqlRow) -> Reading {
    Reading {
        label: LABEL_HISTORICAL_ENV.to_string(),
        timestamp: time_column(row, "time"),
        temperature: numeric_column(row, "temperature"),
        humidity: numeric_column(row, "humidity"),
        light: numeric_column(row, "light"),
        ..Reading::default()
    }
}

fn map_soil_row(row: &MySqlRow) -> Reading {
    Reading {
        label: LABEL_HISTORICAL_SOIL.to_string(),
        timestamp: time_column(row, "time"),
        soil: numeric_column(row, "soil"),
        gas: numeric_column(row, "gas"),
        raindrop: numeric_column(row, "raindrop"),
        ..Reading::default()
    }
}

/// NULL or unreadable columns coerce to 0.0; FLOAT and text columns are
/// widened so the schema's numeric type does not matter
fn numeric_column(row: &MySqlRow, name: &str) -> f64 {
    if let Ok(value) = row.try_get::<Option<f64>, _>(name) {
        return value.unwrap_or(0.0);
    }
    if let Ok(value) = row.try_get::<Option<f32>, _>(name) {
        return value.map(f64::from).unwrap_or(0.0);
    }
    if let Ok(Some(text)) = row.try_get::<Option<String>, _>(name) {
        return text.parse().unwrap_or(0.0);
    }
    0.0
}

/// NULL timestamps render as "N/A"; text columns pass through verbatim
fn time_column(row: &MySqlRow, name: &str) -> String {
    if let Ok(Some(ts)) = row.try_get::<Option<NaiveDateTime>, _>(name) {
        return format_db_timestamp(Some(ts));
    }
    if let Ok(Some(text)) = row.try_get::<Option<String>, _>(name) {
        return text;
    }
    format_db_timestamp(None)
}

fn format_db_timestamp(ts: Option<NaiveDateTime>) -> String {
    match ts {
        Some(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        None => "N/A".to_string(),
    }
}
