//! Read-only SQLite adapter over the historical market-data store.
//!
//! The store is maintained by the ingestion pipeline outside this crate;
//! this adapter opens it read-only and exposes the `bars`, `daily_metrics`
//! and `universe_members` views. Sandboxed scripts receive the same file
//! path through the QUANTLAB_MARKET_DB environment variable.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Bar, DailyMetrics, Timeframe};
use crate::domain::ports::MarketDataStore;

use super::connection::{open_read_only_pool, OpenError};

#[derive(Clone)]
pub struct SqliteMarketDataStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteMarketDataStore {
    /// Open the store read-only; writes are rejected at the connection level.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, OpenError> {
        let path = path.as_ref().to_path_buf();
        let pool = open_read_only_pool(&path).await?;
        Ok(Self { pool, path })
    }

    /// Wrap an existing pool (tests use a writable in-memory database to
    /// seed synthetic bars, then hand it here).
    pub fn from_pool(pool: SqlitePool, path: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            path: path.into(),
        }
    }
}

#[async_trait]
impl MarketDataStore for SqliteMarketDataStore {
    async fn bars(
        &self,
        ticker: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<Bar>> {
        let rows: Vec<BarRow> = sqlx::query_as(
            r#"SELECT ticker, timestamp, timeframe, open, high, low, close, volume, time_of_day
               FROM bars
               WHERE ticker = ? AND timeframe = ? AND timestamp >= ? AND timestamp <= ?
               ORDER BY timestamp ASC"#,
        )
        .bind(ticker)
        .bind(timeframe.as_str())
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::MarketDataError(e.to_string()))?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn bars_after(
        &self,
        ticker: &str,
        timeframe: Timeframe,
        after: DateTime<Utc>,
        limit: i64,
    ) -> DomainResult<Vec<Bar>> {
        let rows: Vec<BarRow> = sqlx::query_as(
            r#"SELECT ticker, timestamp, timeframe, open, high, low, close, volume, time_of_day
               FROM bars
               WHERE ticker = ? AND timeframe = ? AND timestamp > ?
               ORDER BY timestamp ASC LIMIT ?"#,
        )
        .bind(ticker)
        .bind(timeframe.as_str())
        .bind(after.to_rfc3339())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::MarketDataError(e.to_string()))?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn bars_before(
        &self,
        ticker: &str,
        timeframe: Timeframe,
        until: DateTime<Utc>,
        limit: i64,
    ) -> DomainResult<Vec<Bar>> {
        // Fetch newest-first then restore ascending order.
        let mut rows: Vec<BarRow> = sqlx::query_as(
            r#"SELECT ticker, timestamp, timeframe, open, high, low, close, volume, time_of_day
               FROM bars
               WHERE ticker = ? AND timeframe = ? AND timestamp <= ?
               ORDER BY timestamp DESC LIMIT ?"#,
        )
        .bind(ticker)
        .bind(timeframe.as_str())
        .bind(until.to_rfc3339())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::MarketDataError(e.to_string()))?;

        rows.reverse();
        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn daily_metrics(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> DomainResult<Option<DailyMetrics>> {
        let row: Option<DailyMetricsRow> = sqlx::query_as(
            "SELECT * FROM daily_metrics WHERE ticker = ? AND date = ?",
        )
        .bind(ticker)
        .bind(date.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::MarketDataError(e.to_string()))?;

        row.map(|r| r.try_into()).transpose()
    }

    async fn universe_members(&self, universe: &str) -> DomainResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT ticker FROM universe_members WHERE universe = ? ORDER BY ticker",
        )
        .bind(universe)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::MarketDataError(e.to_string()))?;

        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    fn database_path(&self) -> PathBuf {
        self.path.clone()
    }
}

#[derive(sqlx::FromRow)]
struct BarRow {
    ticker: String,
    timestamp: String,
    timeframe: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    time_of_day: Option<String>,
}

impl TryFrom<BarRow> for Bar {
    type Error = DomainError;

    fn try_from(row: BarRow) -> Result<Self, Self::Error> {
        let timeframe = Timeframe::parse_str(&row.timeframe).ok_or_else(|| {
            DomainError::MarketDataError(format!("Invalid timeframe: {}", row.timeframe))
        })?;
        Ok(Bar {
            ticker: row.ticker,
            timestamp: super::parse_datetime(&row.timestamp)?,
            timeframe,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            time_of_day: row.time_of_day,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DailyMetricsRow {
    ticker: String,
    date: String,
    change_pct: f64,
    rsi_14: Option<f64>,
    sma_20: Option<f64>,
    sma_50: Option<f64>,
    sma_200: Option<f64>,
    volume_ratio: Option<f64>,
    consecutive_up_days: i64,
    consecutive_down_days: i64,
    change_5d_pct: Option<f64>,
    change_20d_pct: Option<f64>,
}

impl TryFrom<DailyMetricsRow> for DailyMetrics {
    type Error = DomainError;

    fn try_from(row: DailyMetricsRow) -> Result<Self, Self::Error> {
        let date = row
            .date
            .parse::<NaiveDate>()
            .map_err(|e| DomainError::MarketDataError(e.to_string()))?;
        Ok(DailyMetrics {
            ticker: row.ticker,
            date,
            change_pct: row.change_pct,
            rsi_14: row.rsi_14,
            sma_20: row.sma_20,
            sma_50: row.sma_50,
            sma_200: row.sma_200,
            volume_ratio: row.volume_ratio,
            consecutive_up_days: row.consecutive_up_days as i32,
            consecutive_down_days: row.consecutive_down_days as i32,
            change_5d_pct: row.change_5d_pct,
            change_20d_pct: row.change_20d_pct,
        })
    }
}

/// Schema used by tests to stand up a synthetic market store.
pub const MARKET_TEST_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS bars (
    ticker TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL,
    time_of_day TEXT,
    PRIMARY KEY (ticker, timestamp, timeframe)
);
CREATE TABLE IF NOT EXISTS daily_metrics (
    ticker TEXT NOT NULL,
    date TEXT NOT NULL,
    change_pct REAL NOT NULL,
    rsi_14 REAL,
    sma_20 REAL,
    sma_50 REAL,
    sma_200 REAL,
    volume_ratio REAL,
    consecutive_up_days INTEGER NOT NULL DEFAULT 0,
    consecutive_down_days INTEGER NOT NULL DEFAULT 0,
    change_5d_pct REAL,
    change_20d_pct REAL,
    PRIMARY KEY (ticker, date)
);
CREATE TABLE IF NOT EXISTS universe_members (
    universe TEXT NOT NULL,
    ticker TEXT NOT NULL,
    PRIMARY KEY (universe, ticker)
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::open_memory_pool;
    use chrono::TimeZone;

    async fn seeded_store() -> SqliteMarketDataStore {
        let pool = open_memory_pool().await.unwrap();
        sqlx::raw_sql(MARKET_TEST_SCHEMA).execute(&pool).await.unwrap();

        for i in 0..10i64 {
            let ts = Utc.timestamp_opt(1_700_000_000 + i * 300, 0).unwrap();
            sqlx::query(
                "INSERT INTO bars (ticker, timestamp, timeframe, open, high, low, close, volume, time_of_day)
                 VALUES (?, ?, '5min', ?, ?, ?, ?, 1000, NULL)",
            )
            .bind("AAPL")
            .bind(ts.to_rfc3339())
            .bind(100.0 + i as f64)
            .bind(101.0 + i as f64)
            .bind(99.0 + i as f64)
            .bind(100.5 + i as f64)
            .execute(&pool)
            .await
            .unwrap();
        }

        sqlx::query("INSERT INTO universe_members (universe, ticker) VALUES ('sp500', 'AAPL')")
            .execute(&pool)
            .await
            .unwrap();

        SqliteMarketDataStore::from_pool(pool, "/tmp/market-test.db")
    }

    #[tokio::test]
    async fn test_bars_range_is_inclusive_both_ends() {
        let store = seeded_store().await;
        let from = Utc.timestamp_opt(1_700_000_000 + 2 * 300, 0).unwrap();
        let to = Utc.timestamp_opt(1_700_000_000 + 6 * 300, 0).unwrap();

        let bars = store
            .bars("AAPL", Timeframe::FiveMinute, from, to)
            .await
            .unwrap();
        assert_eq!(bars.len(), 5);
        assert_eq!(bars[0].timestamp, from);
        assert_eq!(bars[4].timestamp, to);
        assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        // The wrong timeframe sees nothing.
        let none = store
            .bars("AAPL", Timeframe::Daily, from, to)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_bars_after_is_strictly_after() {
        let store = seeded_store().await;
        let pivot = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let bars = store
            .bars_after("AAPL", Timeframe::FiveMinute, pivot, 100)
            .await
            .unwrap();
        assert_eq!(bars.len(), 9);
        assert!(bars.iter().all(|b| b.timestamp > pivot));
        assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_bars_before_is_ascending_and_inclusive() {
        let store = seeded_store().await;
        let pivot = Utc.timestamp_opt(1_700_000_000 + 4 * 300, 0).unwrap();

        let bars = store
            .bars_before("AAPL", Timeframe::FiveMinute, pivot, 3)
            .await
            .unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[2].timestamp, pivot);
        assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_universe_members() {
        let store = seeded_store().await;
        let members = store.universe_members("sp500").await.unwrap();
        assert_eq!(members, vec!["AAPL"]);
        assert!(store.universe_members("nasdaq100").await.unwrap().is_empty());
    }
}
