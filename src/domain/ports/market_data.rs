//! Read-only port over the historical market-data store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::path::PathBuf;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Bar, DailyMetrics, Timeframe};

#[async_trait]
pub trait MarketDataStore: Send + Sync {
    /// Bars in the closed range `[from, to]`, ascending.
    async fn bars(
        &self,
        ticker: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<Bar>>;

    /// Bars strictly after `after`, ascending, at most `limit`.
    async fn bars_after(
        &self,
        ticker: &str,
        timeframe: Timeframe,
        after: DateTime<Utc>,
        limit: i64,
    ) -> DomainResult<Vec<Bar>>;

    /// Bars at or before `until`, ascending, at most `limit` (the trailing
    /// context window for indicators such as ATR).
    async fn bars_before(
        &self,
        ticker: &str,
        timeframe: Timeframe,
        until: DateTime<Utc>,
        limit: i64,
    ) -> DomainResult<Vec<Bar>>;

    async fn daily_metrics(&self, ticker: &str, date: NaiveDate) -> DomainResult<Option<DailyMetrics>>;

    async fn universe_members(&self, universe: &str) -> DomainResult<Vec<String>>;

    /// Filesystem path handed to sandboxed scripts (read-only) through the
    /// QUANTLAB_MARKET_DB environment variable.
    fn database_path(&self) -> PathBuf;
}
