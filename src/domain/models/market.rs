//! Market data types read from the historical store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Bar aggregation interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1min")]
    OneMinute,
    #[serde(rename = "5min")]
    FiveMinute,
    #[serde(rename = "1day")]
    Daily,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1min",
            Self::FiveMinute => "5min",
            Self::Daily => "1day",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "1min" => Some(Self::OneMinute),
            "5min" => Some(Self::FiveMinute),
            "1day" => Some(Self::Daily),
            _ => None,
        }
    }

    /// Bar duration in seconds; daily bars use the full session placeholder.
    pub fn seconds(&self) -> i64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinute => 300,
            Self::Daily => 86_400,
        }
    }
}

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub timeframe: Timeframe,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Wall-clock label for intraday bars (e.g. "09:35").
    pub time_of_day: Option<String>,
}

impl Bar {
    /// True range against the previous close, used for ATR.
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

/// Average true range over the trailing `period` bars.
///
/// Bars must be in ascending timestamp order and end at (or before) the
/// evaluation point; callers are responsible for not passing future bars.
/// Returns `None` when fewer than `period + 1` bars are available.
pub fn average_true_range(bars: &[Bar], period: usize) -> Option<f64> {
    if bars.len() < period + 1 {
        return None;
    }
    let window = &bars[bars.len() - period - 1..];
    let sum: f64 = window
        .windows(2)
        .map(|pair| pair[1].true_range(pair[0].close))
        .sum();
    Some(sum / period as f64)
}

/// Precomputed daily indicators keyed by (ticker, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub ticker: String,
    pub date: NaiveDate,
    pub change_pct: f64,
    pub rsi_14: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub consecutive_up_days: i32,
    pub consecutive_down_days: i32,
    pub change_5d_pct: Option<f64>,
    pub change_20d_pct: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(ts: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            ticker: "TEST".to_string(),
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            timeframe: Timeframe::FiveMinute,
            open,
            high,
            low,
            close,
            volume: 1000.0,
            time_of_day: None,
        }
    }

    #[test]
    fn test_true_range_uses_gap() {
        // Gap up: previous close 10, bar low 12 -> TR dominated by |low - prev_close|? No:
        // high-prev = 3, low-prev = 2, high-low = 1 -> TR = 3.
        let b = bar(0, 12.5, 13.0, 12.0, 12.8);
        assert!((b.true_range(10.0) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_requires_period_plus_one_bars() {
        let bars: Vec<Bar> = (0..14).map(|i| bar(i * 300, 10.0, 11.0, 9.0, 10.0)).collect();
        assert!(average_true_range(&bars, 14).is_none());

        let bars: Vec<Bar> = (0..15).map(|i| bar(i * 300, 10.0, 11.0, 9.0, 10.0)).collect();
        let atr = average_true_range(&bars, 14).unwrap();
        assert!((atr - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_timeframe_round_trip() {
        for tf in [Timeframe::OneMinute, Timeframe::FiveMinute, Timeframe::Daily] {
            assert_eq!(Timeframe::parse_str(tf.as_str()), Some(tf));
        }
        assert_eq!(Timeframe::parse_str("15min"), None);
    }
}
