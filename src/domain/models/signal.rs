//! Signals and simulated trades.
//!
//! A signal marks a candidate setup emitted by a scanner; a trade record is
//! the outcome of running one signal through an execution template or a
//! custom executor. Unknown keys on either are retained verbatim so the
//! learning loop never destroys information the generated code chose to
//! attach.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Direction of a candidate trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Long,
    Short,
}

impl Default for TradeSide {
    fn default() -> Self {
        Self::Long
    }
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "long" | "buy" => Some(Self::Long),
            "short" | "sell" => Some(Self::Short),
            _ => None,
        }
    }

    /// +1 for long, -1 for short; applied to per-share moves.
    pub fn direction(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

/// A candidate setup: {ticker, timestamp, optional side, optional metadata}.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub side: TradeSide,
    /// Keys the scanner attached beyond the mandatory ones, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Signal {
    pub fn new(ticker: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            ticker: ticker.into(),
            timestamp,
            side: TradeSide::Long,
            extra: Map::new(),
        }
    }

    pub fn with_side(mut self, side: TradeSide) -> Self {
        self.side = side;
        self
    }
}

/// Why a simulated trade exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TimeExit,
    TrailingStop,
    EndOfData,
    Custom,
}

impl Default for ExitReason {
    fn default() -> Self {
        Self::Custom
    }
}

/// Uniform trade notional applied by every execution template.
pub const TRADE_NOTIONAL: f64 = 10_000.0;

/// Share quantity under the uniform sizing rule.
pub fn position_size(entry_price: f64) -> f64 {
    if entry_price <= 0.0 {
        return 0.0;
    }
    (TRADE_NOTIONAL / entry_price).floor()
}

/// Outcome of running one signal through a template or custom executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub ticker: String,
    #[serde(default)]
    pub side: TradeSide,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub quantity: f64,
    /// Dollar P&L: qty x (exit - entry), sign-flipped for shorts.
    pub pnl: f64,
    /// Per-share return (exit - entry) / entry, sign-flipped for shorts.
    pub pnl_pct: f64,
    #[serde(default)]
    pub exit_reason: ExitReason,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TradeRecord {
    /// Build a trade with P&L derived from the uniform sizing rule.
    pub fn from_fills(
        ticker: impl Into<String>,
        side: TradeSide,
        entry_time: DateTime<Utc>,
        entry_price: f64,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        exit_reason: ExitReason,
    ) -> Self {
        let quantity = position_size(entry_price);
        let per_share = (exit_price - entry_price) * side.direction();
        let pnl_pct = if entry_price > 0.0 {
            per_share / entry_price
        } else {
            0.0
        };
        Self {
            ticker: ticker.into(),
            side,
            entry_time,
            entry_price,
            exit_time,
            exit_price,
            quantity,
            pnl: quantity * per_share,
            pnl_pct,
            exit_reason,
            extra: Map::new(),
        }
    }

    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }
}
