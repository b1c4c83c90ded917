//! Execution template library: the fixed set of exit-management recipes.
//!
//! Templates are program constants, not data the LLM may rewrite. Each is a
//! pure function from (signal, entry fill, future bars) to at most one
//! simulated trade under the uniform $10,000 notional sizing rule. Entry is
//! the open of the first bar strictly after the signal timestamp; when a
//! single bar breaches both the stop and the target, the stop fills first.

use chrono::Duration;

use crate::domain::models::{Bar, ExitReason, Signal, TradeRecord, TradeSide};

/// One of the built-in exit strategies, identified by a stable tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionTemplate {
    /// Fixed stop 2%, target 3%, max hold 1 day.
    Conservative,
    /// Stop 3%, target 6%, max hold 3 days.
    Aggressive,
    /// No price target; exit at a fixed wall-clock offset from entry.
    TimeBased { offset: Duration },
    /// Stop = k x ATR(14); target = 2k x ATR.
    AtrAdaptive { k: f64 },
    /// Trail the stop below the low of the last N bars.
    PriceAction { lookback: usize },
}

impl ExecutionTemplate {
    /// The full library with default parameters, in tag order.
    pub fn all() -> Vec<ExecutionTemplate> {
        vec![
            Self::Aggressive,
            Self::AtrAdaptive { k: 1.5 },
            Self::Conservative,
            Self::PriceAction { lookback: 3 },
            Self::TimeBased {
                offset: Duration::hours(2),
            },
        ]
    }

    /// Stable tag; adding templates must not disturb existing tags.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Aggressive => "aggressive",
            Self::TimeBased { .. } => "time_based",
            Self::AtrAdaptive { .. } => "atr_adaptive",
            Self::PriceAction { .. } => "price_action",
        }
    }

    /// Simulate one signal. `atr` is ATR(14) computed from bars at or
    /// before entry; `future_bars` are ascending and strictly after the
    /// signal timestamp. `None` means the signal is skipped (no bars, or a
    /// required input is missing) and does not count as a trade.
    pub fn apply(&self, signal: &Signal, atr: Option<f64>, future_bars: &[Bar]) -> Option<TradeRecord> {
        let entry_bar = future_bars.first()?;
        let entry_price = entry_bar.open;
        if entry_price <= 0.0 {
            return None;
        }

        match self {
            Self::Conservative => bracket_exit(
                signal,
                entry_bar,
                future_bars,
                entry_price * 0.02,
                entry_price * 0.03,
                Some(Duration::days(1)),
            ),
            Self::Aggressive => bracket_exit(
                signal,
                entry_bar,
                future_bars,
                entry_price * 0.03,
                entry_price * 0.06,
                Some(Duration::days(3)),
            ),
            Self::TimeBased { offset } => time_exit(signal, entry_bar, future_bars, *offset),
            Self::AtrAdaptive { k } => {
                let atr = atr?;
                if atr <= 0.0 {
                    return None;
                }
                bracket_exit(signal, entry_bar, future_bars, k * atr, 2.0 * k * atr, None)
            }
            Self::PriceAction { lookback } => {
                trailing_exit(signal, entry_bar, future_bars, *lookback)
            }
        }
    }
}

/// Stop/target bracket with an optional max-hold window.
fn bracket_exit(
    signal: &Signal,
    entry_bar: &Bar,
    future_bars: &[Bar],
    stop_distance: f64,
    target_distance: f64,
    max_hold: Option<Duration>,
) -> Option<TradeRecord> {
    let side = signal.side;
    let entry_price = entry_bar.open;
    let entry_time = entry_bar.timestamp;
    let hold_until = max_hold.map(|d| entry_time + d);

    let (stop_price, target_price) = match side {
        TradeSide::Long => (entry_price - stop_distance, entry_price + target_distance),
        TradeSide::Short => (entry_price + stop_distance, entry_price - target_distance),
    };

    let mut last_in_window = entry_bar;
    for bar in future_bars {
        if let Some(limit) = hold_until {
            if bar.timestamp > limit {
                return Some(TradeRecord::from_fills(
                    &signal.ticker,
                    side,
                    entry_time,
                    entry_price,
                    last_in_window.timestamp,
                    last_in_window.close,
                    ExitReason::TimeExit,
                ));
            }
        }

        let stop_hit = match side {
            TradeSide::Long => bar.low <= stop_price,
            TradeSide::Short => bar.high >= stop_price,
        };
        if stop_hit {
            return Some(TradeRecord::from_fills(
                &signal.ticker,
                side,
                entry_time,
                entry_price,
                bar.timestamp,
                stop_price,
                ExitReason::StopLoss,
            ));
        }

        let target_hit = match side {
            TradeSide::Long => bar.high >= target_price,
            TradeSide::Short => bar.low <= target_price,
        };
        if target_hit {
            return Some(TradeRecord::from_fills(
                &signal.ticker,
                side,
                entry_time,
                entry_price,
                bar.timestamp,
                target_price,
                ExitReason::TakeProfit,
            ));
        }

        last_in_window = bar;
    }

    Some(TradeRecord::from_fills(
        &signal.ticker,
        side,
        entry_time,
        entry_price,
        last_in_window.timestamp,
        last_in_window.close,
        ExitReason::EndOfData,
    ))
}

/// Exit at the open of the first bar at or past the wall-clock offset.
fn time_exit(
    signal: &Signal,
    entry_bar: &Bar,
    future_bars: &[Bar],
    offset: Duration,
) -> Option<TradeRecord> {
    let entry_price = entry_bar.open;
    let entry_time = entry_bar.timestamp;
    let exit_at = entry_time + offset;

    for bar in future_bars {
        if bar.timestamp >= exit_at {
            return Some(TradeRecord::from_fills(
                &signal.ticker,
                signal.side,
                entry_time,
                entry_price,
                bar.timestamp,
                bar.open,
                ExitReason::TimeExit,
            ));
        }
    }

    let last = future_bars.last()?;
    Some(TradeRecord::from_fills(
        &signal.ticker,
        signal.side,
        entry_time,
        entry_price,
        last.timestamp,
        last.close,
        ExitReason::EndOfData,
    ))
}

/// Ratcheting trail: once `lookback` bars have completed, the stop sits at
/// the extreme of the last `lookback` completed bars and only ever
/// tightens. The current bar never feeds its own stop.
fn trailing_exit(
    signal: &Signal,
    entry_bar: &Bar,
    future_bars: &[Bar],
    lookback: usize,
) -> Option<TradeRecord> {
    let side = signal.side;
    let entry_price = entry_bar.open;
    let entry_time = entry_bar.timestamp;
    let lookback = lookback.max(1);

    let mut stop: Option<f64> = None;

    for (i, bar) in future_bars.iter().enumerate() {
        if i >= lookback {
            let window = &future_bars[i - lookback..i];
            let candidate = match side {
                TradeSide::Long => window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min),
                TradeSide::Short => {
                    window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max)
                }
            };
            stop = Some(match (stop, side) {
                (Some(current), TradeSide::Long) => current.max(candidate),
                (Some(current), TradeSide::Short) => current.min(candidate),
                (None, _) => candidate,
            });
        }

        if let Some(stop_price) = stop {
            let stop_hit = match side {
                TradeSide::Long => bar.low <= stop_price,
                TradeSide::Short => bar.high >= stop_price,
            };
            if stop_hit {
                return Some(TradeRecord::from_fills(
                    &signal.ticker,
                    side,
                    entry_time,
                    entry_price,
                    bar.timestamp,
                    stop_price,
                    ExitReason::TrailingStop,
                ));
            }
        }
    }

    let last = future_bars.last()?;
    Some(TradeRecord::from_fills(
        &signal.ticker,
        side,
        entry_time,
        entry_price,
        last.timestamp,
        last.close,
        ExitReason::EndOfData,
    ))
}
