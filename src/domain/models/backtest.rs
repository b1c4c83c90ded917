//! Backtest result table and the deterministic winner rule.

use serde::{Deserialize, Serialize};

use crate::domain::models::signal::TradeRecord;

/// Serde representation for profit factor: infinity (no losing trades) is
/// stored as JSON null so the blob survives a round trip.
mod profit_factor_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let opt = Option::<f64>::deserialize(deserializer)?;
        Ok(opt.unwrap_or(f64::INFINITY))
    }
}

/// Metrics for one template (or the custom executor) over a signal list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMetrics {
    /// Stable template tag, or `custom` for a generated executor.
    pub template: String,
    pub total_trades: usize,
    pub winners: usize,
    pub losers: usize,
    pub win_rate: f64,
    pub total_return: f64,
    pub avg_return: f64,
    #[serde(with = "profit_factor_serde")]
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub trades: Vec<TradeRecord>,
}

impl TemplateMetrics {
    /// Compute the metric set from an accumulated trade list.
    ///
    /// Profit factor: gross winning $ / gross losing $; infinity when there
    /// are winners and no losers, 0 when there are no winners. Sharpe is
    /// trade-level: mean / population stdev x sqrt(N), 0 when N < 2.
    pub fn from_trades(template: impl Into<String>, trades: Vec<TradeRecord>) -> Self {
        let total_trades = trades.len();
        let winners = trades.iter().filter(|t| t.pnl > 0.0).count();
        let losers = total_trades - winners;

        let win_rate = if total_trades > 0 {
            winners as f64 / total_trades as f64
        } else {
            0.0
        };

        let total_return: f64 = trades.iter().map(|t| t.pnl).sum();
        let avg_return = if total_trades > 0 {
            total_return / total_trades as f64
        } else {
            0.0
        };

        let gross_wins: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
        let gross_losses: f64 = trades
            .iter()
            .filter(|t| t.pnl <= 0.0)
            .map(|t| t.pnl.abs())
            .sum();

        let profit_factor = if winners == 0 {
            0.0
        } else if gross_losses <= f64::EPSILON {
            f64::INFINITY
        } else {
            gross_wins / gross_losses
        };

        let returns: Vec<f64> = trades.iter().map(|t| t.pnl_pct).collect();
        let sharpe_ratio = trade_level_sharpe(&returns);

        Self {
            template: template.into(),
            total_trades,
            winners,
            losers,
            win_rate,
            total_return,
            avg_return,
            profit_factor,
            sharpe_ratio,
            trades,
        }
    }

    /// Winner ordering: profit factor, then win rate, then total return,
    /// then lexicographically first tag. Returns true when `self` beats
    /// `other`.
    pub fn beats(&self, other: &TemplateMetrics) -> bool {
        if self.profit_factor != other.profit_factor {
            return self.profit_factor > other.profit_factor;
        }
        if self.win_rate != other.win_rate {
            return self.win_rate > other.win_rate;
        }
        if self.total_return != other.total_return {
            return self.total_return > other.total_return;
        }
        self.template < other.template
    }
}

/// Trade-level Sharpe: mean / population stdev x sqrt(N); 0 when N < 2 or
/// the series has no variance.
pub fn trade_level_sharpe(returns: &[f64]) -> f64 {
    let n = returns.len();
    if n < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / n as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64;
    let std_dev = variance.sqrt();
    if std_dev <= f64::EPSILON {
        return 0.0;
    }
    mean / std_dev * (n as f64).sqrt()
}

/// The per-template result table recorded on an iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub signals_evaluated: usize,
    /// One row per template plus, when present, the `custom` executor row.
    pub per_template: Vec<TemplateMetrics>,
}

impl BacktestReport {
    pub fn new(signals_evaluated: usize, per_template: Vec<TemplateMetrics>) -> Self {
        Self {
            signals_evaluated,
            per_template,
        }
    }

    /// The tie-broken winner. `None` only for an empty table.
    pub fn winner(&self) -> Option<&TemplateMetrics> {
        let mut best: Option<&TemplateMetrics> = None;
        for metrics in &self.per_template {
            match best {
                None => best = Some(metrics),
                Some(current) if metrics.beats(current) => best = Some(metrics),
                Some(_) => {}
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::signal::{ExitReason, TradeRecord, TradeSide};
    use chrono::{TimeZone, Utc};

    fn trade(pnl_per_share: f64, entry: f64) -> TradeRecord {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        TradeRecord::from_fills(
            "TEST",
            TradeSide::Long,
            t0,
            entry,
            t0 + chrono::Duration::hours(1),
            entry + pnl_per_share,
            ExitReason::TimeExit,
        )
    }

    fn metrics_with(template: &str, pf: f64, wr: f64, tr: f64) -> TemplateMetrics {
        TemplateMetrics {
            template: template.to_string(),
            total_trades: 10,
            winners: 5,
            losers: 5,
            win_rate: wr,
            total_return: tr,
            avg_return: 0.0,
            profit_factor: pf,
            sharpe_ratio: 0.0,
            trades: vec![],
        }
    }

    #[test]
    fn test_empty_trade_list_metrics() {
        let m = TemplateMetrics::from_trades("conservative", vec![]);
        assert_eq!(m.total_trades, 0);
        assert!((m.win_rate - 0.0).abs() < f64::EPSILON);
        assert!((m.profit_factor - 0.0).abs() < f64::EPSILON);
        assert!((m.sharpe_ratio - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_all_winners_infinite_profit_factor() {
        let m = TemplateMetrics::from_trades("aggressive", vec![trade(2.0, 100.0), trade(3.0, 100.0)]);
        assert!(m.profit_factor.is_infinite());
        assert_eq!(m.winners, 2);
        assert_eq!(m.losers, 0);
    }

    #[test]
    fn test_single_trade_sharpe_is_zero() {
        let m = TemplateMetrics::from_trades("time_based", vec![trade(2.0, 100.0)]);
        assert!((m.sharpe_ratio - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sharpe_formula() {
        // Returns 0.01 and 0.03: mean 0.02, population stdev 0.01, sqrt(2).
        let sharpe = trade_level_sharpe(&[0.01, 0.03]);
        assert!((sharpe - 2.0 * std::f64::consts::SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn test_winner_prefers_profit_factor() {
        let report = BacktestReport::new(
            5,
            vec![
                metrics_with("conservative", 1.5, 0.9, 500.0),
                metrics_with("aggressive", 2.0, 0.4, 100.0),
            ],
        );
        assert_eq!(report.winner().unwrap().template, "aggressive");
    }

    #[test]
    fn test_winner_tie_breaks_lexicographically() {
        let report = BacktestReport::new(
            0,
            vec![
                metrics_with("time_based", 0.0, 0.0, 0.0),
                metrics_with("conservative", 0.0, 0.0, 0.0),
                metrics_with("aggressive", 0.0, 0.0, 0.0),
                metrics_with("price_action", 0.0, 0.0, 0.0),
                metrics_with("atr_adaptive", 0.0, 0.0, 0.0),
            ],
        );
        assert_eq!(report.winner().unwrap().template, "aggressive");
    }

    #[test]
    fn test_winner_infinite_beats_finite() {
        let report = BacktestReport::new(
            3,
            vec![
                metrics_with("conservative", f64::INFINITY, 1.0, 10.0),
                metrics_with("aggressive", 99.0, 1.0, 1000.0),
            ],
        );
        assert_eq!(report.winner().unwrap().template, "conservative");
    }

    #[test]
    fn test_profit_factor_survives_json_round_trip() {
        let m = TemplateMetrics::from_trades("aggressive", vec![trade(2.0, 100.0)]);
        assert!(m.profit_factor.is_infinite());
        let json = serde_json::to_string(&m).unwrap();
        let back: TemplateMetrics = serde_json::from_str(&json).unwrap();
        assert!(back.profit_factor.is_infinite());
    }
}
