//! Backtest evaluator: applies every execution template to a signal list
//! and produces the per-template result table.
//!
//! Future-bar windows are materialised once per signal and shared across
//! templates. The custom-executor lane runs outside this service (it needs
//! the sandbox); its parsed trades are handed in and compete for "winner"
//! on equal terms under the `custom` tag.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    average_true_range, BacktestReport, Bar, Signal, TemplateMetrics, Timeframe, TradeRecord,
};
use crate::domain::ports::MarketDataStore;
use crate::services::templates::ExecutionTemplate;

/// Tag under which a generated executor competes.
pub const CUSTOM_TAG: &str = "custom";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Timeframe of the bars each signal is simulated against.
    pub timeframe: Timeframe,
    /// Future bars materialised per signal (covers the 3-day aggressive
    /// hold on 5-minute bars with slack).
    pub future_window_bars: i64,
    /// ATR period for the adaptive template.
    pub atr_period: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::FiveMinute,
            future_window_bars: 400,
            atr_period: 14,
        }
    }
}

/// One signal with its materialised simulation inputs.
struct SignalWindow {
    signal: Signal,
    atr: Option<f64>,
    future_bars: Vec<Bar>,
}

pub struct BacktestEvaluator {
    market: Arc<dyn MarketDataStore>,
    config: EvaluatorConfig,
}

impl BacktestEvaluator {
    pub fn new(market: Arc<dyn MarketDataStore>, config: EvaluatorConfig) -> Self {
        Self { market, config }
    }

    /// Evaluate the signal list against the whole template library plus an
    /// optional custom-executor trade list.
    pub async fn evaluate(
        &self,
        signals: &[Signal],
        custom_trades: Option<Vec<TradeRecord>>,
    ) -> DomainResult<BacktestReport> {
        let windows = self.materialise_windows(signals).await?;

        let mut per_template: Vec<TemplateMetrics> = Vec::new();
        for template in ExecutionTemplate::all() {
            let trades: Vec<TradeRecord> = windows
                .iter()
                .filter_map(|w| template.apply(&w.signal, w.atr, &w.future_bars))
                .collect();
            per_template.push(TemplateMetrics::from_trades(template.tag(), trades));
        }

        if let Some(trades) = custom_trades {
            per_template.push(TemplateMetrics::from_trades(CUSTOM_TAG, trades));
        }

        Ok(BacktestReport::new(signals.len(), per_template))
    }

    async fn materialise_windows(&self, signals: &[Signal]) -> DomainResult<Vec<SignalWindow>> {
        let mut windows = Vec::with_capacity(signals.len());

        for signal in signals {
            let future_bars = self
                .market
                .bars_after(
                    &signal.ticker,
                    self.config.timeframe,
                    signal.timestamp,
                    self.config.future_window_bars,
                )
                .await?;

            let context = self
                .market
                .bars_before(
                    &signal.ticker,
                    self.config.timeframe,
                    signal.timestamp,
                    (self.config.atr_period + 1) as i64,
                )
                .await?;
            let atr = average_true_range(&context, self.config.atr_period);

            windows.push(SignalWindow {
                signal: signal.clone(),
                atr,
                future_bars,
            });
        }

        Ok(windows)
    }
}
