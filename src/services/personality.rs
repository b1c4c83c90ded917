//! Personality derivation from agent instructions.
//!
//! A deterministic keyword pass over the human seed text. It runs once at
//! agent creation; afterwards only an explicit update may change the
//! personality.

use crate::domain::models::{Personality, RiskTolerance, TradingStyle};

/// (needle, tag) dictionary for pattern focus.
const PATTERN_TAGS: [(&str, &str); 10] = [
    ("vwap", "vwap_bounce"),
    ("breakout", "breakout"),
    ("momentum", "momentum"),
    ("reversal", "reversal"),
    ("gap", "gap"),
    ("support", "support_resistance"),
    ("resistance", "support_resistance"),
    ("rsi", "rsi_divergence"),
    ("volume spike", "volume_spike"),
    ("moving average", "ma_cross"),
];

/// (needle, tag) dictionary for market-condition preferences.
const CONDITION_TAGS: [(&str, &str); 7] = [
    ("trending", "trending"),
    ("choppy", "choppy"),
    ("high volatility", "high_volatility"),
    ("volatile", "high_volatility"),
    ("low volatility", "low_volatility"),
    ("earnings", "earnings"),
    ("premarket", "premarket"),
];

pub fn parse_personality(instructions: &str) -> Personality {
    let text = instructions.to_lowercase();

    Personality {
        risk_tolerance: parse_risk(&text),
        trading_style: parse_style(&text),
        pattern_focus: collect_tags(&text, &PATTERN_TAGS),
        market_conditions: collect_tags(&text, &CONDITION_TAGS),
    }
}

fn parse_risk(text: &str) -> RiskTolerance {
    if text.contains("conservative") || text.contains("low risk") {
        return RiskTolerance::Conservative;
    }
    if text.contains("aggressive") || text.contains("high risk") {
        return RiskTolerance::Aggressive;
    }
    if text.contains("risk") {
        if let Some(pct) = first_percent(text) {
            if pct < 3.0 {
                return RiskTolerance::Conservative;
            }
            if pct >= 5.0 {
                return RiskTolerance::Aggressive;
            }
        }
    }
    RiskTolerance::Moderate
}

fn parse_style(text: &str) -> TradingStyle {
    if text.contains("scalp") || text.contains("1-min") || text.contains("1 min") || text.contains("1min") {
        return TradingStyle::Scalper;
    }
    if text.contains("min") || text.contains("intraday") || text.contains("day trad") {
        return TradingStyle::DayTrader;
    }
    if text.contains("swing") || text.contains("daily chart") {
        return TradingStyle::SwingTrader;
    }
    if text.contains("position") || text.contains("long-term") || text.contains("weekly") {
        return TradingStyle::PositionTrader;
    }
    TradingStyle::SwingTrader
}

fn collect_tags(text: &str, dictionary: &[(&str, &str)]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for (needle, tag) in dictionary {
        if text.contains(needle) && !tags.iter().any(|t| t == tag) {
            tags.push((*tag).to_string());
        }
    }
    tags
}

/// The first `N%` (possibly `N.M%`) in the text, tolerating a space or a
/// comparison sign before the percent.
fn first_percent(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'%' {
            continue;
        }
        let mut end = i;
        while end > 0 && bytes[end - 1] == b' ' {
            end -= 1;
        }
        let mut start = end;
        while start > 0 && (bytes[start - 1].is_ascii_digit() || bytes[start - 1] == b'.') {
            start -= 1;
        }
        if start < end {
            if let Ok(value) = text[start..end].parse::<f64>() {
                return Some(value);
            }
        }
    }
    None
}
