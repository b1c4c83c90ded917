//! Recovery of structured signal/trade lists from subprocess stdout.
//!
//! Generated code is instructed to print JSON but anything can come back.
//! Four strategies run in order; the first that yields at least one record
//! wins. Total failure is an empty list, never an error.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::domain::models::{position_size, ExitReason, Signal, TradeRecord, TradeSide};

/// Object keys accepted as the record list on a top-level object. All are
/// equal citizens; the first present in this order is used.
const LIST_KEYS: [&str; 3] = ["matches", "signals", "trades"];

/// Parse scanner stdout into signals. Records missing the mandatory
/// {ticker, timestamp-or-date} keys are dropped; unknown keys are retained.
pub fn parse_signals(stdout: &str) -> Vec<Signal> {
    recover_records(stdout, "signal:")
        .into_iter()
        .filter_map(value_to_signal)
        .collect()
}

/// Parse executor stdout into trade records.
pub fn parse_trades(stdout: &str) -> Vec<TradeRecord> {
    recover_records(stdout, "trade:")
        .into_iter()
        .filter_map(value_to_trade)
        .collect()
}

/// Best-effort JSON value recovery for non-list payloads (the expert
/// analysis response reuses the same machinery).
pub fn recover_json_value(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    if let Some(value) = last_fenced_json(text) {
        return Some(value);
    }
    longest_balanced_json(text)
}

fn recover_records(stdout: &str, line_prefix: &str) -> Vec<Value> {
    // Strategy 1: the whole stdout is one JSON value.
    let trimmed = stdout.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let records = list_from_value(value);
        if !records.is_empty() {
            return records;
        }
    }

    // Strategy 2: the last fenced JSON block.
    if let Some(value) = last_fenced_json(stdout) {
        let records = list_from_value(value);
        if !records.is_empty() {
            return records;
        }
    }

    // Strategy 3: the longest balanced brace/bracket span.
    if let Some(value) = longest_balanced_json(stdout) {
        let records = list_from_value(value);
        if !records.is_empty() {
            return records;
        }
    }

    // Strategy 4: line-based scrape of `signal:`/`trade:` key=value lines.
    scrape_lines(stdout, line_prefix)
}

/// Treat an array as the list; on an object, accept the known list keys.
fn list_from_value(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.into_iter().filter(|v| v.is_object()).collect(),
        Value::Object(mut map) => {
            for key in LIST_KEYS {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return items.into_iter().filter(|v| v.is_object()).collect();
                }
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

fn last_fenced_json(text: &str) -> Option<Value> {
    let mut best: Option<Value> = None;
    let mut search_from = 0;

    while let Some(rel) = text[search_from..].find("```") {
        let fence_start = search_from + rel;
        let after_fence = fence_start + 3;
        let body_start = match text[after_fence..].find('\n') {
            Some(nl) => after_fence + nl + 1,
            None => break,
        };
        let Some(close_rel) = text[body_start..].find("```") else {
            break;
        };
        let body = &text[body_start..body_start + close_rel];
        if let Ok(value) = serde_json::from_str::<Value>(body.trim()) {
            best = Some(value);
        }
        search_from = body_start + close_rel + 3;
    }

    best
}

/// All top-level balanced `{...}`/`[...]` spans outside string literals,
/// tried longest-first until one parses. String literals are tracked at
/// every depth so a brace quoted in log noise cannot open a span; a raw
/// newline closes string mode, since JSON strings never contain one, which
/// bounds the damage an unmatched quote in noise can do to one line.
fn longest_balanced_json(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut depth = 0usize;
    let mut span_start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if b == b'\n' {
                in_string = false;
                escaped = false;
            } else if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => {
                if depth == 0 {
                    span_start = i;
                }
                depth += 1;
            }
            b'}' | b']' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        spans.push((span_start, i + 1));
                    }
                }
            }
            _ => {}
        }
    }

    spans.sort_by_key(|(start, end)| (std::cmp::Reverse(end - start), *start));
    spans
        .into_iter()
        .find_map(|(start, end)| serde_json::from_str::<Value>(&text[start..end]).ok())
}

/// `signal: ticker=AAPL timestamp=2024-01-05T14:30:00Z side=long`
fn scrape_lines(stdout: &str, prefix: &str) -> Vec<Value> {
    let mut records = Vec::new();

    for line in stdout.lines() {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix(prefix) else {
            continue;
        };

        let mut object = Map::new();
        for pair in rest.split_whitespace() {
            let pair = pair.trim_end_matches(',');
            if let Some((key, raw)) = pair.split_once('=') {
                let value = raw
                    .parse::<f64>()
                    .map(|n| {
                        serde_json::Number::from_f64(n).map_or_else(
                            || Value::String(raw.to_string()),
                            Value::Number,
                        )
                    })
                    .unwrap_or_else(|_| Value::String(raw.to_string()));
                object.insert(key.to_string(), value);
            }
        }
        if !object.is_empty() {
            records.push(Value::Object(object));
        }
    }

    records
}

/// Accept RFC3339, `YYYY-MM-DD HH:MM:SS`, a bare date (midnight UTC), or a
/// unix epoch in seconds or milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            if let Ok(date) = s.parse::<NaiveDate>() {
                return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
            }
            None
        }
        Value::Number(n) => {
            let epoch = n.as_i64()?;
            // Heuristic: values past the year 33658 in seconds are millis.
            if epoch > 1_000_000_000_000 {
                Utc.timestamp_millis_opt(epoch).single()
            } else {
                Utc.timestamp_opt(epoch, 0).single()
            }
        }
        _ => None,
    }
}

fn take_timestamp(map: &mut Map<String, Value>, keys: &[&str]) -> Option<DateTime<Utc>> {
    for key in keys {
        if let Some(raw) = map.get(*key) {
            if let Some(ts) = parse_timestamp(raw) {
                map.remove(*key);
                return Some(ts);
            }
        }
    }
    None
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            map.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}

fn take_f64(map: &mut Map<String, Value>, key: &str) -> Option<f64> {
    let value = map.get(key).and_then(Value::as_f64);
    if value.is_some() {
        map.remove(key);
    }
    value
}

fn value_to_signal(value: Value) -> Option<Signal> {
    let Value::Object(mut map) = value else {
        return None;
    };

    let ticker = take_string(&mut map, "ticker")?;
    let timestamp = take_timestamp(&mut map, &["timestamp", "date"])?;
    let side = take_string(&mut map, "side")
        .and_then(|s| TradeSide::parse_str(&s))
        .unwrap_or_default();

    Some(Signal {
        ticker,
        timestamp,
        side,
        extra: map,
    })
}

fn value_to_trade(value: Value) -> Option<TradeRecord> {
    let Value::Object(mut map) = value else {
        return None;
    };

    let ticker = take_string(&mut map, "ticker")?;
    let entry_time = take_timestamp(&mut map, &["entry_time", "timestamp", "date"])?;
    let exit_time = take_timestamp(&mut map, &["exit_time"]).unwrap_or(entry_time);
    let side = take_string(&mut map, "side")
        .and_then(|s| TradeSide::parse_str(&s))
        .unwrap_or_default();

    let entry_price = take_f64(&mut map, "entry_price").unwrap_or(0.0);
    let exit_price = take_f64(&mut map, "exit_price").unwrap_or(entry_price);
    let quantity = take_f64(&mut map, "quantity").unwrap_or_else(|| position_size(entry_price));

    let per_share = (exit_price - entry_price) * side.direction();
    let pnl = take_f64(&mut map, "pnl").unwrap_or(quantity * per_share);
    let pnl_pct = take_f64(&mut map, "pnl_pct").unwrap_or(if entry_price > 0.0 {
        per_share / entry_price
    } else {
        0.0
    });

    let exit_reason = map
        .remove("exit_reason")
        .and_then(|v| serde_json::from_value::<ExitReason>(v).ok())
        .unwrap_or_default();

    Some(TradeRecord {
        ticker,
        side,
        entry_time,
        entry_price,
        exit_time,
        exit_price,
        quantity,
        pnl,
        pnl_pct,
        exit_reason,
        extra: map,
    })
}
