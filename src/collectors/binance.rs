use serde_json::Value;
use tracing::{debug, trace};

use crate::base_classes::types::{Candle, UpdateOutcome};
use crate::error::ExchangeError;
use crate::exchanges::binance::messages::{DepthDiff, KlineEvent};
use crate::exchanges::binance::{ChartCache, DepthCache};

/// One decoded push message.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Depth(DepthDiff),
    Kline(KlineEvent),
    /// Subscription acks, trades and anything else this crate does not cache.
    Other,
}

/// Decodes a raw stream frame. Combined-stream frames (`{"stream":..,"data":..}`) are unwrapped.
pub fn decode(s: &str) -> Result<StreamMessage, ExchangeError> {
    let raw: Value = serde_json::from_str(s)?;
    let payload = match raw.get("stream") {
        Some(_) => raw.get("data").cloned().unwrap_or(Value::Null),
        None => raw,
    };

    match payload.get("e").and_then(|v| v.as_str()) {
        Some("depthUpdate") => Ok(StreamMessage::Depth(serde_json::from_value(payload)?)),
        Some("kline") => Ok(StreamMessage::Kline(serde_json::from_value(payload)?)),
        _ => Ok(StreamMessage::Other),
    }
}

/// Routes a depth diff into the book. Returns `None` when the diff is for another symbol.
pub fn apply_depth(diff: DepthDiff, book: &mut DepthCache) -> Option<UpdateOutcome> {
    if !diff.symbol.eq_ignore_ascii_case(book.symbol()) {
        debug!(expected = %book.symbol(), got = %diff.symbol, "depth diff for another symbol");
        return None;
    }
    let outcome = book.on_diff(diff);
    trace!(symbol = %book.symbol(), ?outcome, "depth diff routed");
    Some(outcome)
}

pub fn apply_kline(event: KlineEvent, chart: &mut ChartCache) -> Option<UpdateOutcome> {
    if !event.symbol.eq_ignore_ascii_case(chart.symbol()) || event.kline.interval != chart.interval() {
        debug!(
            expected = %chart.symbol(),
            got = %event.symbol,
            interval = %event.kline.interval,
            "kline for another chart"
        );
        return None;
    }
    Some(chart.on_candle(Candle::from(event.kline)))
}
