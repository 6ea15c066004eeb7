use rust_decimal::Decimal;
use serde::Deserialize;

use crate::base_classes::types::{Candle, Level, Seq, Ts};

/// REST `GET /api/v3/depth` body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: Seq,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// `<symbol>@depth` diff event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DepthDiff {
    #[serde(rename = "E", default)]
    pub event_time: Ts,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: Seq,
    #[serde(rename = "u")]
    pub final_update_id: Seq,
    #[serde(rename = "b", default)]
    pub bids: Vec<Level>,
    #[serde(rename = "a", default)]
    pub asks: Vec<Level>,
}

/// `<symbol>@kline_<interval>` event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KlineEvent {
    #[serde(rename = "E", default)]
    pub event_time: Ts,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: KlineData,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KlineData {
    #[serde(rename = "t")]
    pub open_time: Ts,
    #[serde(rename = "T")]
    pub close_time: Ts,
    #[serde(rename = "i")]
    pub interval: String,
    #[serde(rename = "o")]
    pub open: Decimal,
    #[serde(rename = "h")]
    pub high: Decimal,
    #[serde(rename = "l")]
    pub low: Decimal,
    #[serde(rename = "c")]
    pub close: Decimal,
    #[serde(rename = "v")]
    pub volume: Decimal,
    #[serde(rename = "q")]
    pub quote_volume: Decimal,
    #[serde(rename = "n", default)]
    pub trade_count: u64,
    #[serde(rename = "V", default)]
    pub taker_buy_base_volume: Decimal,
    #[serde(rename = "Q", default)]
    pub taker_buy_quote_volume: Decimal,
    #[serde(rename = "x")]
    pub is_final: bool,
}

impl From<KlineData> for Candle {
    fn from(k: KlineData) -> Self {
        Candle {
            open_time: k.open_time,
            close_time: k.close_time,
            open: k.open,
            high: k.high,
            low: k.low,
            close: k.close,
            volume: k.volume,
            quote_volume: k.quote_volume,
            trade_count: k.trade_count,
            taker_buy_base_volume: k.taker_buy_base_volume,
            taker_buy_quote_volume: k.taker_buy_quote_volume,
            is_final: k.is_final,
        }
    }
}

/// One row of `GET /api/v3/klines`.
///
/// Binance returns rows as mixed arrays:
/// `[open_time, open, high, low, close, volume, close_time, quote_volume, trades,
///   taker_base, taker_quote, ignore]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestKline {
    pub open_time: Ts,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: Ts,
    pub quote_volume: Decimal,
    pub trade_count: u64,
    pub taker_buy_base_volume: Decimal,
    pub taker_buy_quote_volume: Decimal,
}

impl RestKline {
    /// A REST row is final once its close time has passed.
    pub fn into_candle(self, now_ms: Ts) -> Candle {
        Candle {
            open_time: self.open_time,
            close_time: self.close_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            quote_volume: self.quote_volume,
            trade_count: self.trade_count,
            taker_buy_base_volume: self.taker_buy_base_volume,
            taker_buy_quote_volume: self.taker_buy_quote_volume,
            is_final: self.close_time < now_ms,
        }
    }
}

fn next_field<'de, A, T>(seq: &mut A, name: &'static str) -> Result<T, A::Error>
where
    A: serde::de::SeqAccess<'de>,
    T: Deserialize<'de>,
{
    seq.next_element::<T>()?
        .ok_or_else(|| serde::de::Error::missing_field(name))
}

impl<'de> Deserialize<'de> for RestKline {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct RestKlineVisitor;

        impl<'de> serde::de::Visitor<'de> for RestKlineVisitor {
            type Value = RestKline;

            fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                formatter.write_str("a Binance kline array with at least 11 elements")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let kline = RestKline {
                    open_time: next_field(&mut seq, "open_time")?,
                    open: next_field(&mut seq, "open")?,
                    high: next_field(&mut seq, "high")?,
                    low: next_field(&mut seq, "low")?,
                    close: next_field(&mut seq, "close")?,
                    volume: next_field(&mut seq, "volume")?,
                    close_time: next_field(&mut seq, "close_time")?,
                    quote_volume: next_field(&mut seq, "quote_volume")?,
                    trade_count: next_field(&mut seq, "trade_count")?,
                    taker_buy_base_volume: next_field(&mut seq, "taker_buy_base_volume")?,
                    taker_buy_quote_volume: next_field(&mut seq, "taker_buy_quote_volume")?,
                };

                while seq.next_element::<serde::de::IgnoredAny>()?.is_some() {}

                Ok(kline)
            }
        }

        deserializer.deserialize_seq(RestKlineVisitor)
    }
}
