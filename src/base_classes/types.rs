use rust_decimal::Decimal;
use serde::Serialize;

/// Exact decimal price. Never a binary float.
pub type Price = Decimal;
pub type Qty = Decimal;
/// Exchange update id.
pub type Seq = u64;
/// Milliseconds since the unix epoch.
pub type Ts = i64;

/// One `(price, quantity)` row of a view.
pub type Level = (Price, Qty);

/// Ordered read-out of a depth cache. Bids and asks each follow the ordering of the view that built them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DepthView {
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

impl DepthView {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Aggregate size of each side. `*_value` is the quote notional, Σ price × qty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DepthVolume {
    pub bid_qty: Qty,
    pub ask_qty: Qty,
    pub bid_value: Decimal,
    pub ask_value: Decimal,
}

/// Bootstrap state shared by the depth and chart caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    Uninitialized,
    Bootstrapping,
    Synced,
}

/// What happened to one incremental message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Held in the pending queue until the snapshot lands.
    Queued,
    Applied,
    /// At or behind the watermark; nothing changed.
    Stale,
}

/// Result of applying a snapshot or backfill and draining the pending queue behind it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub replayed: usize,
    pub discarded: usize,
    /// Queue entries lost to the pending bound before the snapshot arrived.
    pub overflowed: usize,
}

/// One OHLCV bar keyed by its open time. Always stored and replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candle {
    pub open_time: Ts,
    pub close_time: Ts,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Qty,
    pub quote_volume: Decimal,
    pub trade_count: u64,
    pub taker_buy_base_volume: Qty,
    pub taker_buy_quote_volume: Decimal,
    pub is_final: bool,
}

/// Column-wise read-out of a chart, ordered by open time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OhlcSeries {
    pub open_time: Vec<Ts>,
    pub open: Vec<Price>,
    pub high: Vec<Price>,
    pub low: Vec<Price>,
    pub close: Vec<Price>,
    pub volume: Vec<Qty>,
}
