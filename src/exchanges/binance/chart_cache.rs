//! Candle series for one `(symbol, interval)` kept in sync from a REST backfill plus the
//! `@kline_<interval>` stream. Candles are keyed by open time and always replaced whole.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, trace, warn};

use crate::base_classes::types::{Candle, DrainReport, OhlcSeries, SyncState, Ts, UpdateOutcome};

pub struct ChartCache {
    symbol: String,
    interval: String,
    state: SyncState,
    /// Earliest backfilled open time. `None` until a non-empty backfill lands.
    first_open_time: Option<Ts>,
    candles: BTreeMap<Ts, Candle>,
    pending: VecDeque<Candle>,
    capacity: usize,
    max_pending: usize,
    overflowed: usize,
}

impl ChartCache {
    pub const DEFAULT_CAPACITY: usize = 500;
    pub const DEFAULT_MAX_PENDING: usize = 10_000;

    pub fn new(symbol: &str, interval: &str) -> Self {
        Self::with_limits(symbol, interval, Self::DEFAULT_CAPACITY, Self::DEFAULT_MAX_PENDING)
    }

    pub fn with_limits(symbol: &str, interval: &str, capacity: usize, max_pending: usize) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            interval: interval.to_string(),
            state: SyncState::Uninitialized,
            first_open_time: None,
            candles: BTreeMap::new(),
            pending: VecDeque::new(),
            capacity: capacity.max(1),
            max_pending: max_pending.max(1),
            overflowed: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> &str {
        &self.interval
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_synced(&self) -> bool {
        self.state == SyncState::Synced
    }

    pub fn first_open_time(&self) -> Option<Ts> {
        self.first_open_time
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn begin_bootstrap(&mut self) {
        if self.state == SyncState::Uninitialized {
            self.state = SyncState::Bootstrapping;
        }
    }

    pub fn on_candle(&mut self, candle: Candle) -> UpdateOutcome {
        match self.state {
            SyncState::Uninitialized | SyncState::Bootstrapping => {
                self.begin_bootstrap();
                if self.pending.len() >= self.max_pending {
                    self.pending.pop_front();
                    self.overflowed += 1;
                    warn!(
                        symbol = %self.symbol,
                        interval = %self.interval,
                        "pending candle queue full, dropping oldest"
                    );
                }
                debug!(
                    symbol = %self.symbol,
                    open_time = candle.open_time,
                    "queued candle until backfill"
                );
                self.pending.push_back(candle);
                UpdateOutcome::Queued
            }
            SyncState::Synced => self.merge_candle(candle),
        }
    }

    /// Seeds the series from a REST backfill and replays queued stream candles.
    pub fn apply_backfill(&mut self, backfill: Vec<Candle>) -> DrainReport {
        self.first_open_time = backfill.iter().map(|c| c.open_time).min();
        self.candles = backfill.into_iter().map(|c| (c.open_time, c)).collect();
        self.evict();
        self.state = SyncState::Synced;

        let mut report = DrainReport {
            overflowed: std::mem::take(&mut self.overflowed),
            ..DrainReport::default()
        };
        for candle in std::mem::take(&mut self.pending) {
            match self.merge_candle(candle) {
                UpdateOutcome::Applied => report.replayed += 1,
                _ => report.discarded += 1,
            }
        }

        debug!(
            symbol = %self.symbol,
            interval = %self.interval,
            candles = self.candles.len(),
            first_open_time = ?self.first_open_time,
            replayed = report.replayed,
            discarded = report.discarded,
            "chart backfill applied"
        );
        report
    }

    fn merge_candle(&mut self, candle: Candle) -> UpdateOutcome {
        if let Some(watermark) = self.first_open_time {
            if candle.open_time < watermark {
                trace!(
                    symbol = %self.symbol,
                    open_time = candle.open_time,
                    watermark,
                    "stale candle discarded"
                );
                return UpdateOutcome::Stale;
            }
        }
        self.candles.insert(candle.open_time, candle);
        self.evict();
        UpdateOutcome::Applied
    }

    /// Drops the oldest candles past capacity. The watermark follows the oldest candle kept so
    /// an update for an evicted open time comes back stale.
    fn evict(&mut self) {
        if self.candles.len() <= self.capacity {
            return;
        }
        while self.candles.len() > self.capacity {
            self.candles.pop_first();
        }
        self.first_open_time = self.candles.keys().next().copied();
    }

    pub fn candle(&self, open_time: Ts) -> Option<&Candle> {
        self.candles.get(&open_time)
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.candles.values().next_back()
    }

    /// Candles ordered by open time.
    pub fn series(&self) -> Vec<Candle> {
        self.candles.values().cloned().collect()
    }

    pub fn ohlc(&self) -> OhlcSeries {
        let mut out = OhlcSeries::default();
        for candle in self.candles.values() {
            out.open_time.push(candle.open_time);
            out.open.push(candle.open);
            out.high.push(candle.high);
            out.low.push(candle.low);
            out.close.push(candle.close);
            out.volume.push(candle.volume);
        }
        out
    }
}
