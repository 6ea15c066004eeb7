//! Local order book kept in sync from a REST snapshot plus the `@depth` diff stream.
//!
//! The stream is opened first. Diffs that arrive before the snapshot are queued verbatim;
//! once the snapshot lands its `lastUpdateId` becomes the watermark and the queue is
//! replayed in receipt order through the same merge as live diffs. A diff whose final id
//! is at or below the watermark is stale and dropped. A zero quantity deletes the level.

use std::collections::{BTreeMap, VecDeque};

use rust_decimal::Decimal;
use tracing::{debug, trace, warn};

use crate::base_classes::orderbook_trait::OrderBookOps;
use crate::base_classes::types::{
    DepthView, DepthVolume, DrainReport, Level, Price, Qty, Seq, SyncState, UpdateOutcome,
};
use crate::exchanges::binance::messages::{DepthDiff, DepthSnapshot};

pub struct DepthCache {
    symbol: String,
    state: SyncState,
    last_update_id: Seq,
    bids: BTreeMap<Price, Qty>,
    asks: BTreeMap<Price, Qty>,
    pending: VecDeque<DepthDiff>,
    max_pending: usize,
    overflowed: usize,
}

impl DepthCache {
    pub const DEFAULT_MAX_PENDING: usize = 10_000;

    pub fn new(symbol: &str) -> Self {
        Self::with_max_pending(symbol, Self::DEFAULT_MAX_PENDING)
    }

    pub fn with_max_pending(symbol: &str, max_pending: usize) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            state: SyncState::Uninitialized,
            last_update_id: 0,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            pending: VecDeque::new(),
            max_pending: max_pending.max(1),
            overflowed: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[inline(always)]
    pub fn state(&self) -> SyncState {
        self.state
    }

    #[inline(always)]
    pub fn is_synced(&self) -> bool {
        self.state == SyncState::Synced
    }

    /// Watermark: id of the last applied snapshot or diff. Zero before the first snapshot.
    #[inline(always)]
    pub fn last_update_id(&self) -> Seq {
        self.last_update_id
    }

    pub fn bids(&self) -> &BTreeMap<Price, Qty> {
        &self.bids
    }

    pub fn asks(&self) -> &BTreeMap<Price, Qty> {
        &self.asks
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Marks the stream as open. Diffs received from here on are queued until the snapshot.
    pub fn begin_bootstrap(&mut self) {
        if self.state == SyncState::Uninitialized {
            self.state = SyncState::Bootstrapping;
        }
    }

    /// Feeds one incremental update, queueing it if no snapshot has been applied yet.
    pub fn on_diff(&mut self, diff: DepthDiff) -> UpdateOutcome {
        match self.state {
            SyncState::Uninitialized | SyncState::Bootstrapping => {
                self.begin_bootstrap();
                if self.pending.len() >= self.max_pending {
                    self.pending.pop_front();
                    self.overflowed += 1;
                    warn!(
                        symbol = %self.symbol,
                        max_pending = self.max_pending,
                        "pending depth queue full, dropping oldest diff"
                    );
                }
                debug!(
                    symbol = %self.symbol,
                    first_update_id = diff.first_update_id,
                    final_update_id = diff.final_update_id,
                    "queued diff until snapshot"
                );
                self.pending.push_back(diff);
                UpdateOutcome::Queued
            }
            SyncState::Synced => self.merge_diff(&diff),
        }
    }

    /// Replaces both sides with the snapshot, then replays every queued diff in receipt order.
    ///
    /// Returns `None` and leaves the cache untouched when the snapshot is older than the
    /// current watermark.
    pub fn apply_snapshot(&mut self, snapshot: &DepthSnapshot) -> Option<DrainReport> {
        if snapshot.last_update_id < self.last_update_id {
            debug!(
                symbol = %self.symbol,
                snapshot_id = snapshot.last_update_id,
                watermark = self.last_update_id,
                "ignoring snapshot older than watermark"
            );
            return None;
        }

        self.bids = collect_side(&snapshot.bids);
        self.asks = collect_side(&snapshot.asks);
        self.last_update_id = snapshot.last_update_id;
        self.state = SyncState::Synced;

        let mut report = DrainReport {
            overflowed: std::mem::take(&mut self.overflowed),
            ..DrainReport::default()
        };
        let queued = std::mem::take(&mut self.pending);
        for diff in &queued {
            match self.merge_diff(diff) {
                UpdateOutcome::Applied => report.replayed += 1,
                _ => report.discarded += 1,
            }
        }

        debug!(
            symbol = %self.symbol,
            watermark = self.last_update_id,
            replayed = report.replayed,
            discarded = report.discarded,
            "depth snapshot applied"
        );
        Some(report)
    }

    fn merge_diff(&mut self, diff: &DepthDiff) -> UpdateOutcome {
        if diff.final_update_id <= self.last_update_id {
            trace!(
                symbol = %self.symbol,
                final_update_id = diff.final_update_id,
                watermark = self.last_update_id,
                "stale diff discarded"
            );
            return UpdateOutcome::Stale;
        }
        apply_levels(&mut self.bids, &diff.bids);
        apply_levels(&mut self.asks, &diff.asks);
        self.last_update_id = diff.final_update_id;
        UpdateOutcome::Applied
    }

    /// Bids descending and asks ascending by price, each truncated to `limit`.
    pub fn sorted_view(&self, limit: usize) -> DepthView {
        DepthView {
            bids: self
                .bids
                .iter()
                .rev()
                .take(limit)
                .map(|(p, q)| (*p, *q))
                .collect(),
            asks: self.asks.iter().take(limit).map(|(p, q)| (*p, *q)).collect(),
        }
    }

    /// Running quantity totals. Bids are walked from the lowest price up; asks are walked
    /// from the lowest price up and then reversed, so the largest ask total comes first.
    pub fn cumulative_view(&self) -> DepthView {
        DepthView {
            bids: running_sum(self.bids.iter()),
            asks: {
                let mut asks = running_sum(self.asks.iter());
                asks.reverse();
                asks
            },
        }
    }

    #[inline(always)]
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.keys().next_back().copied()
    }

    #[inline(always)]
    pub fn best_ask(&self) -> Option<Price> {
        self.asks.keys().next().copied()
    }

    pub fn depth_volume(&self) -> DepthVolume {
        let side = |levels: &BTreeMap<Price, Qty>| {
            levels
                .iter()
                .fold((Decimal::ZERO, Decimal::ZERO), |(qty, value), (p, q)| {
                    (qty + *q, value + *p * *q)
                })
        };
        let (bid_qty, bid_value) = side(&self.bids);
        let (ask_qty, ask_value) = side(&self.asks);
        DepthVolume {
            bid_qty,
            ask_qty,
            bid_value,
            ask_value,
        }
    }
}

fn collect_side(levels: &[Level]) -> BTreeMap<Price, Qty> {
    levels
        .iter()
        .filter(|(_, qty)| !qty.is_zero())
        .map(|(price, qty)| (*price, *qty))
        .collect()
}

#[inline(always)]
fn apply_levels(side: &mut BTreeMap<Price, Qty>, levels: &[Level]) {
    for (price, qty) in levels {
        if qty.is_zero() {
            side.remove(price);
        } else {
            side.insert(*price, *qty);
        }
    }
}

fn running_sum<'a>(levels: impl Iterator<Item = (&'a Price, &'a Qty)>) -> Vec<Level> {
    let mut total = Decimal::ZERO;
    levels
        .map(|(price, qty)| {
            total += *qty;
            (*price, total)
        })
        .collect()
}

impl OrderBookOps for DepthCache {
    #[inline(always)]
    fn symbol(&self) -> &str {
        self.symbol()
    }

    #[inline(always)]
    fn is_initialized(&self) -> bool {
        self.is_synced()
    }

    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    #[inline(always)]
    fn best_bid(&self) -> Option<Price> {
        self.best_bid()
    }

    #[inline(always)]
    fn best_ask(&self) -> Option<Price> {
        self.best_ask()
    }

    #[inline(always)]
    fn top_levels(&self, depth: usize) -> DepthView {
        self.sorted_view(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(id: Seq, bids: &[Level], asks: &[Level]) -> DepthSnapshot {
        DepthSnapshot {
            last_update_id: id,
            bids: bids.to_vec(),
            asks: asks.to_vec(),
        }
    }

    fn diff(first: Seq, last: Seq, bids: &[Level], asks: &[Level]) -> DepthDiff {
        DepthDiff {
            event_time: 0,
            symbol: "BNBBTC".to_string(),
            first_update_id: first,
            final_update_id: last,
            bids: bids.to_vec(),
            asks: asks.to_vec(),
        }
    }

    fn synced(id: Seq, bids: &[Level], asks: &[Level]) -> DepthCache {
        let mut cache = DepthCache::new("bnbbtc");
        cache.begin_bootstrap();
        cache.apply_snapshot(&snapshot(id, bids, asks)).unwrap();
        cache
    }

    #[test]
    fn test_state_transitions() {
        let mut cache = DepthCache::new("bnbbtc");
        assert_eq!(cache.state(), SyncState::Uninitialized);
        assert_eq!(cache.symbol(), "BNBBTC");
        assert_eq!(cache.last_update_id(), 0);

        cache.begin_bootstrap();
        assert_eq!(cache.state(), SyncState::Bootstrapping);

        let report = cache.apply_snapshot(&snapshot(1, &[], &[])).unwrap();
        assert_eq!(report, DrainReport::default());
        assert_eq!(cache.state(), SyncState::Synced);
        assert!(cache.is_initialized());
    }

    #[test]
    fn test_diffs_queue_until_snapshot() {
        let mut cache = DepthCache::new("BNBBTC");
        cache.begin_bootstrap();
        let outcome = cache.on_diff(diff(1, 2, &[(dec!(10), dec!(1))], &[]));
        assert_eq!(outcome, UpdateOutcome::Queued);
        assert_eq!(cache.pending_len(), 1);
        assert!(cache.bids().is_empty());
        assert_eq!(cache.last_update_id(), 0);
    }

    #[test]
    fn test_bootstrap_replay_applies_newer_diff() {
        let mut cache = DepthCache::new("BNBBTC");
        cache.begin_bootstrap();
        cache.on_diff(diff(95, 101, &[(dec!(10), dec!(2))], &[]));

        let report = cache
            .apply_snapshot(&snapshot(100, &[(dec!(10), dec!(1))], &[(dec!(11), dec!(1))]))
            .unwrap();

        assert_eq!(report.replayed, 1);
        assert_eq!(report.discarded, 0);
        assert_eq!(cache.bids().get(&dec!(10)), Some(&dec!(2)));
        assert_eq!(cache.asks().get(&dec!(11)), Some(&dec!(1)));
        assert_eq!(cache.last_update_id(), 101);
        assert_eq!(cache.pending_len(), 0);
    }

    #[test]
    fn test_bootstrap_replay_each_queued_diff_in_order() {
        let mut cache = DepthCache::new("BNBBTC");
        cache.begin_bootstrap();
        // covered by the snapshot
        cache.on_diff(diff(90, 99, &[(dec!(5), dec!(9))], &[]));
        cache.on_diff(diff(100, 102, &[(dec!(10), dec!(3))], &[]));
        cache.on_diff(diff(103, 104, &[(dec!(10), dec!(0))], &[(dec!(12), dec!(4))]));

        let report = cache
            .apply_snapshot(&snapshot(100, &[(dec!(10), dec!(1))], &[(dec!(11), dec!(1))]))
            .unwrap();

        assert_eq!(report.replayed, 2);
        assert_eq!(report.discarded, 1);
        assert!(cache.bids().is_empty());
        assert_eq!(cache.asks().len(), 2);
        assert_eq!(cache.last_update_id(), 104);
    }

    #[test]
    fn test_zero_quantity_removes_level() {
        let mut cache = synced(10, &[(dec!(10), dec!(1)), (dec!(9), dec!(2))], &[]);
        let outcome = cache.on_diff(diff(11, 11, &[(dec!(10), dec!(0.0))], &[]));
        assert_eq!(outcome, UpdateOutcome::Applied);
        assert!(!cache.bids().contains_key(&dec!(10)));
        assert!(cache.bids().values().all(|q| !q.is_zero()));

        // deleting an absent level is a no-op beyond the watermark
        cache.on_diff(diff(12, 12, &[(dec!(42), dec!(0))], &[]));
        assert_eq!(cache.bids().len(), 1);
        assert_eq!(cache.last_update_id(), 12);
    }

    #[test]
    fn test_snapshot_zero_levels_are_not_stored() {
        let cache = synced(1, &[(dec!(10), dec!(0)), (dec!(9), dec!(1))], &[]);
        assert_eq!(cache.bids().len(), 1);
    }

    #[test]
    fn test_stale_update_leaves_state_unchanged() {
        let mut cache = synced(50, &[(dec!(10), dec!(1))], &[(dec!(11), dec!(1))]);
        let bids = cache.bids().clone();
        let asks = cache.asks().clone();

        assert_eq!(
            cache.on_diff(diff(45, 50, &[(dec!(10), dec!(7))], &[(dec!(11), dec!(0))])),
            UpdateOutcome::Stale
        );
        assert_eq!(cache.bids(), &bids);
        assert_eq!(cache.asks(), &asks);
        assert_eq!(cache.last_update_id(), 50);
    }

    #[test]
    fn test_watermark_is_monotonic() {
        let mut cache = synced(10, &[], &[]);
        let mut previous = cache.last_update_id();
        for (first, last) in [(11, 15), (12, 13), (16, 20), (5, 9), (21, 21)] {
            cache.on_diff(diff(first, last, &[(dec!(1), dec!(1))], &[]));
            assert!(cache.last_update_id() >= previous);
            previous = cache.last_update_id();
        }
        assert_eq!(previous, 21);
    }

    #[test]
    fn test_snapshot_reapplication_is_idempotent() {
        let snap = snapshot(7, &[(dec!(10), dec!(1))], &[(dec!(11), dec!(2))]);
        let mut cache = DepthCache::new("BNBBTC");
        cache.begin_bootstrap();
        cache.apply_snapshot(&snap).unwrap();
        let (bids, asks) = (cache.bids().clone(), cache.asks().clone());

        cache.apply_snapshot(&snap).unwrap();
        assert_eq!(cache.bids(), &bids);
        assert_eq!(cache.asks(), &asks);
    }

    #[test]
    fn test_older_snapshot_rejected() {
        let mut cache = synced(10, &[(dec!(10), dec!(1))], &[]);
        cache.on_diff(diff(11, 20, &[(dec!(10), dec!(5))], &[]));
        assert!(cache.apply_snapshot(&snapshot(15, &[], &[])).is_none());
        assert_eq!(cache.bids().get(&dec!(10)), Some(&dec!(5)));
        assert_eq!(cache.last_update_id(), 20);
    }

    #[test]
    fn test_pending_queue_bound_drops_oldest() {
        let mut cache = DepthCache::with_max_pending("BNBBTC", 2);
        cache.begin_bootstrap();
        cache.on_diff(diff(1, 1, &[(dec!(1), dec!(1))], &[]));
        cache.on_diff(diff(2, 2, &[(dec!(2), dec!(1))], &[]));
        cache.on_diff(diff(3, 3, &[(dec!(3), dec!(1))], &[]));
        assert_eq!(cache.pending_len(), 2);

        let report = cache.apply_snapshot(&snapshot(0, &[], &[])).unwrap();
        assert_eq!(report.overflowed, 1);
        assert_eq!(report.replayed, 2);
        assert!(!cache.bids().contains_key(&dec!(1)));
    }

    #[test]
    fn test_sorted_view_orders_and_truncates() {
        let cache = synced(
            1,
            &[(dec!(9), dec!(1)), (dec!(10), dec!(2)), (dec!(8), dec!(3))],
            &[(dec!(12), dec!(1)), (dec!(11), dec!(2)), (dec!(13), dec!(3))],
        );
        let view = cache.sorted_view(2);
        assert_eq!(view.bids, vec![(dec!(10), dec!(2)), (dec!(9), dec!(1))]);
        assert_eq!(view.asks, vec![(dec!(11), dec!(2)), (dec!(12), dec!(1))]);
        assert_eq!(cache.best_bid(), Some(dec!(10)));
        assert_eq!(cache.best_ask(), Some(dec!(11)));
        assert_eq!(cache.mid_price(), Some(dec!(10.5)));
        assert_eq!(cache.spread(), Some(dec!(1)));
        assert_eq!(cache.best_bid_level(), Some((dec!(10), dec!(2))));
        assert_eq!(cache.best_ask_level(), Some((dec!(11), dec!(2))));
        assert!(!view.is_empty());
    }

    #[test]
    fn test_cumulative_view() {
        let cache = synced(
            1,
            &[(dec!(10), dec!(1)), (dec!(9), dec!(2))],
            &[(dec!(11), dec!(1)), (dec!(12), dec!(2))],
        );
        let view = cache.cumulative_view();
        assert_eq!(view.bids, vec![(dec!(9), dec!(2)), (dec!(10), dec!(3))]);
        assert_eq!(view.asks, vec![(dec!(12), dec!(3)), (dec!(11), dec!(1))]);
    }

    #[test]
    fn test_best_levels_empty_book() {
        let cache = synced(1, &[], &[]);
        assert_eq!(cache.best_bid(), None);
        assert_eq!(cache.best_ask(), None);
        assert_eq!(cache.mid_price(), None);
        assert_eq!(cache.best_bid_level(), None);
        assert!(OrderBookOps::is_empty(&cache));
        assert!(cache.sorted_view(5).is_empty());
    }

    #[test]
    fn test_depth_volume() {
        let cache = synced(
            1,
            &[(dec!(10), dec!(1)), (dec!(9), dec!(2))],
            &[(dec!(11), dec!(0.5))],
        );
        let volume = cache.depth_volume();
        assert_eq!(volume.bid_qty, dec!(3));
        assert_eq!(volume.bid_value, dec!(28));
        assert_eq!(volume.ask_qty, dec!(0.5));
        assert_eq!(volume.ask_value, dec!(5.5));
    }
}
