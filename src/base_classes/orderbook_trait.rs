use rust_decimal::Decimal;

use crate::base_classes::types::{DepthView, Level, Price};

/// Read access shared by every local book the crate maintains.
pub trait OrderBookOps {
    fn symbol(&self) -> &str;

    /// True once a snapshot has been applied.
    fn is_initialized(&self) -> bool;

    fn is_empty(&self) -> bool;

    fn best_bid(&self) -> Option<Price>;

    fn best_ask(&self) -> Option<Price>;

    /// Bids descending, asks ascending, each truncated to `depth`.
    fn top_levels(&self, depth: usize) -> DepthView;

    fn best_bid_level(&self) -> Option<Level> {
        self.top_levels(1).bids.first().copied()
    }

    fn best_ask_level(&self) -> Option<Level> {
        self.top_levels(1).asks.first().copied()
    }

    fn mid_price(&self) -> Option<Price> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some((bid + ask) / Decimal::TWO)
    }

    fn spread(&self) -> Option<Price> {
        Some(self.best_ask()? - self.best_bid()?)
    }
}
