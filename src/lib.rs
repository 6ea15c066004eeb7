pub mod base_classes;
pub mod collectors;
pub mod config;
pub mod error;
pub mod exchanges;
pub mod execution;
pub mod utils;

pub use base_classes::engine::{MarketDataEngine, MarketDataSource, SubscriptionHandle};
pub use base_classes::registry::{ChartCaches, ChartKey, DepthCaches};
pub use config::ClientConfig;
pub use error::ExchangeError;
pub use exchanges::binance::{ChartCache, DepthCache};
pub use execution::BinanceClient;
