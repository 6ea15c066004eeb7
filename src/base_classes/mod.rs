pub mod engine;
pub mod orderbook_trait;
pub mod registry;
pub mod subscriptions;
pub mod types;
pub mod ws;
