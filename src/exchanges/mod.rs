pub mod binance;
pub mod endpoints;
