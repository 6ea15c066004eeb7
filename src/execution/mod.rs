pub mod client;
pub mod params;
pub mod signer;

pub use client::{BinanceClient, NewOrder, OrderSide, OrderType, Request};
pub use params::{ParamValue, Params};
