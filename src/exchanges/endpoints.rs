use crate::config::Market;
use crate::error::ExchangeError;

/// REST endpoint family. The family picks the host; the request path carries the prefix
/// (`/api/v3/...`, `/sapi/v1/...`, `/fapi/v1/...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointFamily {
    /// Spot public market data and spot account/trading.
    Api,
    /// Wallet, margin and savings endpoints.
    Sapi,
    /// Legacy withdrawal API.
    Wapi,
    /// USD-M futures.
    Fapi,
    /// USD-M futures analytics (`/futures/data/...`).
    FapiData,
    /// COIN-M futures.
    Dapi,
}

impl EndpointFamily {
    pub fn host(self, testnet: bool) -> &'static str {
        match (self, testnet) {
            (Self::Api, false) | (Self::Sapi, _) | (Self::Wapi, _) => BinanceRest::SPOT,
            (Self::Api, true) => BinanceRest::SPOT_TESTNET,
            (Self::Fapi, false) | (Self::FapiData, false) => BinanceRest::USD_FUTURES,
            (Self::Dapi, false) => BinanceRest::COIN_FUTURES,
            (Self::Fapi, true) | (Self::FapiData, true) | (Self::Dapi, true) => {
                BinanceRest::FUTURES_TESTNET
            }
        }
    }
}

pub struct BinanceRest;

impl BinanceRest {
    pub const SPOT: &'static str = "https://api.binance.com";
    pub const SPOT_TESTNET: &'static str = "https://testnet.binance.vision";
    pub const USD_FUTURES: &'static str = "https://fapi.binance.com";
    pub const COIN_FUTURES: &'static str = "https://dapi.binance.com";
    pub const FUTURES_TESTNET: &'static str = "https://testnet.binancefuture.com";

    pub const PING: &'static str = "/api/v3/ping";
    pub const TIME: &'static str = "/api/v3/time";
    pub const EXCHANGE_INFO: &'static str = "/api/v3/exchangeInfo";
    pub const DEPTH: &'static str = "/api/v3/depth";
    pub const KLINES: &'static str = "/api/v3/klines";
    pub const ACCOUNT: &'static str = "/api/v3/account";
    pub const ORDER: &'static str = "/api/v3/order";
    pub const OPEN_ORDERS: &'static str = "/api/v3/openOrders";

    pub const FUTURES_DEPTH: &'static str = "/fapi/v1/depth";
    pub const FUTURES_KLINES: &'static str = "/fapi/v1/klines";

    /// Endpoints that legitimately answer with a non-"success" `msg` field.
    pub const MSG_ALLOW_LIST: [&'static str; 3] = [
        "/wapi/v3/systemStatus.html",
        "/wapi/v3/accountStatus.html",
        "/sapi/v1/system/status",
    ];

    pub fn depth_path(market: Market) -> (EndpointFamily, &'static str) {
        match market {
            Market::Spot => (EndpointFamily::Api, Self::DEPTH),
            Market::UsdFutures => (EndpointFamily::Fapi, Self::FUTURES_DEPTH),
        }
    }

    pub fn klines_path(market: Market) -> (EndpointFamily, &'static str) {
        match market {
            Market::Spot => (EndpointFamily::Api, Self::KLINES),
            Market::UsdFutures => (EndpointFamily::Fapi, Self::FUTURES_KLINES),
        }
    }

    pub fn allows_message(path: &str) -> bool {
        Self::MSG_ALLOW_LIST.contains(&path)
    }
}

pub struct BinanceWs;

impl BinanceWs {
    pub const SPOT_BASE: &'static str = "wss://stream.binance.com:9443";
    pub const SPOT_TESTNET_BASE: &'static str = "wss://testnet.binance.vision";
    pub const FUTURES_BASE: &'static str = "wss://fstream.binance.com";
    pub const FUTURES_TESTNET_BASE: &'static str = "wss://stream.binancefuture.com";

    pub const DEPTH: &'static str = "depth";
    pub const KLINE_PREFIX: &'static str = "kline_";

    pub fn base(market: Market, testnet: bool) -> &'static str {
        match (market, testnet) {
            (Market::Spot, false) => Self::SPOT_BASE,
            (Market::Spot, true) => Self::SPOT_TESTNET_BASE,
            (Market::UsdFutures, false) => Self::FUTURES_BASE,
            (Market::UsdFutures, true) => Self::FUTURES_TESTNET_BASE,
        }
    }

    /// Raw single-stream URL for a topic.
    pub fn stream_url(base: &str, topic: &str) -> String {
        format!("{}/ws/{}", base.trim_end_matches('/'), topic)
    }

    /// `btcusdt@depth`
    pub fn depth_topic(symbol: &str) -> Result<String, ExchangeError> {
        let symbol = validate_symbol(symbol)?;
        Ok(format!("{}@{}", symbol.to_lowercase(), Self::DEPTH))
    }

    /// `btcusdt@kline_5m`
    pub fn kline_topic(symbol: &str, interval: &str) -> Result<String, ExchangeError> {
        let symbol = validate_symbol(symbol)?;
        if interval.trim().is_empty() {
            return Err(ExchangeError::Configuration(
                "kline interval cannot be empty".to_string(),
            ));
        }
        Ok(format!(
            "{}@{}{}",
            symbol.to_lowercase(),
            Self::KLINE_PREFIX,
            interval.trim()
        ))
    }
}

/// Upper-cases and checks a symbol (`btcusdt` -> `BTCUSDT`).
pub fn validate_symbol(symbol: &str) -> Result<String, ExchangeError> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(ExchangeError::InvalidSymbol(
            "Symbol cannot be empty".to_string(),
        ));
    }

    if !symbol.chars().all(char::is_alphanumeric) {
        return Err(ExchangeError::InvalidSymbol(format!(
            "Symbol '{}' contains invalid characters",
            symbol
        )));
    }

    Ok(symbol.to_uppercase())
}
