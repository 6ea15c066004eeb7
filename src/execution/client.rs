use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::base_classes::engine::MarketDataSource;
use crate::base_classes::types::{Candle, Ts};
use crate::config::{ClientConfig, Credentials};
use crate::error::ExchangeError;
use crate::exchanges::binance::messages::{DepthSnapshot, RestKline};
use crate::exchanges::endpoints::{validate_symbol, BinanceRest, EndpointFamily};
use crate::execution::params::Params;
use crate::execution::signer::sign;
use crate::utils::time::now_ms;

pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";
pub const USED_WEIGHT_HEADER: &str = "x-mbx-used-weight";
pub const USED_WEIGHT_1M_HEADER: &str = "x-mbx-used-weight-1m";

/// A logical call before it is turned into a URL or body.
#[derive(Debug, Clone)]
pub struct Request {
    pub family: EndpointFamily,
    pub path: String,
    pub method: Method,
    pub params: Params,
    pub signed: bool,
}

impl Request {
    pub fn new(method: Method, family: EndpointFamily, path: &str) -> Self {
        Self {
            family,
            path: path.to_string(),
            method,
            params: Params::new(),
            signed: false,
        }
    }

    pub fn get(family: EndpointFamily, path: &str) -> Self {
        Self::new(Method::GET, family, path)
    }

    pub fn post(family: EndpointFamily, path: &str) -> Self {
        Self::new(Method::POST, family, path)
    }

    pub fn delete(family: EndpointFamily, path: &str) -> Self {
        Self::new(Method::DELETE, family, path)
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }
}

/// The exact wire form of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    /// Encoded parameters as sent, including `timestamp` and `signature` when signed.
    pub query: String,
    /// Form body for POST; every other method carries its parameters in the URL.
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct LastRequest {
    pub method: Method,
    pub url: String,
    pub params: String,
    pub status: u16,
    pub response_headers: BTreeMap<String, String>,
    pub body: Value,
}

/// Request weight the exchange reported on the most recent response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimits {
    pub used_weight: Option<u64>,
    pub used_weight_1m: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
    LimitMaker,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Limit => "LIMIT",
            Self::Market => "MARKET",
            Self::LimitMaker => "LIMIT_MAKER",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    /// Defaults to `GTC` for limit orders.
    pub time_in_force: Option<String>,
    pub client_order_id: Option<String>,
}

impl NewOrder {
    pub fn limit(symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            time_in_force: None,
            client_order_id: None,
        }
    }

    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            time_in_force: None,
            client_order_id: None,
        }
    }

    fn to_params(&self) -> Result<Params, ExchangeError> {
        let mut params = Params::new()
            .with("symbol", validate_symbol(&self.symbol)?)
            .with("side", self.side.as_str())
            .with("type", self.order_type.as_str());
        if self.order_type == OrderType::Limit {
            let tif = self.time_in_force.as_deref().unwrap_or("GTC");
            params.push("timeInForce", tif);
        }
        params.push("quantity", self.quantity.normalize());
        if let Some(price) = self.price {
            params.push("price", price.normalize());
        } else if self.order_type != OrderType::Market {
            return Err(ExchangeError::Configuration(format!(
                "{} order needs a price",
                self.order_type.as_str()
            )));
        }
        Ok(params.with_opt("newClientOrderId", self.client_order_id.as_deref()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balance {
    pub free: Decimal,
    pub locked: Decimal,
}

#[derive(Deserialize)]
struct RawBalance {
    asset: String,
    free: Decimal,
    locked: Decimal,
}

/// Signed-request builder and HTTP client for the Binance REST API.
pub struct BinanceClient {
    http: reqwest::Client,
    config: ClientConfig,
    credentials: Option<Credentials>,
    time_offset_ms: AtomicI64,
    last_request: Mutex<Option<LastRequest>>,
    rate_limits: Mutex<RateLimits>,
}

impl BinanceClient {
    pub fn new(config: ClientConfig) -> Result<Self, ExchangeError> {
        let http = reqwest::Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            http,
            credentials: config.credentials(),
            config,
            time_offset_ms: AtomicI64::new(0),
            last_request: Mutex::new(None),
            rate_limits: Mutex::new(RateLimits::default()),
        })
    }

    /// Builds the client and, when `use_server_time` is set, measures the clock offset.
    pub async fn connect(config: ClientConfig) -> Result<Self, ExchangeError> {
        let client = Self::new(config)?;
        if client.config.use_server_time {
            client.sync_time().await?;
        }
        Ok(client)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn time_offset_ms(&self) -> i64 {
        self.time_offset_ms.load(Ordering::Relaxed)
    }

    pub fn set_time_offset_ms(&self, offset: i64) {
        self.time_offset_ms.store(offset, Ordering::Relaxed);
    }

    pub fn last_request(&self) -> Option<LastRequest> {
        self.last_request.lock().clone()
    }

    pub fn rate_limits(&self) -> RateLimits {
        *self.rate_limits.lock()
    }

    fn base_url(&self, family: EndpointFamily) -> String {
        match &self.config.rest_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => family.host(self.config.testnet).to_string(),
        }
    }

    /// Turns a logical request into its wire form. `now_ms` is local time; the stored clock
    /// offset is added before it becomes the `timestamp` parameter.
    pub fn build_at(&self, req: &Request, now_ms: Ts) -> Result<PreparedRequest, ExchangeError> {
        let query = if req.signed {
            let credentials = self.credentials.as_ref().ok_or_else(|| {
                ExchangeError::Configuration(format!(
                    "{} requires an api key and secret",
                    req.path
                ))
            })?;
            let mut params = req.params.clone();
            if self.config.recv_window_ms > 0 && params.get("recvWindow").is_none() {
                params.push("recvWindow", self.config.recv_window_ms);
            }
            params.push("timestamp", now_ms + self.time_offset_ms());
            let query = params.encode()?;
            let signature = sign(credentials.api_secret(), &query)?;
            format!("{query}&signature={signature}")
        } else {
            req.params.encode()?
        };

        let mut headers = Vec::new();
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            headers.push((API_KEY_HEADER.to_string(), key.to_string()));
        }

        let endpoint = format!("{}{}", self.base_url(req.family), req.path);
        let (url, body) = if req.method == Method::POST {
            (endpoint, Some(query.clone()))
        } else if query.is_empty() {
            (endpoint, None)
        } else {
            (format!("{endpoint}?{query}"), None)
        };

        Ok(PreparedRequest {
            method: req.method.clone(),
            url,
            query,
            body,
            headers,
        })
    }

    /// Sends a request and returns the parsed JSON body.
    pub async fn send(&self, req: Request) -> Result<Value, ExchangeError> {
        let prepared = self.build_at(&req, now_ms())?;
        debug!(method = %prepared.method, url = %prepared.url, "binance request");

        let mut builder = self.http.request(prepared.method.clone(), prepared.url.as_str());
        for (name, value) in &prepared.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &prepared.body {
            builder = builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        self.record_rate_limits(&headers);
        let text = response.text().await?;

        let parsed = if text.trim().is_empty() {
            Ok(Value::Null)
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(v) => Ok(v),
                Err(_) if !status.is_success() => Ok(Value::String(text.clone())),
                Err(e) => Err(e),
            }
        };

        // recorded before any parse error is returned
        *self.last_request.lock() = Some(LastRequest {
            method: prepared.method,
            url: prepared.url,
            params: prepared.query,
            status: status.as_u16(),
            response_headers: header_map(&headers),
            body: parsed
                .as_ref()
                .cloned()
                .unwrap_or_else(|_| Value::String(text.clone())),
        });
        let body = parsed?;

        if !status.is_success() {
            warn!(status = status.as_u16(), path = %req.path, body = %text, "binance error response");
            return Err(ExchangeError::Exchange {
                status: status.as_u16(),
                body: text,
            });
        }
        if let Some(msg) = body.get("msg").and_then(|m| m.as_str()) {
            if msg != "success" && !BinanceRest::allows_message(&req.path) {
                warn!(path = %req.path, msg, "binance error message");
                return Err(ExchangeError::Exchange {
                    status: status.as_u16(),
                    body: text,
                });
            }
        }
        Ok(body)
    }

    fn record_rate_limits(&self, headers: &HeaderMap) {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
        };
        let mut limits = self.rate_limits.lock();
        if let Some(w) = read(USED_WEIGHT_HEADER) {
            limits.used_weight = Some(w);
        }
        if let Some(w) = read(USED_WEIGHT_1M_HEADER) {
            limits.used_weight_1m = Some(w);
        }
    }

    pub async fn ping(&self) -> Result<(), ExchangeError> {
        self.send(Request::get(EndpointFamily::Api, BinanceRest::PING))
            .await
            .map(|_| ())
    }

    pub async fn server_time(&self) -> Result<Ts, ExchangeError> {
        let body = self
            .send(Request::get(EndpointFamily::Api, BinanceRest::TIME))
            .await?;
        body.get("serverTime")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ExchangeError::Parse(format!("serverTime missing in {body}")))
    }

    /// Measures `server - local` and applies it to every later signed timestamp.
    pub async fn sync_time(&self) -> Result<i64, ExchangeError> {
        let server = self.server_time().await?;
        let offset = server - now_ms();
        self.set_time_offset_ms(offset);
        info!(offset_ms = offset, "clock offset synchronised");
        Ok(offset)
    }

    pub async fn exchange_info(&self) -> Result<Value, ExchangeError> {
        self.send(Request::get(EndpointFamily::Api, BinanceRest::EXCHANGE_INFO))
            .await
    }

    pub async fn depth(&self, symbol: &str, limit: u32) -> Result<DepthSnapshot, ExchangeError> {
        let (family, path) = BinanceRest::depth_path(self.config.market);
        let params = Params::new()
            .with("symbol", validate_symbol(symbol)?)
            .with("limit", limit);
        let body = self.send(Request::get(family, path).params(params)).await?;
        Ok(serde_json::from_value(body)?)
    }

    pub async fn candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let (family, path) = BinanceRest::klines_path(self.config.market);
        let params = Params::new()
            .with("symbol", validate_symbol(symbol)?)
            .with("interval", interval)
            .with("limit", limit);
        let body = self.send(Request::get(family, path).params(params)).await?;
        let rows: Vec<RestKline> = serde_json::from_value(body)?;
        let now = now_ms();
        Ok(rows.into_iter().map(|row| row.into_candle(now)).collect())
    }

    pub async fn account(&self) -> Result<Value, ExchangeError> {
        self.send(Request::get(EndpointFamily::Api, BinanceRest::ACCOUNT).signed())
            .await
    }

    /// Non-zero balances keyed by asset.
    pub async fn balances(&self) -> Result<BTreeMap<String, Balance>, ExchangeError> {
        let account = self.account().await?;
        let raw: Vec<RawBalance> = match account.get("balances") {
            Some(list) => serde_json::from_value(list.clone())?,
            None => Vec::new(),
        };
        Ok(raw
            .into_iter()
            .filter(|b| !(b.free.is_zero() && b.locked.is_zero()))
            .map(|b| {
                (
                    b.asset,
                    Balance {
                        free: b.free,
                        locked: b.locked,
                    },
                )
            })
            .collect())
    }

    pub async fn open_orders(&self, symbol: Option<&str>) -> Result<Value, ExchangeError> {
        let symbol = symbol.map(validate_symbol).transpose()?;
        let params = Params::new().with_opt("symbol", symbol);
        self.send(
            Request::get(EndpointFamily::Api, BinanceRest::OPEN_ORDERS)
                .params(params)
                .signed(),
        )
        .await
    }

    pub async fn new_order(&self, order: &NewOrder) -> Result<Value, ExchangeError> {
        let params = order.to_params()?;
        self.send(
            Request::post(EndpointFamily::Api, BinanceRest::ORDER)
                .params(params)
                .signed(),
        )
        .await
    }

    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: Option<u64>,
        client_order_id: Option<&str>,
    ) -> Result<Value, ExchangeError> {
        if order_id.is_none() && client_order_id.is_none() {
            return Err(ExchangeError::Configuration(
                "cancel_order needs an order id or a client order id".to_string(),
            ));
        }
        let params = Params::new()
            .with("symbol", validate_symbol(symbol)?)
            .with_opt("orderId", order_id)
            .with_opt("origClientOrderId", client_order_id);
        self.send(
            Request::delete(EndpointFamily::Api, BinanceRest::ORDER)
                .params(params)
                .signed(),
        )
        .await
    }
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect()
}

#[async_trait]
impl MarketDataSource for BinanceClient {
    async fn depth(&self, symbol: &str, limit: u32) -> Result<DepthSnapshot, ExchangeError> {
        BinanceClient::depth(self, symbol, limit).await
    }

    async fn candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        BinanceClient::candles(self, symbol, interval, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const KEY: &str = "vmPUZE6mv9SD5VNHk4HlWFsOr6aKE2zvsw0MuIgwCIPy6utIco14y7Ju91duEh8A";
    const SECRET: &str = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";

    fn client(with_secret: bool) -> BinanceClient {
        let config = ClientConfig {
            api_key: Some(KEY.to_string()),
            api_secret: with_secret.then(|| SECRET.to_string()),
            ..ClientConfig::default()
        };
        BinanceClient::new(config).unwrap()
    }

    fn order_params() -> Params {
        Params::new()
            .with("symbol", "LTCBTC")
            .with("side", "BUY")
            .with("type", "LIMIT")
            .with("timeInForce", "GTC")
            .with("quantity", 1)
            .with("price", "0.1")
    }

    #[test]
    fn test_signed_post_goes_in_body() {
        let req = Request::post(EndpointFamily::Api, BinanceRest::ORDER)
            .params(order_params())
            .signed();
        let prepared = client(true).build_at(&req, 1499827319559).unwrap();

        assert_eq!(prepared.url, "https://api.binance.com/api/v3/order");
        assert_eq!(
            prepared.body.as_deref(),
            Some(
                "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1\
                 &recvWindow=5000&timestamp=1499827319559\
                 &signature=c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
            )
        );
        assert_eq!(
            prepared.headers,
            vec![(API_KEY_HEADER.to_string(), KEY.to_string())]
        );
    }

    #[test]
    fn test_signed_get_goes_in_query_with_offset() {
        let client = client(true);
        client.set_time_offset_ms(1_000);
        let req = Request::get(EndpointFamily::Api, BinanceRest::ORDER)
            .params(order_params())
            .signed();
        let prepared = client.build_at(&req, 1499827318559).unwrap();

        assert!(prepared.body.is_none());
        assert!(prepared.url.starts_with("https://api.binance.com/api/v3/order?symbol=LTCBTC"));
        assert!(prepared.url.contains("&timestamp=1499827319559&signature=c8db5682"));
    }

    #[test]
    fn test_caller_recv_window_survives_signing() {
        let req = Request::get(EndpointFamily::Api, BinanceRest::ACCOUNT)
            .params(Params::new().with("recvWindow", 60000))
            .signed();
        let prepared = client(true).build_at(&req, 1).unwrap();

        assert!(prepared.url.contains("?recvWindow=60000&timestamp=1&signature="));
        assert!(!prepared.url.contains("recvWindow=5000"));
        assert_eq!(prepared.query.matches("recvWindow").count(), 1);
    }

    #[test]
    fn test_query_matches_wire_form() {
        let client = client(true);
        let get = Request::get(EndpointFamily::Api, BinanceRest::ORDER)
            .params(order_params())
            .signed();
        let prepared = client.build_at(&get, 1499827319559).unwrap();
        assert!(prepared.query.ends_with(
            "&timestamp=1499827319559\
             &signature=c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        ));
        assert!(prepared.url.ends_with(&format!("?{}", prepared.query)));

        let post = Request::post(EndpointFamily::Api, BinanceRest::ORDER)
            .params(order_params())
            .signed();
        let prepared = client.build_at(&post, 1499827319559).unwrap();
        assert_eq!(prepared.body.as_deref(), Some(prepared.query.as_str()));
    }

    #[test]
    fn test_signed_without_secret_is_configuration_error() {
        let req = Request::get(EndpointFamily::Api, BinanceRest::ACCOUNT).signed();
        let err = client(false).build_at(&req, 0).unwrap_err();
        assert!(matches!(err, ExchangeError::Configuration(_)));
    }

    #[test]
    fn test_public_request_still_carries_key() {
        let req = Request::get(EndpointFamily::Api, BinanceRest::PING);
        let prepared = client(false).build_at(&req, 0).unwrap();
        assert_eq!(prepared.url, "https://api.binance.com/api/v3/ping");
        assert_eq!(prepared.headers.len(), 1);

        let anonymous = BinanceClient::new(ClientConfig::default()).unwrap();
        assert!(anonymous.build_at(&req, 0).unwrap().headers.is_empty());
    }

    #[test]
    fn test_list_params_prepended_in_url() {
        let req = Request::get(EndpointFamily::Api, "/api/v3/ticker/price").params(
            Params::new()
                .with("type", "MINI")
                .with_list("symbols", ["BTCUSDT", "BNBUSDT"]),
        );
        let prepared = client(false).build_at(&req, 0).unwrap();
        assert_eq!(
            prepared.url,
            "https://api.binance.com/api/v3/ticker/price?symbols=BTCUSDT&symbols=BNBUSDT&type=MINI"
        );
    }

    #[test]
    fn test_testnet_and_override_hosts() {
        let testnet = BinanceClient::new(ClientConfig {
            testnet: true,
            ..ClientConfig::default()
        })
        .unwrap();
        let req = Request::get(EndpointFamily::Api, BinanceRest::TIME);
        assert_eq!(
            testnet.build_at(&req, 0).unwrap().url,
            "https://testnet.binance.vision/api/v3/time"
        );

        let local = BinanceClient::new(ClientConfig {
            rest_base_url: Some("http://127.0.0.1:9000/".into()),
            ..ClientConfig::default()
        })
        .unwrap();
        assert_eq!(
            local.build_at(&req, 0).unwrap().url,
            "http://127.0.0.1:9000/api/v3/time"
        );
    }

    #[test]
    fn test_new_order_params() {
        let order = NewOrder::limit("ltcbtc", OrderSide::Buy, dec!(1.000), dec!(0.1));
        assert_eq!(
            order.to_params().unwrap().encode().unwrap(),
            "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1"
        );

        let mut maker = NewOrder::market("LTCBTC", OrderSide::Sell, dec!(2));
        maker.order_type = OrderType::LimitMaker;
        assert!(maker.to_params().is_err());
    }
}
