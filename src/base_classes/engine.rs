use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::base_classes::registry::{CacheRegistry, ChartCaches, ChartKey, DepthCaches, SharedCache};
use crate::base_classes::subscriptions::SubscriptionRegistry;
use crate::base_classes::types::{Candle, UpdateOutcome};
use crate::base_classes::ws::{StreamSubscription, StreamTransport, TungsteniteTransport};
use crate::collectors::binance::{apply_depth, apply_kline, decode, StreamMessage};
use crate::config::ClientConfig;
use crate::error::ExchangeError;
use crate::exchanges::binance::messages::DepthSnapshot;
use crate::exchanges::binance::{ChartCache, DepthCache};
use crate::exchanges::endpoints::{validate_symbol, BinanceWs};
use crate::execution::client::BinanceClient;

/// REST snapshots the cache loops bootstrap from.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn depth(&self, symbol: &str, limit: u32) -> Result<DepthSnapshot, ExchangeError>;

    async fn candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError>;
}

/// A cache that is bootstrapped from one REST snapshot and then fed by a stream.
trait StreamCache: Send + Sync + 'static {
    type Snapshot: Send + 'static;

    fn begin_bootstrap(&mut self);

    fn apply_snapshot(&mut self, snapshot: Self::Snapshot) -> bool;

    /// True when the message changed the cache.
    fn apply_message(&mut self, message: StreamMessage) -> bool;
}

impl StreamCache for DepthCache {
    type Snapshot = DepthSnapshot;

    fn begin_bootstrap(&mut self) {
        DepthCache::begin_bootstrap(self)
    }

    fn apply_snapshot(&mut self, snapshot: DepthSnapshot) -> bool {
        DepthCache::apply_snapshot(self, &snapshot).is_some()
    }

    fn apply_message(&mut self, message: StreamMessage) -> bool {
        match message {
            StreamMessage::Depth(diff) => apply_depth(diff, self) == Some(UpdateOutcome::Applied),
            _ => false,
        }
    }
}

impl StreamCache for ChartCache {
    type Snapshot = Vec<Candle>;

    fn begin_bootstrap(&mut self) {
        ChartCache::begin_bootstrap(self)
    }

    fn apply_snapshot(&mut self, snapshot: Vec<Candle>) -> bool {
        self.apply_backfill(snapshot);
        true
    }

    fn apply_message(&mut self, message: StreamMessage) -> bool {
        match message {
            StreamMessage::Kline(event) => apply_kline(event, self) == Some(UpdateOutcome::Applied),
            _ => false,
        }
    }
}

type Callback<C> = Arc<dyn Fn(&str, &C) + Send + Sync>;

/// Handle to one running cache loop.
pub struct SubscriptionHandle {
    topic: String,
    task: JoinHandle<Result<(), ExchangeError>>,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the loop and returns how it ended.
    pub async fn join(self) -> Result<(), ExchangeError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ExchangeError::Transport(format!(
                "subscription task for {} failed: {e}",
                self.topic
            ))),
        }
    }
}

struct LoopContext<K, C: StreamCache> {
    label: String,
    topic: String,
    registration: u64,
    token: CancellationToken,
    key: K,
    cache: SharedCache<C>,
    caches: CacheRegistry<K, C>,
    on_update: Callback<C>,
}

/// Opens depth and chart caches over a stream transport and a REST snapshot source.
pub struct MarketDataEngine {
    source: Arc<dyn MarketDataSource>,
    transport: Arc<dyn StreamTransport>,
    subscriptions: SubscriptionRegistry,
    config: ClientConfig,
}

impl MarketDataEngine {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        transport: Arc<dyn StreamTransport>,
        config: ClientConfig,
    ) -> Self {
        Self {
            source,
            transport,
            subscriptions: SubscriptionRegistry::new(),
            config,
        }
    }

    /// REST client plus websocket transport for the configured market.
    pub async fn binance(config: ClientConfig) -> Result<Self, ExchangeError> {
        let client = BinanceClient::connect(config.clone()).await?;
        let transport = TungsteniteTransport::from_config(&config);
        Ok(Self::new(Arc::new(client), Arc::new(transport), config))
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Starts one depth loop per symbol. `on_update` sees the cache after the first sync and
    /// after every applied diff.
    pub fn open_depth_cache<S, F>(
        &self,
        symbols: &[S],
        caches: &DepthCaches,
        on_update: F,
    ) -> Result<Vec<SubscriptionHandle>, ExchangeError>
    where
        S: AsRef<str>,
        F: Fn(&str, &DepthCache) + Send + Sync + 'static,
    {
        let symbols = symbols
            .iter()
            .map(|s| validate_symbol(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let on_update: Callback<DepthCache> = Arc::new(on_update);

        let mut handles = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let topic = BinanceWs::depth_topic(&symbol)?;
            let (registration, token) = self.subscriptions.register(&topic);
            let cache = caches.insert(
                symbol.clone(),
                DepthCache::with_max_pending(&symbol, self.config.max_pending_updates),
            );
            let ctx = LoopContext {
                label: symbol.clone(),
                topic: topic.clone(),
                registration,
                token,
                key: symbol.clone(),
                cache,
                caches: caches.clone(),
                on_update: on_update.clone(),
            };

            let source = self.source.clone();
            let limit = self.config.depth_limit;
            let fetch = async move { source.depth(&symbol, limit).await };

            info!(%topic, "opening depth cache");
            let task = tokio::spawn(run_cache_loop(
                ctx,
                self.transport.clone(),
                self.subscriptions.clone(),
                self.config.cancel_check_interval(),
                fetch,
            ));
            handles.push(SubscriptionHandle { topic, task });
        }
        Ok(handles)
    }

    /// Starts one kline loop per symbol for `interval`, backfilled with `chart_limit` candles.
    pub fn open_chart<S, F>(
        &self,
        symbols: &[S],
        interval: &str,
        caches: &ChartCaches,
        on_update: F,
    ) -> Result<Vec<SubscriptionHandle>, ExchangeError>
    where
        S: AsRef<str>,
        F: Fn(&str, &ChartCache) + Send + Sync + 'static,
    {
        let symbols = symbols
            .iter()
            .map(|s| validate_symbol(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let on_update: Callback<ChartCache> = Arc::new(on_update);
        let interval = interval.trim().to_string();

        let mut handles = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let topic = BinanceWs::kline_topic(&symbol, &interval)?;
            let (registration, token) = self.subscriptions.register(&topic);
            let key = ChartKey::new(&symbol, &interval);
            let cache = caches.insert(
                key.clone(),
                ChartCache::with_limits(
                    &symbol,
                    &interval,
                    self.config.chart_limit as usize,
                    self.config.max_pending_updates,
                ),
            );
            let ctx = LoopContext {
                label: symbol.clone(),
                topic: topic.clone(),
                registration,
                token,
                key,
                cache,
                caches: caches.clone(),
                on_update: on_update.clone(),
            };

            let source = self.source.clone();
            let limit = self.config.chart_limit;
            let chart_interval = interval.clone();
            let fetch = async move { source.candles(&symbol, &chart_interval, limit).await };

            info!(%topic, "opening chart");
            let task = tokio::spawn(run_cache_loop(
                ctx,
                self.transport.clone(),
                self.subscriptions.clone(),
                self.config.cancel_check_interval(),
                fetch,
            ));
            handles.push(SubscriptionHandle { topic, task });
        }
        Ok(handles)
    }

    /// Cooperatively stops the loop for `topic` (e.g. `btcusdt@depth`).
    pub fn close_subscription(&self, topic: &str) -> bool {
        let found = self.subscriptions.cancel(topic);
        if !found {
            debug!(topic, "close requested for unknown topic");
        }
        found
    }

    pub fn close_all(&self) -> usize {
        self.subscriptions.cancel_all()
    }
}

/// Stream first, then the snapshot: messages that beat the snapshot are queued by the cache
/// and replayed when it lands.
async fn run_cache_loop<K, C, Fut>(
    ctx: LoopContext<K, C>,
    transport: Arc<dyn StreamTransport>,
    subscriptions: SubscriptionRegistry,
    tick: Duration,
    fetch: Fut,
) -> Result<(), ExchangeError>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    C: StreamCache,
    Fut: Future<Output = Result<C::Snapshot, ExchangeError>> + Send + 'static,
{
    let result = drive(&ctx, transport.as_ref(), tick, fetch).await;
    if ctx.token.is_cancelled() {
        ctx.caches.remove_if_same(&ctx.key, &ctx.cache);
        info!(topic = %ctx.topic, "subscription closed");
    }
    subscriptions.release(&ctx.topic, ctx.registration);
    result
}

async fn drive<K, C, Fut>(
    ctx: &LoopContext<K, C>,
    transport: &dyn StreamTransport,
    tick: Duration,
    fetch: Fut,
) -> Result<(), ExchangeError>
where
    C: StreamCache,
    Fut: Future<Output = Result<C::Snapshot, ExchangeError>> + Send + 'static,
{
    let mut stream = StreamSubscription::open(transport, &ctx.topic, ctx.token.clone(), tick).await?;
    ctx.cache.write().begin_bootstrap();

    let mut snapshot = tokio::spawn(fetch);
    let mut snapshot_pending = true;

    loop {
        tokio::select! {
            biased;
            joined = &mut snapshot, if snapshot_pending => {
                snapshot_pending = false;
                let fetched = match joined {
                    Ok(result) => result,
                    Err(e) => Err(ExchangeError::Transport(format!("snapshot task failed: {e}"))),
                };
                match fetched {
                    Ok(data) => {
                        let applied = ctx.cache.write().apply_snapshot(data);
                        if applied {
                            debug!(topic = %ctx.topic, "cache synced");
                            notify(ctx);
                        }
                    }
                    Err(e) => {
                        error!(topic = %ctx.topic, error = %e, "snapshot unavailable");
                        stream.close().await;
                        return Err(ExchangeError::snapshot_unavailable(&ctx.label, e));
                    }
                }
            }
            next = stream.next() => {
                match next {
                    Ok(Some(text)) => match decode(&text) {
                        Ok(message) => {
                            let changed = ctx.cache.write().apply_message(message);
                            if changed {
                                notify(ctx);
                            }
                        }
                        Err(e) => warn!(topic = %ctx.topic, error = %e, "undecodable stream message"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        if snapshot_pending {
                            snapshot.abort();
                        }
                        return Err(e);
                    }
                }
            }
        }
    }

    if snapshot_pending {
        snapshot.abort();
    }
    Ok(())
}

fn notify<K, C: StreamCache>(ctx: &LoopContext<K, C>) {
    let guard = ctx.cache.read();
    (ctx.on_update)(&ctx.label, &guard);
}
