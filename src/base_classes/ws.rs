use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ExchangeError;
use crate::exchanges::endpoints::BinanceWs;

/// One open push connection.
#[async_trait]
pub trait StreamConnection: Send {
    /// Next text payload, or `None` once the remote side has closed.
    ///
    /// Must be cancel safe: the subscription drops this future on every cancellation tick.
    async fn next_message(&mut self) -> Result<Option<String>, ExchangeError>;

    async fn close(&mut self) -> Result<(), ExchangeError>;
}

/// Opens a connection for a topic such as `btcusdt@depth`.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self, topic: &str) -> Result<Box<dyn StreamConnection>, ExchangeError>;
}

/// Raw single-stream websocket transport (`<base>/ws/<topic>`).
pub struct TungsteniteTransport {
    base: String,
}

impl TungsteniteTransport {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        match &config.ws_base_url {
            Some(base) => Self::new(base.clone()),
            None => Self::new(BinanceWs::base(config.market, config.testnet)),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }
}

#[async_trait]
impl StreamTransport for TungsteniteTransport {
    async fn connect(&self, topic: &str) -> Result<Box<dyn StreamConnection>, ExchangeError> {
        let url = BinanceWs::stream_url(&self.base, topic);
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ExchangeError::Transport(format!("failed to connect {url}: {e}")))?;
        debug!(%url, "websocket connected");
        Ok(Box::new(TungsteniteConnection {
            ws,
            topic: topic.to_string(),
        }))
    }
}

struct TungsteniteConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    topic: String,
}

#[async_trait]
impl StreamConnection for TungsteniteConnection {
    async fn next_message(&mut self) -> Result<Option<String>, ExchangeError> {
        // pings are answered by tungstenite on the next read
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()))
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(topic = %self.topic, ?frame, "websocket closed by server");
                    return Ok(None);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<(), ExchangeError> {
        match self.ws.close(None).await {
            Ok(())
            | Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A lazy, in-order sequence of raw messages for one topic.
///
/// Cancellation is cooperative: the token is checked whenever a message arrives and on every
/// tick while idle. A message that has already arrived is still handed out.
pub struct StreamSubscription {
    topic: String,
    connection: Box<dyn StreamConnection>,
    token: CancellationToken,
    tick: Duration,
    closed: bool,
}

impl StreamSubscription {
    pub async fn open(
        transport: &dyn StreamTransport,
        topic: &str,
        token: CancellationToken,
        tick: Duration,
    ) -> Result<Self, ExchangeError> {
        let connection = transport.connect(topic).await?;
        debug!(topic, "subscription opened");
        Ok(Self {
            topic: topic.to_string(),
            connection,
            token,
            tick,
            closed: false,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// `Ok(None)` once the subscription was cancelled or the transport closed. A transport
    /// error is returned once; later calls yield `Ok(None)`.
    pub async fn next(&mut self) -> Result<Option<String>, ExchangeError> {
        loop {
            if self.closed {
                return Ok(None);
            }
            if self.token.is_cancelled() {
                debug!(topic = %self.topic, "subscription cancelled");
                self.close().await;
                return Ok(None);
            }

            tokio::select! {
                biased;
                msg = self.connection.next_message() => {
                    return match msg {
                        Ok(Some(text)) => Ok(Some(text)),
                        Ok(None) => {
                            info!(topic = %self.topic, "stream ended");
                            self.closed = true;
                            Ok(None)
                        }
                        Err(e) => {
                            warn!(topic = %self.topic, error = %e, "stream failed");
                            self.closed = true;
                            Err(e)
                        }
                    };
                }
                _ = tokio::time::sleep(self.tick) => continue,
            }
        }
    }

    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.connection.close().await {
            warn!(topic = %self.topic, error = %e, "failed to close stream");
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<String, ExchangeError>> + Send {
        futures_util::stream::unfold(self, |mut sub| async move {
            match sub.next().await {
                Ok(Some(text)) => Some((Ok(text), sub)),
                Ok(None) => None,
                Err(e) => Some((Err(e), sub)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct ScriptedConnection {
        frames: VecDeque<Result<String, ExchangeError>>,
        hang: bool,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl StreamConnection for ScriptedConnection {
        async fn next_message(&mut self) -> Result<Option<String>, ExchangeError> {
            match self.frames.pop_front() {
                Some(frame) => frame.map(Some),
                None if self.hang => std::future::pending().await,
                None => Ok(None),
            }
        }

        async fn close(&mut self) -> Result<(), ExchangeError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ScriptedTransport {
        frames: Vec<&'static str>,
        error_after: bool,
        hang: bool,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl StreamTransport for ScriptedTransport {
        async fn connect(&self, _topic: &str) -> Result<Box<dyn StreamConnection>, ExchangeError> {
            let mut frames: VecDeque<_> = self.frames.iter().map(|f| Ok(f.to_string())).collect();
            if self.error_after {
                frames.push_back(Err(ExchangeError::Transport("reset by peer".into())));
            }
            Ok(Box::new(ScriptedConnection {
                frames,
                hang: self.hang,
                closed: self.closed.clone(),
            }))
        }
    }

    /// Connection fed from a channel, for frames that arrive while `next` is already waiting.
    struct ChannelConnection {
        rx: mpsc::UnboundedReceiver<String>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl StreamConnection for ChannelConnection {
        async fn next_message(&mut self) -> Result<Option<String>, ExchangeError> {
            Ok(self.rx.recv().await)
        }

        async fn close(&mut self) -> Result<(), ExchangeError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ChannelTransport {
        rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl StreamTransport for ChannelTransport {
        async fn connect(&self, _topic: &str) -> Result<Box<dyn StreamConnection>, ExchangeError> {
            let rx = self
                .rx
                .lock()
                .take()
                .ok_or_else(|| ExchangeError::Transport("already connected".into()))?;
            Ok(Box::new(ChannelConnection {
                rx,
                closed: self.closed.clone(),
            }))
        }
    }

    fn transport(frames: Vec<&'static str>, error_after: bool, hang: bool) -> ScriptedTransport {
        ScriptedTransport {
            frames,
            error_after,
            hang,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    #[tokio::test]
    async fn test_messages_in_order_then_end() {
        let transport = transport(vec!["a", "b"], false, false);
        let sub = StreamSubscription::open(
            &transport,
            "btcusdt@depth",
            CancellationToken::new(),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        let items: Vec<_> = sub.into_stream().collect().await;
        let items: Vec<String> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_transport_error_ends_sequence() {
        let transport = transport(vec!["a"], true, false);
        let mut sub = StreamSubscription::open(
            &transport,
            "btcusdt@depth",
            CancellationToken::new(),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        assert_eq!(sub.next().await.unwrap().as_deref(), Some("a"));
        assert!(sub.next().await.unwrap_err().is_transport());
        assert!(sub.is_closed());
        assert!(sub.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_next_closes_connection() {
        let transport = transport(vec!["a"], false, true);
        let token = CancellationToken::new();
        let mut sub = StreamSubscription::open(&transport, "t", token.clone(), Duration::from_millis(10))
            .await
            .unwrap();
        token.cancel();

        assert!(sub.next().await.unwrap().is_none());
        assert!(transport.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_observed_on_idle_tick() {
        let transport = transport(Vec::new(), false, true);
        let token = CancellationToken::new();
        let mut sub = StreamSubscription::open(&transport, "t", token.clone(), Duration::from_secs(1))
            .await
            .unwrap();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            canceller.cancel();
        });

        assert!(sub.next().await.unwrap().is_none());
        assert!(sub.is_cancelled());
        assert!(transport.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_in_flight_at_cancel_is_delivered() {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = ChannelTransport {
            rx: Mutex::new(Some(rx)),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let token = CancellationToken::new();
        let mut sub = StreamSubscription::open(&transport, "t", token.clone(), Duration::from_secs(1))
            .await
            .unwrap();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
            tx.send("late".to_string()).unwrap();
        });

        assert_eq!(sub.next().await.unwrap().as_deref(), Some("late"));
        assert!(sub.is_cancelled());
        assert!(!transport.closed.load(Ordering::SeqCst));

        assert!(sub.next().await.unwrap().is_none());
        assert!(transport.closed.load(Ordering::SeqCst));
    }
}
