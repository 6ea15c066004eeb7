use thiserror::Error;

/// Errors surfaced by the REST client, the stream transport and the cache loops.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Missing credentials or an unusable configuration value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Websocket connect or read failure. The affected subscription ends.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The REST snapshot (or chart backfill) could not be fetched or decoded.
    #[error("snapshot unavailable for {symbol}: {reason}")]
    SnapshotUnavailable { symbol: String, reason: String },

    /// The exchange answered with an error payload. `body` is the raw response text.
    #[error("exchange error (status {status}): {body}")]
    Exchange { status: u16, body: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),
}

impl ExchangeError {
    pub fn snapshot_unavailable(symbol: &str, reason: impl ToString) -> Self {
        Self::SnapshotUnavailable {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for failures that end a stream loop rather than a single call.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<rust_decimal::Error> for ExchangeError {
    fn from(err: rust_decimal::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_urlencoded::ser::Error> for ExchangeError {
    fn from(err: serde_urlencoded::ser::Error) -> Self {
        Self::Parse(format!("failed to encode parameters: {err}"))
    }
}
