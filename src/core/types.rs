use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sonic_rs::Value;
use thiserror::Error;

/// Convenience result alias for websocket operations.
pub type WebSocketResult<T> = Result<T, WebSocketError>;

/// Canonical error surface of the session.
///
/// Transport-level failures are broadcast via the `error` interceptor event
/// and never returned from `send`/`request`; the variants a request caller
/// can observe are `RequestTimeout`, `ServerError` and the actor/state
/// plumbing failures.
#[derive(Debug, Error)]
pub enum WebSocketError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("Request cancelled by timeout")]
    RequestTimeout,

    #[error("Server error: {message}")]
    ServerError {
        message: String,
        data: Option<Value>,
    },

    #[error("Parse failed: {0}")]
    ParseFailed(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Actor error: {0}")]
    ActorError(String),
}

/// Connection lifecycle states.
///
/// `Reconnecting` is the sub-state entered from an abnormal closure while
/// the retry budget is not yet exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsConnectionStatus {
    Disconnected,
    Connecting,
    Open,
    Closing,
    Closed,
    Reconnecting,
}

/// Closure details delivered with the `close` event.
///
/// `clean` is true when the close handshake completed (a close frame was
/// observed or the closure was locally initiated); abnormal closures carry
/// code 1006 and trigger reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    pub clean: bool,
}

/// Server address source, re-resolved on every connection attempt so the
/// target can change between attempts.
#[derive(Clone)]
pub enum WsAddress {
    Static(String),
    Resolver(Arc<dyn Fn() -> String + Send + Sync>),
}

impl WsAddress {
    pub fn resolver<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self::Resolver(Arc::new(f))
    }

    pub fn resolve(&self) -> String {
        match self {
            Self::Static(url) => url.clone(),
            Self::Resolver(f) => f(),
        }
    }
}

impl From<String> for WsAddress {
    fn from(url: String) -> Self {
        Self::Static(url)
    }
}

impl From<&str> for WsAddress {
    fn from(url: &str) -> Self {
        Self::Static(url.to_string())
    }
}

impl fmt::Debug for WsAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(url) => f.debug_tuple("Static").field(url).finish(),
            Self::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

/// Session configuration.
///
/// Defaults match the recognized option set: always-true connect gate,
/// 5 minute request timeout, reconnection enabled with 20 attempts spaced
/// 5 seconds apart, 30 second keepalive period, diagnostics off.
#[derive(Clone)]
pub struct WsOptions {
    /// Gate predicate polled before every connection attempt; while it
    /// returns false the attempt is deferred, not failed.
    pub can_connect: Arc<dyn Fn() -> bool + Send + Sync>,
    /// `None` disables request timeouts entirely.
    pub request_timeout: Option<Duration>,
    pub reconnect: bool,
    pub reconnect_timeout: Duration,
    pub reconnect_attempts: u32,
    /// Keepalive probe period.
    pub ping_timeout: Duration,
    /// Gates diagnostic logging only.
    pub debug: bool,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            can_connect: Arc::new(|| true),
            request_timeout: Some(Duration::from_secs(300)),
            reconnect: true,
            reconnect_timeout: Duration::from_secs(5),
            reconnect_attempts: 20,
            ping_timeout: Duration::from_secs(30),
            debug: false,
        }
    }
}

impl fmt::Debug for WsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsOptions")
            .field("request_timeout", &self.request_timeout)
            .field("reconnect", &self.reconnect)
            .field("reconnect_timeout", &self.reconnect_timeout)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("ping_timeout", &self.ping_timeout)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}
