use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{WebSocketError, WsFrame};

pub mod tungstenite;

/// Boxed connect future returned by [`WsTransport::connect`].
pub type WsTransportConnectFuture<R, W> =
    Pin<Box<dyn Future<Output = Result<(R, W), WebSocketError>> + Send>>;

/// Transport boundary for websocket IO.
///
/// The IO loops live outside the session actor; the actor owns state and
/// policy. The trait is intentionally minimal so the real tokio-tungstenite
/// transport and the in-memory test transport are interchangeable.
pub trait WsTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = Result<WsFrame, WebSocketError>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = WebSocketError> + Send + Sync + Unpin + 'static;

    fn connect(&self, url: String) -> WsTransportConnectFuture<Self::Reader, Self::Writer>;
}
