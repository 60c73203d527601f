//! Reusable test utilities for exercising a session without a real socket.
//!
//! [`MockTransport::hub`] returns a transport for the session plus a
//! [`MockHub`] from which the test receives one [`MockServer`] handle per
//! connection attempt, in order. Dropping the hub makes every subsequent
//! connect attempt fail, which is how tests exercise retry exhaustion.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::Sink;
use tokio::sync::mpsc;

use crate::core::{WebSocketError, WsFrame, into_ws_frame};
use crate::transport::{WsTransport, WsTransportConnectFuture};

/// In-memory transport; every connect yields a fresh channel pair.
#[derive(Clone)]
pub struct MockTransport {
    conn_tx: mpsc::UnboundedSender<MockServer>,
    connect_calls: Arc<AtomicUsize>,
}

impl MockTransport {
    /// Build a transport + hub pair.
    pub fn hub() -> (Self, MockHub) {
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        (
            Self {
                conn_tx,
                connect_calls: Arc::new(AtomicUsize::new(0)),
            },
            MockHub { conn_rx },
        )
    }

    /// Total number of connect attempts observed, successful or not.
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

impl WsTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(&self, url: String) -> WsTransportConnectFuture<Self::Reader, Self::Writer> {
        let conn_tx = self.conn_tx.clone();
        let calls = self.connect_calls.clone();
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            let (sent_tx, sent_rx) = mpsc::unbounded_channel::<WsFrame>();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<WsFrame>();
            let server = MockServer {
                url,
                outbound_rx: sent_rx,
                inbound_tx: Some(inbound_tx),
            };
            conn_tx.send(server).map_err(|_| {
                WebSocketError::ConnectionFailed("mock hub refused the connection".to_string())
            })?;
            Ok((MockReader { rx: inbound_rx }, MockWriter { sent_tx }))
        })
    }
}

/// Receives one [`MockServer`] per accepted connection attempt.
pub struct MockHub {
    conn_rx: mpsc::UnboundedReceiver<MockServer>,
}

impl MockHub {
    pub async fn next_conn(&mut self) -> Option<MockServer> {
        self.conn_rx.recv().await
    }

    pub async fn next_conn_timeout(&mut self, timeout: Duration) -> Option<MockServer> {
        tokio::time::timeout(timeout, self.conn_rx.recv())
            .await
            .unwrap_or_default()
    }
}

/// Error surface for operations on [`MockServer`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockServerError {
    /// The inbound socket side was intentionally dropped.
    SocketDropped,
    /// The session side is no longer receiving inbound frames.
    ChannelClosed,
}

impl std::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockServerError::SocketDropped => f.write_str("mock socket already dropped"),
            MockServerError::ChannelClosed => f.write_str("mock session channel is closed"),
        }
    }
}

impl std::error::Error for MockServerError {}

/// Server-side handle for one mock connection.
pub struct MockServer {
    /// Address the session resolved for this attempt.
    pub url: String,
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
    inbound_tx: Option<mpsc::UnboundedSender<WsFrame>>,
}

impl MockServer {
    /// Receive a frame written by the session to its writer.
    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    /// Receive a frame with a timeout.
    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Push an inbound frame to the session.
    pub fn send_inbound(&self, frame: WsFrame) -> Result<(), MockServerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(frame).map_err(|_| MockServerError::ChannelClosed)
    }

    /// Push a UTF-8 payload as websocket text.
    pub fn send_text(&self, text: impl AsRef<str>) -> Result<(), MockServerError> {
        self.send_inbound(into_ws_frame(text.as_ref().as_bytes().to_vec()))
    }

    /// Complete the close handshake from the server side.
    pub fn send_close(&self, code: u16, reason: &str) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::close(code, Bytes::copy_from_slice(reason.as_bytes())))
    }

    /// Simulate an abnormal server-side socket drop.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }
}

/// Reader side for [`MockTransport`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl futures_util::Stream for MockReader {
    type Item = Result<WsFrame, WebSocketError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.rx).poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Writer side for [`MockTransport`].
pub struct MockWriter {
    sent_tx: mpsc::UnboundedSender<WsFrame>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = WebSocketError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut()
            .sent_tx
            .send(item)
            .map_err(|_| WebSocketError::TransportError {
                context: "mock_transport_write",
                error: "mock outbound channel closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}
