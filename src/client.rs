//! Thin wrapper around an accepted websocket stream.
//!
//! Integration tests and demos use this to run an in-process peer without
//! touching tungstenite types directly.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async as tungstenite_accept};

use crate::core::{WebSocketError, WsFrame};
use crate::transport::tungstenite::{frame_to_msg, map_ws_error, msg_to_frame};

pub struct WsClient {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn send(&mut self, frame: WsFrame) -> Result<(), WebSocketError> {
        self.inner
            .send(frame_to_msg(frame))
            .await
            .map_err(|e| map_ws_error("write", e))
    }

    pub async fn next(&mut self) -> Option<Result<WsFrame, WebSocketError>> {
        self.inner
            .next()
            .await
            .map(|res| res.map(msg_to_frame).map_err(|e| map_ws_error("read", e)))
    }
}

/// Accept an incoming websocket connection.
pub async fn accept_async(stream: TcpStream) -> Result<WsClient, WebSocketError> {
    let ws = tungstenite_accept(MaybeTlsStream::Plain(stream))
        .await
        .map_err(|err| WebSocketError::ConnectionFailed(err.to_string()))?;
    Ok(WsClient { inner: ws })
}
