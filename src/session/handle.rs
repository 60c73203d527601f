//! Public session handle.
//!
//! A cheap clonable facade over the session actor. The handle never touches
//! connection state directly: status queries read a watch channel fed by the
//! actor, and every operation is an actor message.

use serde::Serialize;
use sonic_rs::Value;
use tokio::sync::watch;

use crate::core::{
    InterceptorId, WebSocketError, WebSocketResult, WsAddress, WsConnectionStatus, WsEvent,
    WsEventKind, WsOptions,
};
use crate::session::actor::{
    BeginRequest, SessionActor, SessionArgs, SessionEvent, Subscribe, Unsubscribe,
};
use crate::transport::WsTransport;
use crate::transport::tungstenite::TungsteniteTransport;
use kameo::error::SendError;
use kameo::prelude::{Actor, ActorRef};

/// Handle to one websocket session.
///
/// Construction does not connect; call [`WsSession::connect`]. Cloning the
/// handle shares the same underlying session.
#[derive(Clone)]
pub struct WsSession<T = TungsteniteTransport>
where
    T: WsTransport,
{
    actor: ActorRef<SessionActor<T>>,
    status_rx: watch::Receiver<WsConnectionStatus>,
}

impl WsSession<TungsteniteTransport> {
    /// Build a session against the default tokio-tungstenite transport.
    pub fn spawn(address: impl Into<WsAddress>, options: WsOptions) -> Self {
        Self::with_transport(address, options, TungsteniteTransport::default())
    }
}

impl<T> WsSession<T>
where
    T: WsTransport,
{
    /// Build a session over a caller-supplied transport (tests use the
    /// in-memory mock transport here).
    pub fn with_transport(
        address: impl Into<WsAddress>,
        options: WsOptions,
        transport: T,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(WsConnectionStatus::Disconnected);
        let actor = SessionActor::spawn(SessionArgs {
            address: address.into(),
            options,
            transport,
            status_tx,
        });
        Self { actor, status_rx }
    }

    /// Open (or re-open) the connection. Deferred while the connect gate
    /// predicate returns false; supersedes any live socket otherwise.
    pub async fn connect(&self) -> WebSocketResult<()> {
        self.actor
            .tell(SessionEvent::Connect)
            .send()
            .await
            .map_err(tell_error)
    }

    /// Serialize `data` and transmit it once the connection is open.
    ///
    /// Suspends until the open state is reached; transport failures after
    /// that point are broadcast via the `error` event, not returned here.
    pub async fn send<S>(&self, data: &S) -> WebSocketResult<()>
    where
        S: Serialize,
    {
        let value = to_value(data)?;
        self.wait_until_open().await?;
        self.actor
            .tell(SessionEvent::Outbound { data: value })
            .send()
            .await
            .map_err(tell_error)
    }

    /// Issue a correlated request with no payload.
    pub async fn request(&self, action: &str) -> WebSocketResult<Value> {
        self.begin_request(action, None).await
    }

    /// Issue a correlated request carrying a payload.
    pub async fn request_with<P>(&self, action: &str, payload: &P) -> WebSocketResult<Value>
    where
        P: Serialize,
    {
        let payload = to_value(payload)?;
        self.begin_request(action, Some(payload)).await
    }

    async fn begin_request(&self, action: &str, payload: Option<Value>) -> WebSocketResult<Value> {
        self.wait_until_open().await?;
        match self
            .actor
            .ask(BeginRequest {
                action: action.to_string(),
                payload,
            })
            .await
        {
            Ok(value) => Ok(value),
            Err(SendError::HandlerError(err)) => Err(err),
            Err(err) => Err(WebSocketError::ActorError(err.to_string())),
        }
    }

    /// Initiate a clean shutdown; `code` defaults to 1000 (normal closure)
    /// and the close frame carries the standard reason for the code.
    pub async fn close(&self, code: Option<u16>) -> WebSocketResult<()> {
        self.actor
            .tell(SessionEvent::Close {
                code: code.unwrap_or(1000),
            })
            .send()
            .await
            .map_err(tell_error)
    }

    /// Register an interceptor; the returned id is the unsubscribe handle.
    pub async fn on<F>(&self, kind: WsEventKind, callback: F) -> WebSocketResult<InterceptorId>
    where
        F: Fn(&WsEvent) + Send + Sync + 'static,
    {
        match self
            .actor
            .ask(Subscribe {
                kind,
                callback: Box::new(callback),
            })
            .await
        {
            Ok(id) => Ok(id),
            Err(SendError::HandlerError(err)) => Err(err),
            Err(err) => Err(WebSocketError::ActorError(err.to_string())),
        }
    }

    /// Remove a previously registered interceptor; no-op when absent.
    pub async fn off(&self, kind: WsEventKind, id: InterceptorId) -> WebSocketResult<bool> {
        match self.actor.ask(Unsubscribe { kind, id }).await {
            Ok(removed) => Ok(removed),
            Err(SendError::HandlerError(err)) => Err(err),
            Err(err) => Err(WebSocketError::ActorError(err.to_string())),
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> WsConnectionStatus {
        *self.status_rx.borrow()
    }

    /// True while a locally initiated close handshake is in flight.
    pub fn closing(&self) -> bool {
        matches!(self.status(), WsConnectionStatus::Closing)
    }

    /// True when no socket exists: before the first connect, after a clean
    /// close, or after the reconnect budget is spent.
    pub fn closed(&self) -> bool {
        matches!(
            self.status(),
            WsConnectionStatus::Disconnected | WsConnectionStatus::Closed
        )
    }

    /// Suspend until the connection reaches the open state.
    ///
    /// Fails fast when the session is terminally closed rather than
    /// suspending forever.
    pub async fn wait_until_open(&self) -> WebSocketResult<()> {
        let mut rx = self.status_rx.clone();
        loop {
            match *rx.borrow_and_update() {
                WsConnectionStatus::Open => return Ok(()),
                WsConnectionStatus::Closed => {
                    return Err(WebSocketError::InvalidState(
                        "connection closed".to_string(),
                    ));
                }
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(WebSocketError::ActorError("session terminated".to_string()));
            }
        }
    }

    /// Permanently stop the session actor and its timers.
    pub async fn shutdown(&self) {
        let _ = self.actor.stop_gracefully().await;
    }
}

fn to_value<S>(data: &S) -> WebSocketResult<Value>
where
    S: Serialize,
{
    let text =
        sonic_rs::to_string(data).map_err(|err| WebSocketError::ParseFailed(err.to_string()))?;
    sonic_rs::from_str(&text).map_err(|err| WebSocketError::ParseFailed(err.to_string()))
}

fn tell_error<M, E>(err: SendError<M, E>) -> WebSocketError
where
    SendError<M, E>: std::fmt::Display,
{
    WebSocketError::ActorError(err.to_string())
}
