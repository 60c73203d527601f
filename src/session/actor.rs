//! Connection-manager actor.
//!
//! The socket IO loop runs outside the actor; the actor owns connection
//! state, the pending-request table and the interceptor registry, and
//! receives frames and timer ticks as messages. That keeps every mutation
//! of shared state on one logical execution context.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use sonic_rs::Value;
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, warn};

use crate::core::{
    CORRELATION_ID_LEN, CloseEvent, InboundRoute, InterceptorId, InterceptorRegistry,
    PendingTable, RequestEnvelope, WebSocketError, WebSocketResult, WsAddress, WsCloseFrame,
    WsConnectionStatus, WsEvent, WsEventKind, WsFrame, WsOptions, close_reason, correlation_id,
    is_keepalive_reply, route_inbound,
};
use crate::core::envelope::PING_TOKEN;
use crate::transport::WsTransport;
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use kameo::reply::{DelegatedReply, ReplySender};

/// Poll interval while the connect gate predicate holds attempts back.
const GATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Arguments for constructing a session actor.
pub struct SessionArgs<T>
where
    T: WsTransport,
{
    pub address: WsAddress,
    pub options: WsOptions,
    pub transport: T,
    pub status_tx: watch::Sender<WsConnectionStatus>,
}

/// Connection-manager actor: one per session, owning socket lifecycle,
/// reconnect policy, keepalive scheduling, request correlation and event
/// dispatch.
pub struct SessionActor<T>
where
    T: WsTransport,
{
    address: WsAddress,
    options: WsOptions,
    transport: T,
    actor_ref: ActorRef<Self>,
    status: WsConnectionStatus,
    status_tx: watch::Sender<WsConnectionStatus>,
    interceptors: InterceptorRegistry,
    pending: PendingTable<ReplySender<WebSocketResult<Value>>>,
    writer: Option<T::Writer>,
    reader_task: Option<JoinHandle<()>>,
    reader_stop: Option<watch::Sender<bool>>,
    ping_task: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    reconnect_attempts: u32,
    /// Invalidates armed reconnect timers when a close or an explicit
    /// connect supersedes them.
    reconnect_epoch: u64,
    local_close: bool,
    last_url: String,
}

impl<T> Actor for SessionActor<T>
where
    T: WsTransport,
{
    type Args = SessionArgs<T>;
    type Error = WebSocketError;

    fn name() -> &'static str {
        "SessionActor"
    }

    async fn on_start(args: Self::Args, ctx: ActorRef<Self>) -> WebSocketResult<Self> {
        let SessionArgs {
            address,
            options,
            transport,
            status_tx,
        } = args;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // The keepalive ticker runs for the lifetime of the manager and
        // no-ops while the connection is not open.
        let ping_task = if options.ping_timeout.is_zero() {
            None
        } else {
            Some(spawn_keepalive(ctx.clone(), options.ping_timeout, shutdown_rx))
        };

        Ok(Self {
            address,
            options,
            transport,
            actor_ref: ctx,
            status: WsConnectionStatus::Disconnected,
            status_tx,
            interceptors: InterceptorRegistry::new(),
            pending: PendingTable::new(),
            writer: None,
            reader_task: None,
            reader_stop: None,
            ping_task,
            shutdown_tx,
            reconnect_attempts: 0,
            reconnect_epoch: 0,
            local_close: false,
            last_url: String::new(),
        })
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> WebSocketResult<()> {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.ping_task.take() {
            if let Err(err) = task.await {
                warn!("keepalive task terminated with error: {err}");
            }
        }
        self.teardown_connection().await;
        Ok(())
    }

    fn on_panic(
        &mut self,
        _actor_ref: kameo::actor::WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<kameo::prelude::ActorStopReason>, Self::Error>,
    > + Send {
        async move {
            tracing::error!(error = ?err, "SessionActor panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

fn spawn_keepalive<T>(
    actor_ref: ActorRef<SessionActor<T>>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    T: WsTransport,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; consume it so probes are spaced
        // by one full period from construction.
        ticker.tick().await;
        loop {
            tokio::select! {
                res = shutdown_rx.changed() => {
                    if res.is_err() || *shutdown_rx.borrow_and_update() { break; }
                }
                _ = ticker.tick() => {
                    if actor_ref.tell(SessionEvent::SendPing).send().await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Events processed by the session actor.
#[derive(Debug)]
pub enum SessionEvent {
    Connect,
    Inbound(WsFrame),
    Disconnected {
        close: Option<WsCloseFrame>,
        clean: bool,
        error: Option<String>,
    },
    Outbound {
        data: Value,
    },
    SendPing,
    RequestExpired {
        id: String,
    },
    ReconnectTick {
        epoch: u64,
    },
    Close {
        code: u16,
    },
}

pub(crate) struct ConnectionEstablished<TR: WsTransport>(
    pub(crate) TR::Reader,
    pub(crate) TR::Writer,
);

pub(crate) struct ConnectionFailed {
    pub(crate) error: String,
}

/// Begin a correlated request; the reply is delegated until the matching
/// response arrives or the request timeout fires.
pub struct BeginRequest {
    pub action: String,
    pub payload: Option<Value>,
}

/// Register an interceptor callback for an event kind.
pub struct Subscribe {
    pub kind: WsEventKind,
    pub callback: Box<dyn Fn(&WsEvent) + Send + Sync>,
}

/// Remove an interceptor callback by its handle.
pub struct Unsubscribe {
    pub kind: WsEventKind,
    pub id: InterceptorId,
}

impl<T> KameoMessage<SessionEvent> for SessionActor<T>
where
    T: WsTransport,
{
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        event: SessionEvent,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match event {
            SessionEvent::Connect => self.handle_connect().await,
            SessionEvent::Inbound(frame) => self.process_inbound(frame).await,
            SessionEvent::Disconnected {
                close,
                clean,
                error,
            } => self.handle_disconnected(close, clean, error).await,
            SessionEvent::Outbound { data } => {
                self.transmit_value(data).await;
                Ok(())
            }
            SessionEvent::SendPing => self.emit_ping().await,
            SessionEvent::RequestExpired { id } => {
                self.expire_request(&id);
                Ok(())
            }
            SessionEvent::ReconnectTick { epoch } => {
                if epoch == self.reconnect_epoch
                    && self.status == WsConnectionStatus::Reconnecting
                {
                    self.handle_connect().await
                } else {
                    Ok(())
                }
            }
            SessionEvent::Close { code } => self.handle_close(code).await,
        }
    }
}

impl<T> KameoMessage<ConnectionEstablished<T>> for SessionActor<T>
where
    T: WsTransport,
{
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectionEstablished<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.on_connection_established(msg.0, msg.1).await
    }
}

impl<T> KameoMessage<ConnectionFailed> for SessionActor<T>
where
    T: WsTransport,
{
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectionFailed,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.on_connection_failed(msg.error).await
    }
}

impl<T> KameoMessage<BeginRequest> for SessionActor<T>
where
    T: WsTransport,
{
    type Reply = DelegatedReply<WebSocketResult<Value>>;

    async fn handle(
        &mut self,
        req: BeginRequest,
        ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let (delegated, reply_sender) = ctx.reply_sender();

        let mut id = correlation_id(CORRELATION_ID_LEN);
        while self.pending.contains(&id) {
            id = correlation_id(CORRELATION_ID_LEN);
        }

        if let Some(reply) = reply_sender {
            self.pending.insert(id.clone(), reply);
            if let Some(timeout) = self.options.request_timeout {
                let actor_ref = self.actor_ref.clone();
                let expired = id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = actor_ref
                        .tell(SessionEvent::RequestExpired { id: expired })
                        .send()
                        .await;
                });
            }
        }

        let envelope = RequestEnvelope::new(id, req.action, req.payload);
        match envelope_value(&envelope) {
            Ok(value) => {
                self.transmit_value(value).await;
            }
            Err(err) => {
                warn!(%err, "failed to encode request envelope");
                if let Some(reply) = self.pending.complete(&envelope.id) {
                    reply.send(Err(err));
                }
            }
        }

        delegated
    }
}

impl<T> KameoMessage<Subscribe> for SessionActor<T>
where
    T: WsTransport,
{
    type Reply = WebSocketResult<InterceptorId>;

    async fn handle(
        &mut self,
        msg: Subscribe,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.interceptors.on(msg.kind, msg.callback))
    }
}

impl<T> KameoMessage<Unsubscribe> for SessionActor<T>
where
    T: WsTransport,
{
    type Reply = WebSocketResult<bool>;

    async fn handle(
        &mut self,
        msg: Unsubscribe,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.interceptors.off(msg.kind, msg.id))
    }
}

fn envelope_value(envelope: &RequestEnvelope) -> WebSocketResult<Value> {
    let text = sonic_rs::to_string(envelope)
        .map_err(|err| WebSocketError::ParseFailed(err.to_string()))?;
    sonic_rs::from_str(&text).map_err(|err| WebSocketError::ParseFailed(err.to_string()))
}

impl<T> SessionActor<T>
where
    T: WsTransport,
{
    fn set_status(&mut self, status: WsConnectionStatus) {
        self.status = status;
        let _ = self.status_tx.send(status);
    }

    async fn handle_connect(&mut self) -> WebSocketResult<()> {
        // Supersede any armed reconnect timer.
        self.reconnect_epoch += 1;

        if !(self.options.can_connect)() {
            // Gate holds the attempt back; re-arm instead of failing.
            let actor_ref = self.actor_ref.clone();
            tokio::spawn(async move {
                tokio::time::sleep(GATE_POLL_INTERVAL).await;
                let _ = actor_ref.tell(SessionEvent::Connect).send().await;
            });
            return Ok(());
        }

        // A new connect supersedes and closes any prior socket.
        self.teardown_connection().await;
        self.local_close = false;
        self.set_status(WsConnectionStatus::Connecting);

        // Re-resolve the address so it can change between attempts.
        let url = self.address.resolve();
        self.last_url = url.clone();

        let transport = self.transport.clone();
        let self_ref = self.actor_ref.clone();
        tokio::spawn(async move {
            match transport.connect(url).await {
                Ok((reader, writer)) => {
                    let _ = self_ref
                        .tell(ConnectionEstablished::<T>(reader, writer))
                        .send()
                        .await;
                }
                Err(err) => {
                    let _ = self_ref
                        .tell(ConnectionFailed {
                            error: err.to_string(),
                        })
                        .send()
                        .await;
                }
            }
        });

        Ok(())
    }

    async fn on_connection_established(
        &mut self,
        reader: T::Reader,
        mut writer: T::Writer,
    ) -> WebSocketResult<()> {
        if matches!(
            self.status,
            WsConnectionStatus::Closing | WsConnectionStatus::Closed
        ) {
            // The session was closed while the handshake was in flight.
            let _ = writer
                .send(WsFrame::close(
                    1000,
                    Bytes::from_static(close_reason(1000).as_bytes()),
                ))
                .await;
            let _ = writer.close().await;
            return Ok(());
        }

        // If two connects raced, the latest handshake wins.
        self.teardown_connection().await;

        self.writer = Some(writer);
        self.reconnect_attempts = 0;
        self.set_status(WsConnectionStatus::Open);

        if self.options.debug {
            debug!(url = %self.last_url, "connected");
        }
        self.interceptors.dispatch(&WsEvent::Open {
            url: self.last_url.clone(),
        });

        let (stop_tx, mut stop_rx) = watch::channel(false);
        self.reader_stop = Some(stop_tx);
        let actor_ref = self.actor_ref.clone();
        let mut read = reader;
        self.reader_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = stop_rx.changed() => {
                        if res.is_err() || *stop_rx.borrow_and_update() { break; }
                    }
                    frame = read.next() => {
                        match frame {
                            Some(Ok(WsFrame::Close(close))) => {
                                // Close handshake completed: a clean closure.
                                let _ = actor_ref
                                    .tell(SessionEvent::Disconnected {
                                        close,
                                        clean: true,
                                        error: None,
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                            Some(Ok(frame)) => {
                                if actor_ref
                                    .tell(SessionEvent::Inbound(frame))
                                    .send()
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Some(Err(err)) => {
                                let _ = actor_ref
                                    .tell(SessionEvent::Disconnected {
                                        close: None,
                                        clean: false,
                                        error: Some(err.to_string()),
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                            None => {
                                let _ = actor_ref
                                    .tell(SessionEvent::Disconnected {
                                        close: None,
                                        clean: false,
                                        error: None,
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
        }));

        Ok(())
    }

    async fn on_connection_failed(&mut self, error: String) -> WebSocketResult<()> {
        if !matches!(self.status, WsConnectionStatus::Connecting) {
            return Ok(());
        }
        if self.options.debug {
            debug!(%error, "connection attempt failed");
        }
        self.interceptors.dispatch(&WsEvent::Error { message: error });
        self.handle_closure(None, false).await
    }

    async fn handle_disconnected(
        &mut self,
        close: Option<WsCloseFrame>,
        clean: bool,
        error: Option<String>,
    ) -> WebSocketResult<()> {
        if !matches!(
            self.status,
            WsConnectionStatus::Open | WsConnectionStatus::Closing
        ) {
            // Stale notification from a superseded socket.
            return Ok(());
        }

        self.teardown_connection().await;

        if let Some(message) = error {
            if self.options.debug {
                debug!(%message, "socket error");
            }
            self.interceptors.dispatch(&WsEvent::Error { message });
        }

        let clean = clean || self.local_close;
        self.handle_closure(close, clean).await
    }

    async fn handle_closure(
        &mut self,
        close: Option<WsCloseFrame>,
        clean: bool,
    ) -> WebSocketResult<()> {
        let code = close
            .as_ref()
            .map(|frame| frame.code)
            .unwrap_or(if clean { 1005 } else { 1006 });
        let reason = close
            .as_ref()
            .map(|frame| String::from_utf8_lossy(frame.reason.as_ref()).into_owned())
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| close_reason(code).to_string());

        if self.options.debug {
            if clean {
                debug!(code, %reason, "connection closed");
            } else {
                debug!(code, %reason, "connection aborted");
            }
        }

        self.interceptors
            .dispatch(&WsEvent::Close(CloseEvent { code, reason, clean }));

        if clean {
            self.set_status(WsConnectionStatus::Closed);
            return Ok(());
        }

        if self.options.reconnect && self.reconnect_attempts < self.options.reconnect_attempts {
            self.reconnect_attempts += 1;
            self.set_status(WsConnectionStatus::Reconnecting);
            if self.options.debug {
                debug!(attempt = self.reconnect_attempts, "reconnecting");
            }
            let delay = self.options.reconnect_timeout;
            let epoch = self.reconnect_epoch;
            let actor_ref = self.actor_ref.clone();
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let _ = actor_ref
                    .tell(SessionEvent::ReconnectTick { epoch })
                    .send()
                    .await;
            });
        } else {
            self.set_status(WsConnectionStatus::Closed);
            if self.options.reconnect {
                // Retry budget spent: the terminal failure signal.
                self.interceptors.dispatch(&WsEvent::Exhausted {
                    attempts: self.reconnect_attempts,
                });
            }
        }

        Ok(())
    }

    async fn handle_close(&mut self, code: u16) -> WebSocketResult<()> {
        self.local_close = true;
        // A pending reconnect must not resurrect a closed session.
        self.reconnect_epoch += 1;

        if self.writer.is_none() {
            // No live socket to hand-shake with.
            self.set_status(WsConnectionStatus::Closed);
            return Ok(());
        }

        self.set_status(WsConnectionStatus::Closing);
        let reason = close_reason(code);
        self.write_frame(WsFrame::close(code, Bytes::from_static(reason.as_bytes())))
            .await;
        Ok(())
    }

    async fn emit_ping(&mut self) -> WebSocketResult<()> {
        if self.status != WsConnectionStatus::Open || self.writer.is_none() {
            return Ok(());
        }
        // The keepalive probe travels outside the JSON protocol.
        self.write_frame(WsFrame::text_static(PING_TOKEN)).await;
        Ok(())
    }

    async fn process_inbound(&mut self, frame: WsFrame) -> WebSocketResult<()> {
        match frame {
            WsFrame::Ping(payload) => {
                // tokio-tungstenite answers protocol pings itself; mirror it
                // for transports that do not.
                self.write_frame(WsFrame::Pong(payload)).await;
            }
            WsFrame::Pong(_) => {}
            WsFrame::Close(_) => {}
            WsFrame::Text(bytes) | WsFrame::Binary(bytes) => {
                self.route_payload(bytes).await;
            }
        }
        Ok(())
    }

    async fn route_payload(&mut self, bytes: Bytes) {
        // The keepalive reply is special-cased before any JSON parsing and
        // stays invisible to interceptors and the pending table.
        if is_keepalive_reply(bytes.as_ref()) {
            return;
        }

        if self.options.debug {
            debug!(len = bytes.len(), "data received");
        }

        match route_inbound(bytes.as_ref()) {
            Err(err) => {
                warn!(%err, "received invalid JSON, dropping frame");
            }
            Ok(InboundRoute::Broadcast(data)) => {
                self.interceptors.dispatch(&WsEvent::Message { data });
            }
            Ok(InboundRoute::Response { id, result }) => match self.pending.complete(&id) {
                Some(reply) => {
                    reply.send(result);
                }
                None => {
                    // Already resolved or timed out; late responses are
                    // silently ignored.
                    if self.options.debug {
                        debug!(%id, "response for unknown request id");
                    }
                }
            },
        }
    }

    fn expire_request(&mut self, id: &str) {
        if let Some(reply) = self.pending.complete(id) {
            if self.options.debug {
                debug!(%id, "request cancelled by timeout");
            }
            reply.send(Err(WebSocketError::RequestTimeout));
        }
    }

    /// Serialize and transmit a payload, emitting the `send` event on
    /// success. Transport failures are broadcast via the `error` event and
    /// never returned to the caller.
    async fn transmit_value(&mut self, value: Value) {
        let text = match sonic_rs::to_string(&value) {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "failed to serialize outbound payload");
                return;
            }
        };

        if self.writer.is_none() {
            // Raced a disconnect after the caller observed the open state;
            // the closure events already fired.
            return;
        }

        if self.write_frame(WsFrame::Text(Bytes::from(text))).await {
            if self.options.debug {
                debug!("data sent");
            }
            self.interceptors.dispatch(&WsEvent::Send { data: value });
        }
    }

    /// Write a frame to the live socket; on failure runs the abnormal
    /// closure path and returns false.
    async fn write_frame(&mut self, frame: WsFrame) -> bool {
        let Some(writer) = self.writer.as_mut() else {
            return false;
        };
        match writer.send(frame).await {
            Ok(()) => true,
            Err(err) => {
                let message = err.to_string();
                if self.options.debug {
                    debug!(%message, "write failed");
                }
                self.interceptors.dispatch(&WsEvent::Error { message });
                self.teardown_connection().await;
                let clean = self.local_close;
                let _ = self.handle_closure(None, clean).await;
                false
            }
        }
    }

    async fn teardown_connection(&mut self) {
        if let Some(stop) = self.reader_stop.take() {
            let _ = stop.send(true);
        }
        if let Some(task) = self.reader_task.take() {
            if let Err(err) = task.await {
                warn!("reader task terminated with error: {err}");
            }
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer
                .send(WsFrame::close(
                    1000,
                    Bytes::from_static(close_reason(1000).as_bytes()),
                ))
                .await;
            let _ = writer.close().await;
        }
    }
}
