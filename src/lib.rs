//! Resilient, message-correlated websocket client session.
//!
//! One [`WsSession`] wraps one duplex socket: it reconnects after abnormal
//! closures with a bounded retry budget, keeps the link alive with periodic
//! keepalive probes, correlates requests to their responses by id over an
//! unordered message channel, and broadcasts lifecycle and unsolicited
//! inbound messages to typed interceptors.

pub mod client;
pub mod core;
pub mod session;
pub mod testing;
pub mod transport;

pub use crate::core::{
    CloseEvent, InterceptorId, WebSocketError, WebSocketResult, WsAddress, WsConnectionStatus,
    WsEvent, WsEventKind, WsOptions,
};
pub use crate::session::WsSession;
