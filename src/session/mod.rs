pub mod actor;
pub mod handle;

pub use actor::{BeginRequest, SessionActor, SessionArgs, SessionEvent, Subscribe, Unsubscribe};
pub use handle::WsSession;
