pub mod correlate;
pub mod envelope;
pub mod frame;
pub mod interceptor;
pub mod types;

pub use correlate::*;
pub use envelope::*;
pub use frame::*;
pub use interceptor::*;
pub use types::*;
