//! Wire bindings
//!
//! Each binding decodes messages into envelopes for the [`Dispatcher`] and
//! encodes the replies. A failure on one client never reaches another.
//!
//! [`Dispatcher`]: crate::dispatcher::Dispatcher

pub mod http;
pub mod push;
pub mod stdio;

pub use http::{router, HttpState};
pub use push::{ClientStream, Framing, PushHub, KEEPALIVE_INTERVAL};
pub use stdio::StdioExit;
