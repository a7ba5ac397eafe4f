//! Channel listener and accepted stream types.
//!
//! The transport binds the configured channel and accepts connections on a
//! background thread, handing every accepted stream to a
//! [`ConnectionHandler`]. Binding and accept failures are retried with a
//! fixed backoff instead of terminating the listener.

mod errors;
mod listener;
#[cfg(test)]
mod listener_tests;
mod stream;
#[cfg(test)]
mod test_utils;

pub use self::errors::ListenerError;
pub(crate) use self::listener::{ListenerHandle, SocketListener};
pub(crate) use self::stream::{ConnectionHandler, ConnectionStream};
#[cfg(test)]
pub(crate) use self::test_utils::{CountingHandler, connect_with_retry};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
