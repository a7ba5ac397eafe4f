//! Command lookup and request dispatch.
//!
//! The [`CommandRegistry`] maps command names to handlers. It is filled before
//! the server starts and frozen when it does, after which lookups need no
//! locking. The dispatcher turns one inbound frame into exactly one
//! [`Response`](crate::protocol::Response), converting malformed input,
//! unknown commands, handler errors and handler panics into structured error
//! responses so a bad request never takes its connection down.

mod dispatcher;
mod errors;
mod registry;

pub(crate) use self::dispatcher::Dispatcher;
pub use self::errors::CommandError;
pub use self::registry::{CommandHandler, CommandRegistry, RegistryError};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
