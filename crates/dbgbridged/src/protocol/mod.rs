//! Wire protocol spoken on the daemon channel.
//!
//! Every message is a single UTF-8 JSON object terminated by `\n`. Clients
//! send requests of one shape:
//!
//! ```json
//! {"type":"command","id":7,"command":"echo_test","args":{}}
//! ```
//!
//! and receive exactly one response per request, carrying the request's `id`
//! and `command`:
//!
//! ```json
//! {"id":7,"type":"response","command":"echo_test","status":"success","output":"ok"}
//! ```
//!
//! Failures carry `error`, `error_code`, `error_category` and `suggestion`.
//! The server may also push unsolicited notifications on a connection.

mod codec;
mod message;

pub use self::codec::{
    CodecError, DELIMITER, FrameBuffer, MAX_FRAME_BYTES, READ_CHUNK_BYTES, encode,
};
pub use self::message::{
    ErrorCategory, ErrorCode, Failure, MessageKind, Notification, Outbound, Reply, Request,
    Response, Status,
};
