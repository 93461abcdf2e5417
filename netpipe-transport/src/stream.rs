//! The abstract bidirectional message-framed channel every RPC engine is
//! built against, independent of whether the bytes travel over TCP, a
//! Unix domain socket, or shared memory.

use netpipe_wire::Message;

/// A reliable, ordered, message-framed bidirectional byte channel between
/// exactly two endpoints.
///
/// # The connection-survives-timeout invariant
///
/// After `recv` returns `Timeout`, the stream MUST still be usable for
/// both `send` and `recv`. Only I/O errors, peer close, or
/// size-validation failure may transition a connected stream to
/// disconnected. This is what lets the RPC layer implement per-call
/// timeouts without tearing down the channel.
#[allow(async_fn_in_trait)]
pub trait Stream: Send {
    /// Prepend the outer 4-byte length and write `message`. Returns
    /// `NotFound` if the stream has already observed disconnection,
    /// `IoError` on a write failure (which also disconnects the stream).
    async fn send(&mut self, message: &[u8]) -> netpipe_wire::Result<()>;

    /// Read exactly one framed message. Returns `Timeout` if
    /// `set_recv_timeout` has fired without a complete message arriving
    /// (the stream stays connected); `NotFound` on peer close;
    /// `InvalidArgument` if the declared length exceeds the configured
    /// maximum.
    async fn recv(&mut self) -> netpipe_wire::Result<Message>;

    /// `None` blocks forever. `Some(d)` makes `recv` return `Timeout`
    /// after `d` of no data.
    fn set_recv_timeout(&mut self, timeout: Option<std::time::Duration>);

    /// Release resources. Idempotent.
    async fn close(&mut self);

    fn is_connected(&self) -> bool;
}
