//! `netpipe`: a transport-agnostic request/response RPC core.
//!
//! This crate is a thin facade over the workspace's inner crates,
//! mirroring how a multi-crate library typically exposes one
//! convenient top-level entry point while the real implementation lives
//! in crates that can be depended on individually:
//!
//! - [`wire`] — V1/legacy and V2/current envelope framing, the shared
//!   error taxonomy, and the opaque `Message` byte-vector type.
//! - [`transport`] — the [`Stream`] contract every transport implements,
//!   outer length-prefix framing, and an in-process test transport.
//! - [`shm`] — a shared-memory bidirectional transport built from two
//!   SPSC byte rings.
//! - [`rpc`] — the method registry, pending-request table, metrics, and
//!   the three Remote engine variants (Synchronous, Asynchronous,
//!   Bidirectional Peer).

pub use netpipe_rpc as rpc;
pub use netpipe_shm as shm;
pub use netpipe_transport as transport;
pub use netpipe_wire as wire;

pub use netpipe_rpc::{AsyncRemote, Handler, MethodRegistry, Peer, Remote, TypedRemote};
pub use netpipe_shm::{ShmListener, ShmStream};
pub use netpipe_transport::{MemStream, Stream};
pub use netpipe_wire::{Message, NetpipeError, Result};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn facade_reexports_are_wired_up() {
        let (client, server) = MemStream::pair();
        let mut server_remote = Remote::new(server);
        let server_task = tokio::spawn(async move {
            let _ = server_remote.serve(|p: Message| async move { Ok(p) }).await;
        });

        let mut client_remote = Remote::new(client);
        let resp = client_remote.call(b"ping", 1000).await.unwrap();
        assert_eq!(resp, b"ping");

        client_remote.stream_mut().close().await;
        server_task.await.unwrap();
    }
}
