//! Method registry, pending-request table, metrics, and the three
//! Remote RPC engine variants built on top of `netpipe-transport`'s
//! `Stream` contract: Synchronous (one call in flight), Asynchronous
//! (many calls in flight via a background receiver task), and
//! Bidirectional Peer (both ends call and serve over one stream).

pub mod async_remote;
pub mod metrics;
pub mod pending;
pub mod peer;
pub mod registry;
pub mod sync_remote;
pub mod typed;

pub use async_remote::AsyncRemote;
pub use metrics::{MetricsSnapshot, MetricsTracker, RemoteMetrics};
pub use pending::PendingTable;
pub use peer::Peer;
pub use registry::{Handler, HandlerFuture, MethodRegistry};
pub use sync_remote::Remote;
pub use typed::{CallRaw, Codec, RawCodec, TypedCall, TypedRemote};
