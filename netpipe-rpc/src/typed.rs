//! Supplemental typed-call wrapper, layered on top of the byte-oriented
//! engines rather than replacing them.
//!
//! Neither this crate nor its workspace carries a serialization
//! dependency (no serde, no facet): a caller who wants typed calls
//! supplies their own [`Codec`] — as small as a newtype around
//! `to_be_bytes`/`from_be_bytes`, or a hand-written length-prefixed
//! struct encoder. [`TypedRemote`] only adds the encode-call-decode
//! plumbing around whichever engine it wraps.

use std::marker::PhantomData;

use netpipe_transport::stream::Stream;
use netpipe_wire::Message;
use netpipe_wire::Result;

use crate::async_remote::AsyncRemote;
use crate::peer::Peer;

/// Converts a single Rust type to and from wire bytes. Implement this
/// directly on a marker type (or on `T` itself) per call site; there is
/// no blanket serde-backed implementation.
pub trait Codec<T> {
    fn encode(value: &T) -> Message;
    fn decode(bytes: &[u8]) -> Result<T>;
}

/// Identity codec for callers who already have raw bytes and only want
/// [`TypedRemote`]'s method-id-keyed ergonomics.
pub struct RawCodec;

impl Codec<Message> for RawCodec {
    fn encode(value: &Message) -> Message {
        value.clone()
    }

    fn decode(bytes: &[u8]) -> Result<Message> {
        Ok(bytes.to_vec())
    }
}

/// A byte-level engine [`TypedRemote`] can drive. Implemented for the
/// two method-id-aware engines ([`AsyncRemote`] and [`Peer`]); the
/// Synchronous engine has no method id to dispatch against and is used
/// directly instead.
#[allow(async_fn_in_trait)]
pub trait CallRaw: Send + Sync {
    async fn call_raw(&self, method_id: u32, payload: &[u8], timeout_ms: u32) -> Result<Message>;
}

impl<S: Stream + Send + 'static> CallRaw for AsyncRemote<S> {
    async fn call_raw(&self, method_id: u32, payload: &[u8], timeout_ms: u32) -> Result<Message> {
        self.call(method_id, payload, timeout_ms).await
    }
}

impl<S: Stream + Send + 'static> CallRaw for Peer<S> {
    async fn call_raw(&self, method_id: u32, payload: &[u8], timeout_ms: u32) -> Result<Message> {
        self.call(method_id, payload, timeout_ms).await
    }
}

/// Wraps any [`CallRaw`] engine and encodes/decodes request and
/// response payloads through caller-supplied [`Codec`]s.
pub struct TypedRemote<R> {
    inner: R,
}

impl<R: CallRaw> TypedRemote<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub async fn call<Req, Resp, CReq, CResp>(
        &self,
        method_id: u32,
        request: &Req,
        timeout_ms: u32,
    ) -> Result<Resp>
    where
        CReq: Codec<Req>,
        CResp: Codec<Resp>,
    {
        let payload = CReq::encode(request);
        let raw = self.inner.call_raw(method_id, &payload, timeout_ms).await?;
        CResp::decode(&raw)
    }
}

/// Convenience when the same codec handles both request and response
/// types, to avoid repeating the codec at every call site.
pub struct TypedCall<C>(PhantomData<C>);

impl<C> TypedCall<C> {
    pub async fn call<R, Req, Resp>(
        remote: &TypedRemote<R>,
        method_id: u32,
        request: &Req,
        timeout_ms: u32,
    ) -> Result<Resp>
    where
        R: CallRaw,
        C: Codec<Req> + Codec<Resp>,
    {
        remote.call::<Req, Resp, C, C>(method_id, request, timeout_ms).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpipe_transport::MemStream;
    use netpipe_wire::{decode_auto, encode_v2, EnvelopeFlags, MessageType};

    struct U32Codec;

    impl Codec<u32> for U32Codec {
        fn encode(value: &u32) -> Message {
            value.to_be_bytes().to_vec()
        }

        fn decode(bytes: &[u8]) -> Result<u32> {
            let arr: [u8; 4] = bytes.try_into().map_err(|_| {
                netpipe_wire::NetpipeError::InvalidArgument(netpipe_wire::InvalidArgument::LengthMismatch {
                    declared: 4,
                    actual: bytes.len(),
                })
            })?;
            Ok(u32::from_be_bytes(arr))
        }
    }

    #[tokio::test]
    async fn typed_call_round_trips_through_a_codec() {
        let (client_stream, mut server_stream) = MemStream::pair();
        tokio::spawn(async move {
            let raw = server_stream.recv().await.unwrap();
            let env = decode_auto(&raw, netpipe_wire::DEFAULT_MAX_MESSAGE_SIZE).unwrap();
            let n = u32::from_be_bytes(env.payload.clone().try_into().unwrap());
            let doubled = (n * 2).to_be_bytes().to_vec();
            let frame = encode_v2(env.request_id, env.method_id, &doubled, MessageType::Response, EnvelopeFlags::empty());
            server_stream.send(&frame).await.unwrap();
        });

        let remote = AsyncRemote::new(client_stream, 0, false);
        let typed = TypedRemote::new(remote);
        let result: u32 = typed.call::<u32, u32, U32Codec, U32Codec>(1, &21, 1000).await.unwrap();
        assert_eq!(result, 42);
    }
}
