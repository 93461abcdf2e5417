//! Synchronous Remote: one in-flight call at a time, no background task.
//! One call in flight at a time, no background task.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use netpipe_transport::stream::Stream;
use netpipe_wire::{decode_auto, encode_v1, InvalidArgument, Message, NetpipeError, Result};
use tracing::instrument;

use crate::registry::Handler;

/// Not safe to share across threads: a single caller thread, a single
/// peer thread.
pub struct Remote<S: Stream> {
    stream: S,
    next_id: AtomicU32,
}

impl<S: Stream> Remote<S> {
    pub fn new(stream: S) -> Self {
        Self { stream, next_id: AtomicU32::new(1) }
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    #[instrument(skip(self, payload))]
    pub async fn call(&mut self, payload: &[u8], timeout_ms: u32) -> Result<Message> {
        let id = self.allocate_id();
        let frame = encode_v1(id, payload, false);
        self.stream.set_recv_timeout(if timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(timeout_ms as u64))
        });
        self.stream.send(&frame).await?;
        let raw = self.stream.recv().await?;
        let decoded = decode_auto(&raw, netpipe_wire::DEFAULT_MAX_MESSAGE_SIZE)?;
        if decoded.request_id != id {
            return Err(NetpipeError::InvalidArgument(InvalidArgument::RequestIdMismatch {
                expected: id,
                got: decoded.request_id,
            }));
        }
        if matches!(decoded.r#type, netpipe_wire::MessageType::Error) {
            return Err(NetpipeError::IoError(String::from_utf8_lossy(&decoded.payload).into_owned()));
        }
        Ok(decoded.payload)
    }

    /// Loop forever: receive, decode, invoke `handler`, encode and send a
    /// response (or error). Terminates on the first stream failure,
    /// returning it.
    pub async fn serve(&mut self, handler: impl Handler) -> NetpipeError {
        loop {
            let raw = match self.stream.recv().await {
                Ok(raw) => raw,
                Err(e) => return e,
            };
            let decoded = match decode_auto(&raw, netpipe_wire::DEFAULT_MAX_MESSAGE_SIZE) {
                Ok(d) => d,
                Err(e) => return e,
            };
            let response = handler.call(decoded.payload).await;
            let frame = match response {
                Ok(payload) => encode_v1(decoded.request_id, &payload, false),
                Err(e) => encode_v1(decoded.request_id, e.to_string().as_bytes(), true),
            };
            if let Err(e) = self.stream.send(&frame).await {
                return e;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpipe_transport::MemStream;

    #[tokio::test]
    async fn call_and_serve_echo() {
        let (client_stream, server_stream) = MemStream::pair();
        let mut server = Remote::new(server_stream);
        let server_task = tokio::spawn(async move {
            let _ = server.serve(|payload: Message| async move { Ok(payload) }).await;
        });

        let mut client = Remote::new(client_stream);
        let resp = client.call(&[1, 2, 3], 1000).await.unwrap();
        assert_eq!(resp, vec![1, 2, 3]);

        client.stream_mut().close().await;
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn mismatched_request_id_is_invalid_argument() {
        let (client_stream, mut server_stream) = MemStream::pair();
        tokio::spawn(async move {
            let raw = server_stream.recv().await.unwrap();
            let decoded = decode_auto(&raw, netpipe_wire::DEFAULT_MAX_MESSAGE_SIZE).unwrap();
            // Respond with a wrong request id to trigger the mismatch path.
            let frame = encode_v1(decoded.request_id + 1, b"oops", false);
            server_stream.send(&frame).await.unwrap();
        });
        let mut client = Remote::new(client_stream);
        let err = client.call(b"hi", 1000).await.unwrap_err();
        assert!(matches!(
            err,
            NetpipeError::InvalidArgument(InvalidArgument::RequestIdMismatch { .. })
        ));
    }
}
