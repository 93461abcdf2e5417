//! An in-process duplex `Stream`, used as the test fixture for the RPC
//! engines in `netpipe-rpc` and as a template for anyone writing a new
//! byte-stream-backed transport (TCP, UDS). Grounded directly in this
//! stack's `MemTransport`: a pair of bounded `tokio::mpsc` channels with
//! an `AtomicBool` closed flag, rather than shared-memory rings (that's
//! `netpipe-shm`'s job).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use netpipe_wire::{Message, NetpipeError, DEFAULT_MAX_MESSAGE_SIZE};
use tokio::sync::{mpsc, Mutex};

use crate::stream::Stream;

const CHANNEL_CAPACITY: usize = 64;

struct Shared {
    closed: AtomicBool,
}

/// One end of an in-process duplex channel.
pub struct MemStream {
    tx: mpsc::Sender<Message>,
    rx: Mutex<mpsc::Receiver<Message>>,
    shared: Arc<Shared>,
    recv_timeout: Option<Duration>,
    max_message_size: usize,
}

impl MemStream {
    /// Create a connected pair, mirroring `StreamTransport::pair()`'s role
    /// for this stack's native transport.
    pub fn pair() -> (MemStream, MemStream) {
        let (a_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (b_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let shared_a = Arc::new(Shared { closed: AtomicBool::new(false) });
        let shared_b = Arc::new(Shared { closed: AtomicBool::new(false) });
        (
            MemStream {
                tx: a_tx,
                rx: Mutex::new(a_rx),
                shared: shared_a,
                recv_timeout: None,
                max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            },
            MemStream {
                tx: b_tx,
                rx: Mutex::new(b_rx),
                shared: shared_b,
                recv_timeout: None,
                max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            },
        )
    }

    pub fn set_max_message_size(&mut self, max: usize) {
        self.max_message_size = max;
    }
}

impl Stream for MemStream {
    async fn send(&mut self, message: &[u8]) -> netpipe_wire::Result<()> {
        if !self.is_connected() {
            return Err(NetpipeError::NotFound("stream is closed".to_string()));
        }
        if message.len() > self.max_message_size {
            return Err(NetpipeError::InvalidArgument(
                netpipe_wire::InvalidArgument::PayloadTooLarge {
                    len: message.len(),
                    max: self.max_message_size,
                },
            ));
        }
        self.tx.send(message.to_vec()).await.map_err(|_| {
            self.shared.closed.store(true, Ordering::Release);
            NetpipeError::NotFound("peer closed the connection".to_string())
        })
    }

    async fn recv(&mut self) -> netpipe_wire::Result<Message> {
        if !self.is_connected() {
            return Err(NetpipeError::NotFound("stream is closed".to_string()));
        }
        let mut rx = self.rx.lock().await;
        let fut = rx.recv();
        let result = match self.recv_timeout {
            Some(d) => match tokio::time::timeout(d, fut).await {
                Ok(inner) => inner,
                Err(_) => return Err(NetpipeError::Timeout),
            },
            None => fut.await,
        };
        match result {
            Some(message) => Ok(message),
            None => {
                self.shared.closed.store(true, Ordering::Release);
                Err(NetpipeError::NotFound("peer closed the connection".to_string()))
            }
        }
    }

    fn set_recv_timeout(&mut self, timeout: Option<Duration>) {
        self.recv_timeout = timeout;
    }

    async fn close(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        !self.shared.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_a_message() {
        let (mut a, mut b) = MemStream::pair();
        a.send(b"hello").await.unwrap();
        let got = b.recv().await.unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn recv_timeout_does_not_disconnect() {
        let (mut a, mut b) = MemStream::pair();
        b.set_recv_timeout(Some(Duration::from_millis(20)));
        let err = b.recv().await.unwrap_err();
        assert!(matches!(err, NetpipeError::Timeout));
        assert!(b.is_connected());
        a.send(b"still alive").await.unwrap();
        let got = b.recv().await.unwrap();
        assert_eq!(got, b"still alive");
    }

    #[tokio::test]
    async fn closing_peer_surfaces_not_found() {
        let (mut a, mut b) = MemStream::pair();
        a.close().await;
        drop(a);
        let err = b.recv().await.unwrap_err();
        assert!(matches!(err, NetpipeError::NotFound(_)));
        assert!(!b.is_connected());
    }

    #[tokio::test]
    async fn oversized_message_rejected_on_send() {
        let (mut a, _b) = MemStream::pair();
        a.set_max_message_size(4);
        let err = a.send(b"too long").await.unwrap_err();
        assert!(matches!(
            err,
            NetpipeError::InvalidArgument(netpipe_wire::InvalidArgument::PayloadTooLarge { .. })
        ));
    }
}
