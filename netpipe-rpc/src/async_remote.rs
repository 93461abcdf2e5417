//! Asynchronous Remote: many calls in flight at once, driven by a
//! background receiver task.
//!
//! The literal thread+condvar design becomes: one `tokio::spawn`'d
//! receiver loop, a `PendingTable` keyed by request id, and
//! `tokio::sync::oneshot` in place of "mutex + condvar + completed
//! flag" per pending call. `call` races nothing but the receiver and
//! `cancel`; whichever of those two first calls `table.take` owns
//! completing the waiter.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use netpipe_transport::stream::Stream;
use netpipe_wire::{decode_auto, encode_v2, EnvelopeFlags, Message, MessageType, NetpipeError, Result};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

use crate::metrics::RemoteMetrics;
use crate::pending::PendingTable;

/// How often the receiver task's `recv` wakes up on its own to check
/// `running`. Independent of any per-call timeout.
const RECEIVER_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct AsyncRemote<S: Stream + Send + 'static> {
    stream: Arc<AsyncMutex<S>>,
    next_id: AtomicU32,
    table: Arc<PendingTable>,
    running: Arc<AtomicBool>,
    max_concurrent: usize,
    metrics: Option<Arc<RemoteMetrics>>,
    receiver: Option<JoinHandle<()>>,
}

impl<S: Stream + Send + 'static> AsyncRemote<S> {
    /// Spawns the receiver task immediately. `max_concurrent == 0` means
    /// unbounded.
    pub fn new(mut stream: S, max_concurrent: usize, metrics_enabled: bool) -> Self {
        stream.set_recv_timeout(Some(RECEIVER_POLL_INTERVAL));
        let stream = Arc::new(AsyncMutex::new(stream));
        let table = Arc::new(PendingTable::new());
        let running = Arc::new(AtomicBool::new(true));
        let metrics = metrics_enabled.then(|| Arc::new(RemoteMetrics::new()));

        let receiver = tokio::spawn(receiver_loop(stream.clone(), table.clone(), running.clone()));

        Self {
            stream,
            next_id: AtomicU32::new(1),
            table,
            running,
            max_concurrent,
            metrics,
            receiver: Some(receiver),
        }
    }

    fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn pending_count(&self) -> usize {
        self.table.size()
    }

    pub fn metrics(&self) -> Option<&RemoteMetrics> {
        self.metrics.as_deref()
    }

    #[instrument(skip(self, payload))]
    pub async fn call(&self, method_id: u32, payload: &[u8], timeout_ms: u32) -> Result<Message> {
        if self.max_concurrent > 0 && self.table.size() >= self.max_concurrent {
            return Err(NetpipeError::IoError("max concurrent".into()));
        }

        let id = self.allocate_id();
        let tracker = self.metrics.as_ref().map(|m| m.begin_call(payload.len()));
        let (tx, rx) = oneshot::channel();
        self.table.insert(id, tx);

        let frame = encode_v2(id, method_id, payload, MessageType::Request, EnvelopeFlags::empty());
        if let Err(e) = self.stream.lock().await.send(&frame).await {
            self.table.remove(id);
            if let Some(t) = tracker {
                t.finish_failure();
            }
            return Err(e);
        }

        let wait = rx_with_timeout(rx, timeout_ms);
        match wait.await {
            Ok(Ok(result)) => {
                if let Some(t) = tracker {
                    match &result {
                        Ok(payload) => t.finish_success(payload.len()),
                        Err(_) => t.finish_failure(),
                    }
                }
                result
            }
            Ok(Err(_)) => {
                // Sender dropped without completing: receiver task died.
                if let Some(t) = tracker {
                    t.finish_failure();
                }
                Err(NetpipeError::IoError("receiver task ended before completing the call".into()))
            }
            Err(_elapsed) => {
                self.table.remove(id);
                if let Some(t) = tracker {
                    t.finish_timeout();
                }
                Err(NetpipeError::Timeout)
            }
        }
    }

    /// Cancel an outstanding call. Best-effort notifies the peer with a
    /// `Cancel` envelope; returns `true` if a pending waiter was actually
    /// found and completed here (i.e. this caller won the race against
    /// the receiver delivering a late response).
    pub async fn cancel(&self, request_id: u32) -> bool {
        let Some(tx) = self.table.take(request_id) else {
            return false;
        };
        let _ = tx.send(Err(NetpipeError::NotFound(format!(
            "request {request_id} cancelled"
        ))));
        let frame = encode_v2(request_id, 0, &[], MessageType::Cancel, EnvelopeFlags::empty());
        if let Err(e) = self.stream.lock().await.send(&frame).await {
            trace!(?e, request_id, "best-effort cancel notification failed");
        }
        true
    }
}

async fn rx_with_timeout(
    rx: oneshot::Receiver<Result<Message>>,
    timeout_ms: u32,
) -> core::result::Result<core::result::Result<Result<Message>, oneshot::error::RecvError>, tokio::time::error::Elapsed>
{
    if timeout_ms == 0 {
        Ok(rx.await)
    } else {
        tokio::time::timeout(Duration::from_millis(timeout_ms as u64), rx).await
    }
}

async fn receiver_loop<S: Stream + Send + 'static>(
    stream: Arc<AsyncMutex<S>>,
    table: Arc<PendingTable>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        let recv_result = stream.lock().await.recv().await;
        let raw = match recv_result {
            Ok(raw) => raw,
            Err(NetpipeError::Timeout) => continue,
            Err(e) => {
                warn!(?e, "receiver loop ending: stream failed");
                running.store(false, Ordering::Release);
                let message = e.to_string();
                table.fail_all(|| NetpipeError::IoError(message.clone()));
                return;
            }
        };

        let envelope = match decode_auto(&raw, netpipe_wire::DEFAULT_MAX_MESSAGE_SIZE) {
            Ok(env) => env,
            Err(e) => {
                warn!(?e, "dropping undecodable frame");
                continue;
            }
        };

        if matches!(envelope.r#type, MessageType::Cancel) {
            trace!(request_id = envelope.request_id, "peer cancelled a request we never issued");
            continue;
        }

        let Some(tx) = table.take(envelope.request_id) else {
            debug!(request_id = envelope.request_id, "no pending call for this response");
            continue;
        };

        let result = if matches!(envelope.r#type, MessageType::Error) {
            Err(NetpipeError::IoError(String::from_utf8_lossy(&envelope.payload).into_owned()))
        } else {
            Ok(envelope.payload)
        };
        let _ = tx.send(result);
    }
}

impl<S: Stream + Send + 'static> Drop for AsyncRemote<S> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.table.fail_all(|| NetpipeError::NotFound("remote dropped".into()));
        if let Some(handle) = self.receiver.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpipe_transport::MemStream;

    #[tokio::test]
    async fn call_completes_via_receiver_task() {
        let (client_stream, mut server_stream) = MemStream::pair();
        tokio::spawn(async move {
            loop {
                let raw = match server_stream.recv().await {
                    Ok(raw) => raw,
                    Err(_) => return,
                };
                let env = decode_auto(&raw, netpipe_wire::DEFAULT_MAX_MESSAGE_SIZE).unwrap();
                let frame = encode_v2(
                    env.request_id,
                    env.method_id,
                    &env.payload,
                    MessageType::Response,
                    EnvelopeFlags::empty(),
                );
                if server_stream.send(&frame).await.is_err() {
                    return;
                }
            }
        });

        let remote = AsyncRemote::new(client_stream, 0, true);
        let resp = remote.call(7, b"ping", 1000).await.unwrap();
        assert_eq!(resp, b"ping");
        assert_eq!(remote.metrics().unwrap().snapshot().successful_requests, 1);
    }

    #[tokio::test]
    async fn concurrent_calls_each_get_their_own_response() {
        let (client_stream, mut server_stream) = MemStream::pair();
        tokio::spawn(async move {
            loop {
                let raw = match server_stream.recv().await {
                    Ok(raw) => raw,
                    Err(_) => return,
                };
                let env = decode_auto(&raw, netpipe_wire::DEFAULT_MAX_MESSAGE_SIZE).unwrap();
                let mut payload = env.payload.clone();
                payload.push(0xFF);
                let frame =
                    encode_v2(env.request_id, env.method_id, &payload, MessageType::Response, EnvelopeFlags::empty());
                if server_stream.send(&frame).await.is_err() {
                    return;
                }
            }
        });

        let remote = Arc::new(AsyncRemote::new(client_stream, 0, false));
        let mut tasks = Vec::new();
        for i in 0..8u8 {
            let remote = remote.clone();
            tasks.push(tokio::spawn(async move {
                let resp = remote.call(1, &[i], 1000).await.unwrap();
                assert_eq!(resp, vec![i, 0xFF]);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
    }

    #[tokio::test]
    async fn timeout_does_not_leak_pending_entry() {
        let (client_stream, _server_stream) = MemStream::pair();
        let remote = AsyncRemote::new(client_stream, 0, false);
        let err = remote.call(1, b"hello", 10).await.unwrap_err();
        assert!(matches!(err, NetpipeError::Timeout));
        assert_eq!(remote.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancel_unblocks_the_waiting_call() {
        let (client_stream, _server_stream) = MemStream::pair();
        let remote = Arc::new(AsyncRemote::new(client_stream, 0, false));
        let caller = remote.clone();
        let call_task = tokio::spawn(async move { caller.call(1, b"hello", 5_000).await });

        // Give the call a moment to register itself in the pending table.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(remote.cancel(1).await);

        let result = call_task.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn max_concurrent_rejects_once_the_limit_is_reached() {
        let (client_stream, _server_stream) = MemStream::pair();
        let remote = AsyncRemote::new(client_stream, 1, false);
        let remote = Arc::new(remote);
        let blocker = remote.clone();
        let blocked_call = tokio::spawn(async move { blocker.call(1, b"a", 5_000).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = remote.call(1, b"b", 100).await.unwrap_err();
        assert!(matches!(err, NetpipeError::IoError(_)));

        blocked_call.abort();
    }
}
