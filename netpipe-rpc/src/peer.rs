//! Bidirectional Peer: both ends can originate calls and both ends serve
//! a method registry over the same stream.
//!
//! Built directly on top of the asynchronous client's machinery
//! (`PendingTable`, one receiver task, `oneshot` per outstanding call)
//! plus a `MethodRegistry` consulted inline, on the receiver task, for
//! anything that arrives shaped like a request rather than a response.
//! The stream is wrapped in the same single `tokio::sync::Mutex` used by
//! [`crate::async_remote::AsyncRemote`]: both the receiver task's
//! handler-response writes and a caller's outgoing `call` compete for it,
//! which is required here in a way it wasn't for the client-only variant,
//! since now two different tasks genuinely write to the same stream.
//!
//! Interrupting a handler mid-flight on an incoming `Cancel` is not
//! implemented: a `Cancel` envelope for a request this side is currently
//! serving is logged and otherwise ignored, the handler future runs to
//! completion regardless.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use netpipe_transport::stream::Stream;
use netpipe_wire::{decode_auto, encode_v2, EnvelopeFlags, Message, MessageType, NetpipeError, Result};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

use crate::metrics::RemoteMetrics;
use crate::pending::PendingTable;
use crate::registry::MethodRegistry;

const RECEIVER_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct Peer<S: Stream + Send + 'static> {
    stream: Arc<AsyncMutex<S>>,
    next_id: AtomicU32,
    table: Arc<PendingTable>,
    registry: Arc<MethodRegistry>,
    running: Arc<AtomicBool>,
    max_concurrent: usize,
    metrics: Option<Arc<RemoteMetrics>>,
    handler_metrics: Option<Arc<RemoteMetrics>>,
    receiver: Option<JoinHandle<()>>,
}

impl<S: Stream + Send + 'static> Peer<S> {
    pub fn new(
        mut stream: S,
        registry: Arc<MethodRegistry>,
        max_concurrent: usize,
        metrics_enabled: bool,
    ) -> Self {
        stream.set_recv_timeout(Some(RECEIVER_POLL_INTERVAL));
        let stream = Arc::new(AsyncMutex::new(stream));
        let table = Arc::new(PendingTable::new());
        let running = Arc::new(AtomicBool::new(true));
        let metrics = metrics_enabled.then(|| Arc::new(RemoteMetrics::new()));
        let handler_metrics = metrics_enabled.then(|| Arc::new(RemoteMetrics::new()));

        let receiver = tokio::spawn(receiver_loop(
            stream.clone(),
            table.clone(),
            registry.clone(),
            running.clone(),
            handler_metrics.clone(),
        ));

        Self {
            stream,
            next_id: AtomicU32::new(1),
            table,
            registry,
            running,
            max_concurrent,
            metrics,
            handler_metrics,
            receiver: Some(receiver),
        }
    }

    fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn pending_count(&self) -> usize {
        self.table.size()
    }

    pub fn metrics(&self) -> Option<&RemoteMetrics> {
        self.metrics.as_deref()
    }

    /// Metrics for inbound requests this side serves, separate from
    /// [`Peer::metrics`]'s outbound `call()` accounting.
    pub fn handler_metrics(&self) -> Option<&RemoteMetrics> {
        self.handler_metrics.as_deref()
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

        let wait = if timeout_ms == 0 {
            Ok(rx.await)
        } else {
            tokio::time::timeout(Duration::from_millis(timeout_ms as u64), rx).await
        };

        match wait {
            Ok(Ok(result)) => {
                if let Some(t) = tracker {
                    match &result {
                        Ok(p) => t.finish_success(p.len()),
                        Err(_) => t.finish_failure(),
                    }
                }
                result
            }
            Ok(Err(_)) => {
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

    /// Send a one-way notification: no response is expected or awaited.
    pub async fn notify(&self, method_id: u32, payload: &[u8]) -> Result<()> {
        let frame = encode_v2(0, method_id, payload, MessageType::Notification, EnvelopeFlags::empty());
        self.stream.lock().await.send(&frame).await
    }

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

async fn receiver_loop<S: Stream + Send + 'static>(
    stream: Arc<AsyncMutex<S>>,
    table: Arc<PendingTable>,
    registry: Arc<MethodRegistry>,
    running: Arc<AtomicBool>,
    handler_metrics: Option<Arc<RemoteMetrics>>,
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

        match envelope.r#type {
            MessageType::Request | MessageType::Notification => {
                let is_notification = matches!(envelope.r#type, MessageType::Notification);
                let handler = registry.get(envelope.method_id);
                let response = match handler {
                    Some(h) => {
                        let started = Instant::now();
                        let result = h.call(envelope.payload).await;
                        if let Some(m) = &handler_metrics {
                            m.record_handler_invocation(started.elapsed().as_micros() as u64);
                        }
                        result
                    }
                    None => Err(NetpipeError::InvalidArgument(
                        netpipe_wire::InvalidArgument::UnknownMethod(envelope.method_id),
                    )),
                };
                if is_notification {
                    if let Err(e) = response {
                        debug!(?e, method_id = envelope.method_id, "notification handler failed");
                    }
                    continue;
                }
                let frame = match response {
                    Ok(payload) => encode_v2(
                        envelope.request_id,
                        envelope.method_id,
                        &payload,
                        MessageType::Response,
                        EnvelopeFlags::empty(),
                    ),
                    Err(e) => encode_v2(
                        envelope.request_id,
                        envelope.method_id,
                        e.to_string().as_bytes(),
                        MessageType::Error,
                        EnvelopeFlags::empty(),
                    ),
                };
                if let Err(e) = stream.lock().await.send(&frame).await {
                    warn!(?e, "failed to send response, ending receiver loop");
                    running.store(false, Ordering::Release);
                    return;
                }
            }
            MessageType::Cancel => {
                trace!(
                    request_id = envelope.request_id,
                    "peer asked to cancel a request we are serving; not interrupted"
                );
            }
            MessageType::Response | MessageType::Error | MessageType::StreamData
            | MessageType::StreamEnd | MessageType::StreamError => {
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
    }
}

impl<S: Stream + Send + 'static> Drop for Peer<S> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.table.fail_all(|| NetpipeError::NotFound("peer dropped".into()));
        if let Some(handle) = self.receiver.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpipe_transport::MemStream;

    fn echo_registry() -> Arc<MethodRegistry> {
        let registry = MethodRegistry::new();
        registry
            .register(1, |payload: Message| async move { Ok(payload) })
            .unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn both_sides_can_call_each_other() {
        let (a_stream, b_stream) = MemStream::pair();
        let a = Peer::new(a_stream, echo_registry(), 0, false);
        let b = Peer::new(b_stream, echo_registry(), 0, false);

        let resp = a.call(1, b"from-a", 1000).await.unwrap();
        assert_eq!(resp, b"from-a");
        let resp = b.call(1, b"from-b", 1000).await.unwrap();
        assert_eq!(resp, b"from-b");
    }

    #[tokio::test]
    async fn unknown_method_returns_error_envelope() {
        let (a_stream, b_stream) = MemStream::pair();
        let a = Peer::new(a_stream, echo_registry(), 0, false);
        let _b = Peer::new(b_stream, Arc::new(MethodRegistry::new()), 0, false);

        let err = a.call(42, b"?", 1000).await.unwrap_err();
        assert!(matches!(err, NetpipeError::IoError(_)));
    }

    #[tokio::test]
    async fn notification_gets_no_response_and_does_not_block() {
        let (a_stream, b_stream) = MemStream::pair();
        let a = Peer::new(a_stream, Arc::new(MethodRegistry::new()), 0, false);
        let _b = Peer::new(b_stream, echo_registry(), 0, false);

        a.notify(1, b"fire-and-forget").await.unwrap();
        // Nothing to await: a successful send is the whole contract.
    }

    #[tokio::test]
    async fn handler_invocations_are_tracked_separately_from_outbound_calls() {
        let (a_stream, b_stream) = MemStream::pair();
        let a = Peer::new(a_stream, Arc::new(MethodRegistry::new()), 0, true);
        let b = Peer::new(b_stream, echo_registry(), 0, true);

        a.call(1, b"ping", 1000).await.unwrap();

        let a_snap = a.metrics().unwrap().snapshot();
        assert_eq!(a_snap.total_requests, 1);
        assert_eq!(a_snap.handler_invocations, 0);

        // Give b's receiver task a moment to record the handler invocation.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let b_handler_snap = b.handler_metrics().unwrap().snapshot();
        assert_eq!(b_handler_snap.handler_invocations, 1);
        let b_call_snap = b.metrics().unwrap().snapshot();
        assert_eq!(b_call_snap.total_requests, 0);
    }

    #[tokio::test]
    async fn cancel_completes_the_local_waiter() {
        let (a_stream, b_stream) = MemStream::pair();
        let a = Arc::new(Peer::new(a_stream, Arc::new(MethodRegistry::new()), 0, false));
        // Peer b never answers method 1, so a's call blocks until cancelled.
        let _b = Peer::new(b_stream, Arc::new(MethodRegistry::new()), 0, false);

        let caller = a.clone();
        let call_task = tokio::spawn(async move { caller.call(1, b"hang", 5_000).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(a.cancel(1).await);
        assert!(call_task.await.unwrap().is_err());
    }
}
