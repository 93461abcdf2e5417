//! The pending-request table: maps an in-flight `request_id` to the
//! one-shot channel its waiter is blocked on.
//!
//! This is the async translation of a `mutex + condvar + completed +
//! cancelled + result` waiter: a `tokio::sync::oneshot::Sender<Result<Message>>`
//! plays the role of "the slot the receiver writes into and the waiter
//! blocks on", and
//! `table.take(id)` is the single point of contention that enforces "at
//! most one writer completes a given request" — whichever of {the
//! receiver task delivering a response, `cancel()`} wins the race to
//! remove the entry is the one allowed to complete it. A second caller
//! finding the entry already gone is exactly "already completed or
//! unknown", which is what both the receiver's stale-response path and
//! `cancel`'s return value need.

use std::collections::HashMap;

use netpipe_wire::{Message, NetpipeError, Result};
use parking_lot::Mutex;
use tokio::sync::oneshot;

pub struct PendingTable {
    inner: Mutex<HashMap<u32, oneshot::Sender<Result<Message>>>>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, request_id: u32, tx: oneshot::Sender<Result<Message>>) {
        self.inner.lock().insert(request_id, tx);
    }

    /// Remove and return the waiter's sender, if the request is still
    /// outstanding.
    pub fn take(&self, request_id: u32) -> Option<oneshot::Sender<Result<Message>>> {
        self.inner.lock().remove(&request_id)
    }

    pub fn remove(&self, request_id: u32) {
        self.inner.lock().remove(&request_id);
    }

    pub fn size(&self) -> usize {
        self.inner.lock().len()
    }

    /// Complete every outstanding waiter with `err` (used on shutdown /
    /// peer disconnect) and clear the table.
    pub fn fail_all(&self, make_err: impl Fn() -> NetpipeError) {
        let mut table = self.inner.lock();
        for (_, tx) in table.drain() {
            let _ = tx.send(Err(make_err()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_take_delivers_result() {
        let table = PendingTable::new();
        let (tx, rx) = oneshot::channel();
        table.insert(1, tx);
        assert_eq!(table.size(), 1);
        let sender = table.take(1).unwrap();
        sender.send(Ok(vec![9])).unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), vec![9]);
        assert_eq!(table.size(), 0);
    }

    #[test]
    fn take_twice_only_one_winner() {
        let table = PendingTable::new();
        let (tx, _rx) = oneshot::channel();
        table.insert(1, tx);
        assert!(table.take(1).is_some());
        assert!(table.take(1).is_none());
    }

    #[tokio::test]
    async fn fail_all_wakes_every_waiter() {
        let table = PendingTable::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        table.insert(1, tx1);
        table.insert(2, tx2);
        table.fail_all(|| NetpipeError::NotFound("shutdown".to_string()));
        assert!(rx1.await.unwrap().is_err());
        assert!(rx2.await.unwrap().is_err());
        assert_eq!(table.size(), 0);
    }
}
