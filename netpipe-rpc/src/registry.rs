//! Maps method ids to handlers, with an optional default handler for
//! unmatched ids.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use netpipe_wire::{InvalidArgument, Message, NetpipeError, Result};
use parking_lot::RwLock;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Message>> + Send>>;

/// A callable that handles one request payload and produces a response
/// payload, or an application-level error.
pub trait Handler: Send + Sync {
    fn call(&self, payload: Message) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Message>> + Send + 'static,
{
    fn call(&self, payload: Message) -> HandlerFuture {
        Box::pin(self(payload))
    }
}

/// Mapping from `method_id` to handler. Shared between the receiver task
/// (reader) and administrative callers of register/unregister (writers);
/// registrations are not expected to change at high frequency, so a
/// `parking_lot::RwLock` over a `HashMap` is enough.
#[derive(Default)]
pub struct MethodRegistry {
    handlers: RwLock<HashMap<u32, Arc<dyn Handler>>>,
    default_handler: RwLock<Option<Arc<dyn Handler>>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with `InvalidArgument` if `method_id` is already registered.
    pub fn register(&self, method_id: u32, handler: impl Handler + 'static) -> Result<()> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&method_id) {
            return Err(NetpipeError::InvalidArgument(InvalidArgument::DuplicateMethod(
                method_id,
            )));
        }
        handlers.insert(method_id, Arc::new(handler));
        Ok(())
    }

    /// Fails with `NotFound` if `method_id` is absent.
    pub fn unregister(&self, method_id: u32) -> Result<()> {
        let mut handlers = self.handlers.write();
        if handlers.remove(&method_id).is_none() {
            return Err(NetpipeError::NotFound(format!(
                "method_id {method_id} is not registered"
            )));
        }
        Ok(())
    }

    pub fn set_default_handler(&self, handler: impl Handler + 'static) {
        *self.default_handler.write() = Some(Arc::new(handler));
    }

    pub fn clear_default_handler(&self) {
        *self.default_handler.write() = None;
    }

    /// The specific handler if registered, else the default, else `None`.
    pub fn get(&self, method_id: u32) -> Option<Arc<dyn Handler>> {
        if let Some(h) = self.handlers.read().get(&method_id) {
            return Some(h.clone());
        }
        self.default_handler.read().clone()
    }

    pub fn method_count(&self) -> usize {
        self.handlers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_dispatch() {
        let registry = MethodRegistry::new();
        registry.register(1, |payload: Message| async move { Ok(payload) }).unwrap();
        let handler = registry.get(1).unwrap();
        let resp = handler.call(vec![1, 2, 3]).await.unwrap();
        assert_eq!(resp, vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_register_rejected() {
        let registry = MethodRegistry::new();
        registry.register(1, |p: Message| async move { Ok(p) }).unwrap();
        let err = registry.register(1, |p: Message| async move { Ok(p) }).unwrap_err();
        assert!(matches!(
            err,
            NetpipeError::InvalidArgument(InvalidArgument::DuplicateMethod(1))
        ));
    }

    #[test]
    fn unregister_absent_rejected() {
        let registry = MethodRegistry::new();
        assert!(matches!(registry.unregister(1), Err(NetpipeError::NotFound(_))));
    }

    #[tokio::test]
    async fn default_handler_used_when_unregistered() {
        let registry = MethodRegistry::new();
        registry.set_default_handler(|_: Message| async move { Ok(b"default".to_vec()) });
        let handler = registry.get(999).unwrap();
        assert_eq!(handler.call(vec![]).await.unwrap(), b"default");
    }

    #[test]
    fn lookup_miss_with_no_default() {
        let registry = MethodRegistry::new();
        assert!(registry.get(42).is_none());
    }
}
