use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use devlink_frame::StreamError;
use tracing::{debug, error};

use crate::listener::{Listener, ListenerId, ListenerRegistry};

/// Fans unsolicited messages out to registered listeners.
///
/// Delivery iterates a snapshot of the registry, so listeners may register
/// or unregister from inside a callback.
pub struct EventDispatcher<M> {
    registry: Mutex<ListenerRegistry<M>>,
    disconnected: AtomicBool,
}

impl<M> EventDispatcher<M> {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(ListenerRegistry::new()),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Register a listener. Registering the same `Arc` again is a no-op that
    /// returns the existing id.
    pub fn register(&self, listener: Arc<dyn Listener<M>>) -> ListenerId {
        let id = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(listener);
        debug!(%id, "listener registered");
        id
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        let removed = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister(id);
        if removed {
            debug!(%id, "listener unregistered");
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Notify every listener once. A panicking listener is logged and
    /// skipped.
    pub fn deliver(&self, message: &M) {
        for (id, listener) in self.snapshot() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_message(message)));
            if let Err(payload) = outcome {
                error!(%id, panic = %panic_message(payload), "listener panicked in on_message");
            }
        }
    }

    /// Tell every listener the channel ended. Only the first call has an
    /// effect.
    pub fn disconnect(&self, reason: &StreamError) {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }
        for (id, listener) in self.snapshot() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_disconnect(reason)));
            if let Err(payload) = outcome {
                error!(%id, panic = %panic_message(payload), "listener panicked in on_disconnect");
            }
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    fn snapshot(&self) -> Vec<(ListenerId, Arc<dyn Listener<M>>)> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }
}

impl<M> Default for EventDispatcher<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for EventDispatcher<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listener_count())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
