use std::fmt;
use std::sync::Arc;

use devlink_frame::StreamError;

/// Receives unsolicited messages from a channel.
///
/// Callbacks run on the channel's dispatch thread, one message at a time, in
/// arrival order.
pub trait Listener<M>: Send + Sync {
    fn on_message(&self, message: &M);

    /// Called once when the channel ends, with the reason its stream ended.
    fn on_disconnect(&self, _reason: &StreamError) {}
}

impl<M, F> Listener<M> for F
where
    F: Fn(&M) + Send + Sync,
{
    fn on_message(&self, message: &M) {
        self(message)
    }
}

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Listeners deduplicated by `Arc` identity, in registration order.
pub struct ListenerRegistry<M> {
    entries: Vec<(ListenerId, Arc<dyn Listener<M>>)>,
    next_id: u64,
}

impl<M> ListenerRegistry<M> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Add `listener`, or return the id it already has.
    pub fn register(&mut self, listener: Arc<dyn Listener<M>>) -> ListenerId {
        let addr = Arc::as_ptr(&listener) as *const ();
        if let Some((id, _)) = self
            .entries
            .iter()
            .find(|(_, existing)| Arc::as_ptr(existing) as *const () == addr)
        {
            return *id;
        }
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    pub fn snapshot(&self) -> Vec<(ListenerId, Arc<dyn Listener<M>>)> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<M> Default for ListenerRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for ListenerRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.entries.len())
            .finish()
    }
}
