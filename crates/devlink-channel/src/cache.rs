use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use crate::listener::Listener;

type KeyFn<K, M> = Box<dyn Fn(&M) -> Option<K> + Send + Sync>;

/// Latest message per key, filled as a channel listener.
///
/// Register an `Arc<MessageCache<..>>` on a channel to keep the most recent
/// status for each key, e.g. the last value reported per ISCP command.
/// Messages the key function maps to `None` are ignored.
pub struct MessageCache<K, M> {
    key: KeyFn<K, M>,
    entries: Mutex<HashMap<K, M>>,
}

impl<K, M> MessageCache<K, M>
where
    K: Eq + Hash,
    M: Clone,
{
    pub fn new<F>(key: F) -> Self
    where
        F: Fn(&M) -> Option<K> + Send + Sync + 'static,
    {
        Self {
            key: Box::new(key),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn latest(&self, key: &K) -> Option<M> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Store `message` under its key, replacing the previous one.
    pub fn insert(&self, message: &M) {
        if let Some(key) = (self.key)(message) {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, message.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl<K, M> Listener<M> for MessageCache<K, M>
where
    K: Eq + Hash + Send,
    M: Clone + Send,
{
    fn on_message(&self, message: &M) {
        self.insert(message);
    }
}

impl<K, M> fmt::Debug for MessageCache<K, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.entries.lock().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("MessageCache").field("entries", &len).finish()
    }
}
