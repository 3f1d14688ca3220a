use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type Callback<S, E> = Arc<dyn Fn(&S, &E) + Send + Sync>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

/// One-to-many notification primitive.
///
/// Subscribers receive the source object and the event payload. Dispatch
/// iterates a snapshot of the subscriber list, so subscribers may add or
/// remove listeners (including themselves) while being notified.
pub struct ListenerHandler<S: ?Sized, E = ()> {
    listeners: Mutex<Vec<(ListenerId, Callback<S, E>)>>,
    next_id: AtomicU64,
}

impl<S: ?Sized, E> Default for ListenerHandler<S, E> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<S: ?Sized, E> ListenerHandler<S, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: impl Fn(&S, &E) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    pub fn fire(&self, source: &S, event: &E) {
        let snapshot = self
            .listeners
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect::<Vec<_>>();
        for callback in snapshot {
            callback(source, event);
        }
    }
}
