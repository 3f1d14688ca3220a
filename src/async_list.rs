use crate::executor::{TaskExecutor, TaskFn, TaskId};
use crate::listener::ListenerHandler;
use crate::view::list::{ListChange, ListModel};
use anyhow::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Source of list contents, called from the executor.
///
/// Implementations keep their own configuration behind interior mutability;
/// after changing it the owner calls `AsyncListModel::invalidate`.
pub trait Fetch: Send + Sync + 'static {
    type Item: Clone + PartialEq + Send + Sync + 'static;

    /// False while fetching makes no sense, e.g. the cluster is not connected.
    fn enabled(&self) -> bool {
        true
    }

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<Self::Item>>>;
}

struct Published<T> {
    generation: u64,
    items: Vec<T>,
}

struct AsyncState<F: Fetch> {
    fetcher: F,
    generation: AtomicU64,
    last: Mutex<Option<Published<F::Item>>>,
    pending: Mutex<Option<(Vec<F::Item>, ListChange)>>,
    changed: ListenerHandler<[F::Item], ListChange>,
}

impl<F: Fetch> AsyncState<F> {
    /// Fetches once and hands the result to the render thread if it differs
    /// from the last published snapshot of the same generation.
    async fn poll(&self) -> Result<()> {
        if !self.fetcher.enabled() {
            return Ok(());
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let items = self.fetcher.fetch().await?;

        // generation only moves while `last` is held
        let change = {
            let mut last = self.last.lock();
            if generation != self.generation.load(Ordering::SeqCst) {
                debug!("dropping list fetched for a previous configuration");
                return Ok(());
            }
            let change = match last.as_ref() {
                Some(prev) if prev.generation == generation && prev.items == items => return Ok(()),
                Some(prev) if prev.generation == generation => ListChange::Updated,
                _ => ListChange::Replaced,
            };
            *last = Some(Published {
                generation,
                items: items.clone(),
            });
            self.stage(items.clone(), change);
            change
        };
        self.changed.fire(&items, &change);
        Ok(())
    }

    /// A pending `Replaced` stays `Replaced` until the render thread syncs.
    fn stage(&self, items: Vec<F::Item>, change: ListChange) {
        let mut pending = self.pending.lock();
        let change = match pending.take() {
            Some((_, ListChange::Replaced)) => ListChange::Replaced,
            _ => change,
        };
        *pending = Some((items, change));
    }

    fn reset(&self) {
        {
            let mut last = self.last.lock();
            self.generation.fetch_add(1, Ordering::SeqCst);
            *last = None;
            self.stage(Vec::new(), ListChange::Replaced);
        }
        self.changed.fire(&[], &ListChange::Replaced);
    }
}

fn poll_job<F: Fetch>(state: &Arc<AsyncState<F>>) -> TaskFn {
    let state = Arc::clone(state);
    Arc::new(move || {
        let state = Arc::clone(&state);
        async move { state.poll().await }.boxed()
    })
}

/// Type-erased control over one list, for code that drives several kinds.
pub trait ListControl: Send + Sync {
    fn refresh(&self);
    fn invalidate(&self);
}

/// Cloneable, thread-safe handle to an `AsyncListModel`'s fetcher and
/// refresh machinery. Stays usable after the view owning the model is gone.
pub struct ListHandle<F: Fetch> {
    state: Arc<AsyncState<F>>,
    executor: TaskExecutor,
}

impl<F: Fetch> Clone for ListHandle<F> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            executor: self.executor.clone(),
        }
    }
}

impl<F: Fetch> ListHandle<F> {
    pub fn fetcher(&self) -> &F {
        &self.state.fetcher
    }

    /// Enqueues a one-shot fetch in addition to the periodic one.
    pub fn refresh(&self) {
        self.executor.add_task(poll_job(&self.state), false);
    }

    /// Starts a new generation after the fetcher's configuration changed: the
    /// list empties, in-flight results of the old configuration are dropped
    /// and a fresh fetch is scheduled.
    pub fn invalidate(&self) {
        self.state.reset();
        self.refresh();
    }
}

impl<F: Fetch> ListControl for ListHandle<F> {
    fn refresh(&self) {
        ListHandle::refresh(self);
    }

    fn invalidate(&self) {
        ListHandle::invalidate(self);
    }
}

/// List model refreshed by the task executor.
///
/// The executor side compares every fetch with the last published snapshot and
/// only publishes real changes. The render thread swaps the published snapshot
/// in during `sync`, so `item()` never observes a half-written list.
pub struct AsyncListModel<F: Fetch> {
    state: Arc<AsyncState<F>>,
    items: Vec<F::Item>,
    executor: TaskExecutor,
    task: Option<TaskId>,
}

impl<F: Fetch> AsyncListModel<F> {
    /// Periodic models poll every executor tick; others fetch once now and
    /// then only on `refresh`.
    pub fn new(fetcher: F, executor: TaskExecutor, periodic: bool) -> Self {
        let state = Arc::new(AsyncState {
            fetcher,
            generation: AtomicU64::new(0),
            last: Mutex::new(None),
            pending: Mutex::new(None),
            changed: ListenerHandler::new(),
        });
        let task = if periodic {
            Some(executor.add_task(poll_job(&state), true))
        } else {
            executor.add_task(poll_job(&state), false);
            None
        };
        Self {
            state,
            items: Vec::new(),
            executor,
            task,
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.state.fetcher
    }

    #[cfg(test)]
    pub fn items(&self) -> &[F::Item] {
        &self.items
    }

    pub fn handle(&self) -> ListHandle<F> {
        ListHandle {
            state: Arc::clone(&self.state),
            executor: self.executor.clone(),
        }
    }

    #[cfg(test)]
    pub fn refresh(&self) {
        self.handle().refresh();
    }

    #[cfg(test)]
    pub fn invalidate(&self) {
        self.handle().invalidate();
    }
}

impl<F: Fetch> ListModel for AsyncListModel<F> {
    type Item = F::Item;

    fn item_count(&self) -> usize {
        self.items.len()
    }

    fn item(&self, index: usize) -> Option<&F::Item> {
        self.items.get(index)
    }

    fn enabled(&self) -> bool {
        self.state.fetcher.enabled()
    }

    fn sync(&mut self) -> ListChange {
        let Some((items, change)) = self.state.pending.lock().take() else {
            return ListChange::Unchanged;
        };
        self.items = items;
        change
    }

    fn list_changed(&self) -> Option<&ListenerHandler<[F::Item], ListChange>> {
        Some(&self.state.changed)
    }
}

impl<F: Fetch> Drop for AsyncListModel<F> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.executor.remove_task(task);
        }
    }
}
