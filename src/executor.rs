use anyhow::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval, timeout};
use tracing::{debug, warn};

const FINISH_GRACE: Duration = Duration::from_secs(2);

pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct TaskId(u64);

#[derive(Clone)]
struct Task {
    id: TaskId,
    job: TaskFn,
    looping: bool,
}

struct Worker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ExecutorInner {
    tasks: Mutex<Vec<Task>>,
    worker: Mutex<Option<Worker>>,
    next_id: AtomicU64,
}

/// Ticking background worker that runs registered tasks off the render loop.
///
/// Every tick runs each registered task once, in registration order. One-shot
/// tasks leave the queue on their first run whatever the outcome; looping
/// tasks stay until removed. A failing or panicking task is logged and the
/// tick moves on to the next one.
#[derive(Clone, Default)]
pub struct TaskExecutor {
    inner: Arc<ExecutorInner>,
}

impl TaskExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&self, job: TaskFn, looping: bool) -> TaskId {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.tasks.lock().push(Task { id, job, looping });
        id
    }

    /// Registers a one-shot task from a future.
    pub fn spawn_once<F>(&self, future: F) -> TaskId
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Some(future.boxed())));
        let job: TaskFn = Arc::new(move || match slot.lock().take() {
            Some(future) => future,
            None => async { Ok(()) }.boxed(),
        });
        self.add_task(job, false)
    }

    pub fn remove_task(&self, id: TaskId) -> bool {
        let mut tasks = self.inner.tasks.lock();
        let before = tasks.len();
        tasks.retain(|task| task.id != id);
        tasks.len() != before
    }

    #[cfg(test)]
    pub fn task_count(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.inner.worker.lock().is_some()
    }

    /// Runs one pass over the queue.
    pub async fn tick(&self) {
        let batch = {
            let mut tasks = self.inner.tasks.lock();
            let batch = tasks.clone();
            tasks.retain(|task| task.looping);
            batch
        };

        for task in batch {
            match AssertUnwindSafe((task.job)()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!("background task {:?} failed: {error:#}", task.id),
                Err(_) => warn!("background task {:?} panicked", task.id),
            }
        }
    }

    pub fn start(&self, period: Duration) {
        let mut worker = self.inner.worker.lock();
        if worker.is_some() {
            return;
        }

        let (stop, mut stopped) = watch::channel(false);
        let executor = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => executor.tick().await,
                    _ = stopped.changed() => break,
                }
            }
            debug!("task executor stopped");
        });
        *worker = Some(Worker { stop, handle });
        debug!("task executor started with {period:?} tick");
    }

    /// Stops the tick loop. No task body runs after this returns.
    pub async fn finish(&self) {
        let Some(worker) = self.inner.worker.lock().take() else {
            return;
        };
        let _ = worker.stop.send(true);
        let mut handle = worker.handle;
        if timeout(FINISH_GRACE, &mut handle).await.is_err() {
            warn!("task executor did not stop within {FINISH_GRACE:?}, aborting");
            handle.abort();
            let _ = handle.await;
        }
    }
}
