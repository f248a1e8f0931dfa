use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

use gannet_build::BuildExecutor;
use gannet_cache::LinkCache;
use gannet_normalize::PackageName;
use gannet_storage::BlobStore;
use gannet_store::MetadataStore;

use crate::task::{Task, TaskError};
use crate::worker;

/// Everything the task handlers need, threaded through explicitly.
pub struct TaskRuntime {
    pub store: MetadataStore,
    pub storage: BlobStore,
    pub cache: Arc<LinkCache>,
    pub executor: Arc<BuildExecutor>,
    /// Packages the graph formatter comments out (`UNSAFE_PACKAGES`).
    pub unsafe_packages: BTreeSet<PackageName>,
}

/// Handle for scheduling work. Enqueues are durable (a queue row) before
/// the in-process wakeup fires, so a crash between the two only delays the
/// task.
#[derive(Clone)]
pub struct TaskQueue {
    runtime: Arc<TaskRuntime>,
    wakeup: async_channel::Sender<()>,
    wakeup_rx: async_channel::Receiver<()>,
    waiters: Arc<DashMap<i64, oneshot::Sender<Result<(), String>>>>,
}

impl TaskQueue {
    pub fn new(runtime: Arc<TaskRuntime>) -> Self {
        let (wakeup, wakeup_rx) = async_channel::bounded(64);
        Self {
            runtime,
            wakeup,
            wakeup_rx,
            waiters: Arc::new(DashMap::new()),
        }
    }

    pub fn runtime(&self) -> &TaskRuntime {
        &self.runtime
    }

    /// Enqueue a task for the worker pool.
    pub async fn enqueue(&self, task: &Task) -> Result<i64, TaskError> {
        let now = jiff::Timestamp::now().as_second();
        let id = self
            .runtime
            .store
            .enqueue_task(task.kind(), &task.to_payload()?, now)
            .await?;
        debug!(id, kind = task.kind(), "enqueued");
        // Losing the wakeup is fine; workers also poll.
        let _ = self.wakeup.try_send(());
        Ok(id)
    }

    /// Enqueue a task and wait until a worker finishes it (successfully or
    /// terminally). The caller is expected to re-read whatever row the task
    /// writes.
    pub async fn enqueue_and_wait(&self, task: &Task) -> Result<(), TaskError> {
        let (sender, receiver) = oneshot::channel();
        let now = jiff::Timestamp::now().as_second();
        let id = self
            .runtime
            .store
            .enqueue_task(task.kind(), &task.to_payload()?, now)
            .await?;
        self.waiters.insert(id, sender);
        let _ = self.wakeup.try_send(());

        match receiver.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(TaskError::Exhausted {
                attempts: 0,
                message,
            }),
            // The worker dropped the sender without reporting; treat as
            // terminal.
            Err(_) => Err(TaskError::Exhausted {
                attempts: 0,
                message: "worker went away".to_string(),
            }),
        }
    }

    /// Spawn `count` workers draining the queue until the returned handles
    /// are dropped or aborted.
    pub fn spawn_workers(&self, count: usize) -> Vec<tokio::task::JoinHandle<()>> {
        (0..count)
            .map(|index| {
                let queue = self.clone();
                tokio::spawn(async move { worker::run(queue, index).await })
            })
            .collect()
    }

    pub(crate) fn wakeups(&self) -> async_channel::Receiver<()> {
        self.wakeup_rx.clone()
    }

    pub(crate) fn notify_waiter(&self, task_id: i64, result: Result<(), String>) {
        if let Some((_, sender)) = self.waiters.remove(&task_id) {
            let _ = sender.send(result);
        }
    }
}
