use std::time::Duration;

use tracing::{debug, info, warn};

use gannet_store::QueuedTask;

use crate::queue::TaskQueue;
use crate::task::{Task, TaskError};
use crate::{compile, sync};

/// Give a claimed task this long before another worker may re-deliver it.
const LEASE_SECONDS: i64 = 900;
/// Poll even without wakeups, to pick up leases expired by a crash.
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_ATTEMPTS: i64 = 5;

pub(crate) async fn run(queue: TaskQueue, worker_index: usize) {
    debug!(worker_index, "worker started");
    let wakeups = queue.wakeups();
    loop {
        let now = jiff::Timestamp::now().as_second();
        let claimed = match queue
            .runtime()
            .store
            .claim_due_task(now, LEASE_SECONDS)
            .await
        {
            Ok(claimed) => claimed,
            Err(err) => {
                warn!(worker_index, "claiming a task failed: {err}");
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
        };

        match claimed {
            Some(task) => process(&queue, task).await,
            None => {
                // Idle: wait for a wakeup or the next poll tick.
                let _ = tokio::time::timeout(POLL_INTERVAL, wakeups.recv()).await;
            }
        }
    }
}

async fn process(queue: &TaskQueue, queued: QueuedTask) {
    let outcome = match Task::from_payload(&queued.payload) {
        Ok(task) => {
            debug!(id = queued.id, kind = task.kind(), attempts = queued.attempts, "running task");
            dispatch(queue, &task).await
        }
        Err(err) => Err(err),
    };

    let store = &queue.runtime().store;
    match outcome {
        Ok(()) => {
            if let Err(err) = store.delete_task(queued.id).await {
                warn!(id = queued.id, "finished task could not be deleted: {err}");
            }
            queue.notify_waiter(queued.id, Ok(()));
        }
        Err(err) if err.is_retryable() && queued.attempts < MAX_ATTEMPTS => {
            let delay = backoff(queued.attempts);
            info!(
                id = queued.id,
                attempts = queued.attempts,
                delay,
                "task failed, retrying: {err}"
            );
            let run_at = jiff::Timestamp::now().as_second() + delay;
            if let Err(err) = store.reschedule_task(queued.id, run_at).await {
                warn!(id = queued.id, "task could not be rescheduled: {err}");
            }
        }
        Err(err) => {
            warn!(id = queued.id, attempts = queued.attempts, "task failed terminally: {err}");
            if let Err(err) = store.delete_task(queued.id).await {
                warn!(id = queued.id, "failed task could not be deleted: {err}");
            }
            queue.notify_waiter(queued.id, Err(err.to_string()));
        }
    }
}

async fn dispatch(queue: &TaskQueue, task: &Task) -> Result<(), TaskError> {
    let runtime = queue.runtime();
    match task {
        Task::SyncIndex { index_id } => sync::sync_index(runtime, *index_id).await,
        Task::Build { build_id, force } => {
            runtime.executor.rebuild(*build_id, *force).await?;
            Ok(())
        }
        Task::Compile {
            compiled_id,
            index_slugs,
        } => compile::run(runtime, *compiled_id, index_slugs).await,
    }
}

/// Jittered exponential backoff in seconds for the next attempt.
fn backoff(attempts: i64) -> i64 {
    let attempts = u32::try_from(attempts.clamp(1, 8)).unwrap_or(1);
    let base = 10i64.saturating_mul(1 << (attempts - 1));
    base + fastrand::i64(0..=base / 2)
}
