//! The task runtime: a durable queue drained by a worker pool, with
//! at-least-once delivery of the three task kinds (`sync`, `build`,
//! `compile`), all of whose handlers are idempotent.

pub use crate::queue::{TaskQueue, TaskRuntime};
pub use crate::sync::{index_client, sync_index};
pub use crate::task::{Task, TaskError};

mod compile;
mod queue;
mod sync;
mod task;
mod worker;
