//! The `compile` task handler: run the resolver against a
//! compiled-requirements row and persist the outcome. Resolver failures are
//! recorded, never retried.

use tracing::{debug, info};

use gannet_resolver::{DependencyGraph, GraphFormatter};
use gannet_store::{BackingIndex, CompilationStatus};

use crate::queue::TaskRuntime;
use crate::task::TaskError;

pub(crate) async fn run(
    runtime: &TaskRuntime,
    compiled_id: i64,
    index_slugs: &[String],
) -> Result<(), TaskError> {
    let row = runtime
        .store
        .compiled_by_id(compiled_id)
        .await?
        .ok_or(gannet_store::StoreError::NotFound("compiled requirements"))?;
    if row.status == CompilationStatus::Compiled {
        // Re-delivered after a crash; the work is already done.
        debug!(compiled_id, "already compiled");
        return Ok(());
    }

    let platform = runtime.store.platform_by_id(row.platform_id).await?;
    let mut indexes: Vec<BackingIndex> = Vec::with_capacity(index_slugs.len());
    for slug in index_slugs {
        indexes.push(runtime.store.index_by_slug(slug).await?);
    }

    let mut graph = DependencyGraph::new(
        &runtime.store,
        runtime.executor.as_ref(),
        indexes,
        platform,
    )?;
    match graph.compile(&row.requirements).await {
        Ok(()) => {
            let formatter =
                GraphFormatter::new().unsafe_packages(runtime.unsafe_packages.clone());
            let compiled = formatter.format(&graph);
            runtime
                .store
                .finish_compiled(
                    compiled_id,
                    CompilationStatus::Compiled,
                    Some(&compiled),
                    graph.log(),
                )
                .await?;
            info!(compiled_id, "compiled");
            Ok(())
        }
        Err(err) => {
            let log = format!("{}\n{}: {err}\n", graph.log(), err.kind());
            runtime
                .store
                .finish_compiled(compiled_id, CompilationStatus::Failed, None, &log)
                .await?;
            info!(compiled_id, "compilation failed: {err}");
            Ok(())
        }
    }
}
