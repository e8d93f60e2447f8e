use crate::config::Commit;
use crate::event::EventContext;
use crate::pipeline::Outcome;
use crate::store::{StoreError, WorkloadStore};
use anyhow::anyhow;
use tracing::{debug, error, info, warn};

/// Writes the rewritten containers back onto the live workload.
///
/// The object is fetched fresh before every attempt. Conflicting writes are
/// retried up to `retry.max_attempts` times, any other failure abandons the event.
pub async fn commit(ctx: EventContext, store: &dyn WorkloadStore, retry: &Commit) -> Outcome {
    let kind = ctx.kind();
    let name = ctx.name();
    let namespace = ctx.namespace();

    if ctx.resolved.is_empty() {
        warn!(
            event_id = %ctx.id,
            workload = %name,
            namespace = %namespace,
            "None of {} candidate images could be mirrored, {} left unchanged",
            ctx.candidates.len(),
            kind
        );
        return Outcome::Abandoned;
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        match write_containers(&ctx, store, &namespace, &name).await {
            Ok(()) => {
                info!(
                    event_id = %ctx.id,
                    workload = %name,
                    namespace = %namespace,
                    "{} was updated with {} mirrored images after {} attempt(s)",
                    kind,
                    ctx.resolved.len(),
                    attempt
                );
                return Outcome::Committed;
            }
            Err(StoreError::Conflict(message)) if attempt < retry.max_attempts => {
                debug!(
                    "Conflict updating {} on attempt {}, retrying: {}",
                    kind, attempt, message
                );
                tokio::time::sleep(retry.backoff()).await;
            }
            Err(e) => {
                error!(
                    event_id = %ctx.id,
                    workload = %name,
                    namespace = %namespace,
                    "Update of {} failed after {} attempt(s): {}",
                    kind,
                    attempt,
                    e
                );
                return Outcome::Abandoned;
            }
        }
    }
}

async fn write_containers(
    ctx: &EventContext,
    store: &dyn WorkloadStore,
    namespace: &str,
    name: &str,
) -> Result<(), StoreError> {
    let mut live = store.fetch(ctx.kind(), namespace, name).await?;
    debug!(
        "Replacing containers of {} at resource version {:?}",
        ctx.kind(),
        live.resource_version()
    );
    if !live.set_containers(ctx.containers.clone()) {
        return Err(StoreError::Other(anyhow!(
            "{} {}/{} has no pod template",
            ctx.kind(),
            namespace,
            name
        )));
    }
    store.replace(&live).await
}
