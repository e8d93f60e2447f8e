use crate::classifier::{self, Classification};
use crate::committer;
use crate::event::EventContext;
use crate::mirror;
use crate::state::ControllerContext;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span};

/// Terminal state of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Skipped,
    Committed,
    Abandoned,
}

/// Runs one event through classification, mirroring and commit.
pub async fn process(ctx: EventContext, controller: &ControllerContext) -> Outcome {
    let id = ctx.id;
    let name = ctx.name();
    let namespace = ctx.namespace();

    let ctx = match classifier::classify(ctx, &controller.policy) {
        Ok(Classification::Candidates(ctx)) => ctx,
        Ok(Classification::Skipped(_)) => return Outcome::Skipped,
        Err(e) => {
            error!(
                event_id = %id,
                workload = %name,
                namespace = %namespace,
                "Abandoning event: {:#}",
                e
            );
            return Outcome::Abandoned;
        }
    };

    let ctx = mirror::mirror(
        ctx,
        controller.registry.as_ref(),
        &controller.cache,
        &controller.policy,
    )
    .await;

    committer::commit(ctx, controller.store.as_ref(), &controller.config.commit).await
}

/// Runs the event on its own task inside a span carrying its correlation id.
pub fn spawn(ctx: EventContext, controller: ControllerContext) -> JoinHandle<Outcome> {
    let span = info_span!(
        "event",
        id = %ctx.id,
        change = %ctx.change,
        kind = %ctx.kind(),
        namespace = %ctx.namespace(),
        name = %ctx.name()
    );
    tokio::spawn(
        async move {
            let outcome = process(ctx, &controller).await;
            debug!("Event finished as {:?}", outcome);
            outcome
        }
        .instrument(span),
    )
}
