use crate::event::{ChangeKind, EventContext, split_watch_event};
use crate::pipeline::{self, Outcome};
use crate::state::ControllerContext;
use crate::webserver::Readiness;
use crate::workload::{Workload, WorkloadObject};
use anyhow::Context;
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::api::ListParams;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Notification = Result<(ChangeKind, Option<WorkloadObject>), watcher::Error>;

pub async fn create_client() -> anyhow::Result<Client> {
    info!("Initializing K8s client");
    let client = Client::try_default().await?;
    let api_server_info = client.apiserver_version().await?;
    info!(
        "Connected to Kubernetes API server with version {}.{}, default namespace {}",
        api_server_info.major,
        api_server_info.minor,
        client.default_namespace()
    );
    Ok(client)
}

/// Dispatches every Deployment and DaemonSet notification to its own pipeline
/// task until `shutdown` fires. In-flight pipelines are neither awaited nor capped.
pub async fn run(
    ctx: ControllerContext,
    client: Client,
    readiness: Readiness,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let deployments: Api<Deployment> = Api::all(client.clone());
    let daemon_sets: Api<DaemonSet> = Api::all(client);

    verify_access(&deployments).await?;
    verify_access(&daemon_sets).await?;

    let mut deployment_events = notifications(deployments).boxed();
    let mut daemon_set_events = notifications(daemon_sets).boxed();

    readiness.mark_ready();
    info!("Watching Deployments and DaemonSets in all namespaces");

    loop {
        let notification = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Stopping event dispatcher");
                return Ok(());
            }
            Some(notification) = deployment_events.next() => notification,
            Some(notification) = daemon_set_events.next() => notification,
            else => anyhow::bail!("Workload watch streams terminated"),
        };

        dispatch(notification, &ctx);
    }
}

/// Starts a pipeline task for a notification carrying an object. Watch errors are
/// logged and left to the stream's backoff.
fn dispatch(notification: Notification, ctx: &ControllerContext) -> Option<JoinHandle<Outcome>> {
    match notification {
        Ok((change, Some(object))) => Some(pipeline::spawn(
            EventContext::new(change, object),
            ctx.clone(),
        )),
        Ok((change, None)) => {
            debug!("Received {} notification without object", change);
            None
        }
        Err(error) => {
            warn!(%error, "Workload watch failed, reconnecting");
            None
        }
    }
}

/// Fails startup early when the service account cannot list the workload kind.
async fn verify_access<K: Workload>(api: &Api<K>) -> anyhow::Result<()> {
    api.list(&ListParams::default().limit(1))
        .await
        .with_context(|| format!("Failed to list {} resources", K::KIND))?;
    debug!("Access to {} resources verified", K::KIND);
    Ok(())
}

fn notifications<K: Workload>(api: Api<K>) -> impl Stream<Item = Notification> + Send {
    watcher(api, watcher::Config::default())
        .default_backoff()
        .map(|event| {
            event.map(|event| {
                let (change, object) = split_watch_event(event);
                (change, object.map(K::into_object))
            })
        })
}
