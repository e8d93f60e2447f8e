use crate::cache::MirrorCache;
use crate::config::{Args, Config, TrustPolicy};
use crate::credentials::Keychain;
use crate::state::ControllerContext;
use crate::store::KubeWorkloadStore;
use crate::webserver::Readiness;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod cache;
mod classifier;
mod committer;
mod config;
mod controller;
mod credentials;
mod event;
mod image_reference;
mod mirror;
mod oci_registry;
mod pipeline;
mod secret_string;
mod state;
mod store;
#[cfg(test)]
mod testing;
mod webserver;
mod workload;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_args(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_level))?,
        )
        .init();
    info!("Starting kube-image-mirror {}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config from {}", args.config_source());
    info!(
        "Mirroring foreign images to {}/{}",
        config.trusted_registry, config.trusted_repository
    );

    let policy = TrustPolicy::from_config(&config)?;
    let client = controller::create_client().await?;
    let ctx = ControllerContext {
        policy: Arc::new(policy),
        registry: Arc::new(oci_registry::create_client(Keychain::from_env())),
        store: Arc::new(KubeWorkloadStore::new(client.clone())),
        cache: Arc::new(MirrorCache::new()),
        config: Arc::new(config),
    };

    let shutdown = CancellationToken::new();
    let readiness = Readiness::default();

    let app = webserver::create_app(readiness.clone());
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], ctx.config.webserver.port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_shutdown = shutdown.clone();
    let webserver = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
    });

    tokio::spawn(wait_for_signal(shutdown.clone()));

    let result = controller::run(ctx, client, readiness, shutdown.clone()).await;
    shutdown.cancel();
    if let Err(e) = webserver.await? {
        error!("Webserver failed: {}", e);
    }
    result
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    let term = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = term => info!("Received SIGTERM"),
    }
    shutdown.cancel();
}
