use instancer::{
    api,
    cluster::kube::KubeCluster,
    config::ManagerConfig,
    janitor::Janitor,
    lifecycle::LifecycleManager,
    telemetry::{self, Metrics},
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let metrics = Arc::new(Metrics::default());

    info!("Starting challenge instance manager");
    let config = Arc::new(ManagerConfig::from_env()?);
    info!("Configuration loaded");

    let cluster = Arc::new(KubeCluster::connect(&config).await?);
    info!("Connected to cluster");

    let manager = Arc::new(LifecycleManager::new(
        cluster.clone(),
        config.clone(),
        metrics.clone(),
    ));

    let janitor = Janitor::new(manager.clone(), cluster, config.clone(), metrics);
    tokio::spawn(janitor.run());
    info!(
        interval_secs = config.sweep_interval_secs,
        "Janitor started"
    );

    let app = api::router(manager);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
