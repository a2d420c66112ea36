use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use model_switch::{
    AppConfig, MetricsObserver, ModelRegistry, RegistryObserver, TracingObserver, build_router,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(?config.listen_addr, models_dir = %config.models_dir.display(), "starting model registry");

    let metrics = Arc::new(MetricsObserver::new(config.default_version.clone())?);
    let observers: Vec<Arc<dyn RegistryObserver>> = vec![Arc::new(TracingObserver), metrics.clone()];
    let registry = Arc::new(ModelRegistry::initialize(config.as_ref(), Arc::new(observers)));

    if config.warm_start {
        registry.warm_up().await;
    }

    let router = build_router(config.clone(), registry.clone(), metrics);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
