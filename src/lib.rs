pub mod application;
pub mod domain;
pub mod infrastructure;

use application::bootstrap::{BootstrapResult, bootstrap_workspace, resolve_workspace_root};
use application::commands::AppState;
use application::http::serve;
use application::ticker::{TickScheduler, TokioTickScheduler};
use infrastructure::error::InfraError;
use infrastructure::logging::init_logging;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Bootstraps the workspace, then serves the REST API until Ctrl-C.
pub fn run() -> Result<(), InfraError> {
    let env = |key: &str| std::env::var(key).ok();
    let workspace_root = resolve_workspace_root(env)?;
    let bootstrap = bootstrap_workspace(&workspace_root)?;
    let config = bootstrap.config.clone().with_overrides(env)?;
    let _logging = init_logging(&bootstrap.logs_dir, &config.log_level);

    tracing::info!(
        workspace = %bootstrap.workspace_root.display(),
        app = %config.app_name,
        "starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let scheduler: Arc<dyn TickScheduler> =
        Arc::new(TokioTickScheduler::new(runtime.handle().clone()));
    let state = Arc::new(AppState::from_bootstrap(
        BootstrapResult { config, ..bootstrap },
        scheduler,
    )?);

    runtime.block_on(async move {
        let listener = TcpListener::bind(state.config().bind_address()).await?;
        serve(listener, state, shutdown_signal()).await
    })
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl-C: {error}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
