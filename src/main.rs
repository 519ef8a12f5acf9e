use deploy_hook::logging::{FileLogger, LOG_DIR_VAR, setup_logging};
use deploy_hook::{
    AppState, DeployLog, DeployRegistry, ReceiverConfig, ScriptLauncher, build_router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let file_logger = std::env::var(LOG_DIR_VAR)
        .ok()
        .map(|dir| FileLogger::new(PathBuf::from(dir)));
    let _log_guard = match setup_logging(file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging setup error: {}", e);
            std::process::exit(1);
        }
    };

    let config = match ReceiverConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if !config.require_signature {
        warn!("Signature checks are disabled; unsigned webhooks will be accepted");
    }
    if !config.deploy_script.exists() {
        warn!(
            "Deploy script {} does not exist yet",
            config.deploy_script.display()
        );
    }

    let deploy_log = match DeployLog::open(&config.log_file).await {
        Ok(log) => log,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let launcher = Arc::new(ScriptLauncher::new(
        config.shell.clone(),
        config.deploy_script.clone(),
    ));
    let deploys = DeployRegistry::new(launcher, deploy_log);

    let bind_address = config.bind_address();
    info!("Webhook path {}", config.webhook_path);
    info!("Deploying pushes to {}", config.allowed_ref);
    info!("Deploy log at {}", config.log_file.display());

    let app = build_router(Arc::new(AppState::new(config, deploys)));

    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };
    info!("Listening on {}", bind_address);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }
    info!("Shut down");
}

/// Resolves on Ctrl-C or SIGTERM. Running deploy scripts are left alone.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
