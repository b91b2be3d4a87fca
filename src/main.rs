//! Helm Project Operator
//!
//! Main entry point for the operator. Parses the runtime options, sets up the
//! Kubernetes client, and runs the controllers once leadership is acquired.

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use helm_project_operator::{common::RuntimeOptions, controllers, metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = RuntimeOptions::parse();
    let system_namespace = args.namespace.clone();
    let metrics_port = args.metrics_port;
    let identity = args.lock_identity();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        system_namespace = %system_namespace,
        "Starting Helm Project Operator"
    );

    let opts = args.into_options()?.with_system_namespace(&system_namespace);
    opts.validate()?;

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let metrics_handle = tokio::spawn(metrics::serve(metrics_port));
    info!("Metrics server starting on port {}", metrics_port);

    let shutdown = CancellationToken::new();
    let mut controller_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { controllers::run(client, &system_namespace, opts, &identity, shutdown).await }
    });

    tokio::select! {
        res = &mut controller_handle => {
            match res {
                Ok(Ok(())) => info!("Controllers exited"),
                Ok(Err(e)) => {
                    error!("Controllers exited with error: {}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    error!("Controllers panicked: {}", e);
                    return Err(e.into());
                }
            }
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
            shutdown.cancel();
            let _ = controller_handle.await;
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
            shutdown.cancel();
            // Wait for leader locks to be released
            let _ = controller_handle.await;
        }
    }

    info!("Helm Project Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,helm_project_operator=debug,kube=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
