//! Controller implementations for watching and reconciling resources
//!
//! [`run`] is the startup coordinator: it waits for every leader lock, then
//! drives the namespace watch loop and the ProjectHelmChart controller until
//! shutdown or until a lock is lost.

pub mod namespace_controller;
pub mod project_helm_chart_controller;

use std::sync::Arc;

use futures::channel::mpsc;
use kube::Client;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::common::Options;
use crate::leader;
use crate::metrics::prometheus::OPERATOR_READY;
use crate::reconcilers::project_helm_chart::ProjectHelmChartReconciler;
use crate::resolver::{new_project_getter, ProjectGetter};
use crate::{Error, Result};

/// Number of concurrent reconciles per controller
pub const DEFAULT_WORKERS: u16 = 50;

/// Shared context for controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Namespace holding HelmCharts, HelmReleases and leader locks
    pub system_namespace: String,
    /// Validated operator options
    pub opts: Arc<Options>,
    /// Project resolution strategy picked at startup
    pub project_getter: Arc<dyn ProjectGetter>,
    /// Generates derived resources for ProjectHelmCharts
    pub reconciler: ProjectHelmChartReconciler,
}

impl Context {
    /// Create a new context, picking the project resolution strategy from the options
    pub fn new(client: Client, system_namespace: &str, opts: Arc<Options>) -> Arc<Self> {
        let project_getter = new_project_getter(system_namespace, &opts);
        let reconciler =
            ProjectHelmChartReconciler::new(system_namespace, opts.clone(), project_getter.clone());
        Arc::new(Self {
            client,
            system_namespace: system_namespace.to_string(),
            opts,
            project_getter,
            reconciler,
        })
    }
}

/// Acquire all leader locks, then run every controller until `shutdown` fires
/// or a lock is lost. Held locks are released before returning.
///
/// `opts` are expected to have passed [`Options::validate`].
pub async fn run(
    client: Client,
    system_namespace: &str,
    opts: Options,
    identity: &str,
    shutdown: CancellationToken,
) -> Result<()> {
    if system_namespace.is_empty() {
        return Err(Error::ConfigError(
            "cannot start controllers on system namespace: system namespace not provided"
                .to_string(),
        ));
    }
    let opts = opts.with_system_namespace(system_namespace);

    let ctx = Context::new(client.clone(), system_namespace, Arc::new(opts));

    let mut guards = tokio::select! {
        guards = leader::acquire_all(&client, system_namespace, &leader::LOCKS, identity) => guards,
        _ = shutdown.cancelled() => {
            info!("Shutdown requested before leadership was acquired");
            return Ok(());
        }
    };

    OPERATOR_READY.set(1.0);
    info!("All controllers have been started");

    let result = tokio::select! {
        _ = run_controllers(ctx) => {
            info!("Controllers stopped");
            Ok(())
        }
        lock = leader::any_lost(&mut guards) => {
            error!(lock = %lock, "Lost leader lock, stopping controllers");
            Err(Error::LeaderElectionError(format!("lost leader lock {}", lock)))
        }
        _ = shutdown.cancelled() => {
            info!("Shutdown requested, stopping controllers");
            Ok(())
        }
    };

    OPERATOR_READY.set(0.0);
    leader::release_all(&guards).await;
    result
}

/// Run the namespace loop and the ProjectHelmChart controller.
///
/// The ProjectHelmChart controller only starts once the namespace loop has
/// processed the initial namespace listing, so membership is never decided
/// on an empty index.
async fn run_controllers(ctx: Arc<Context>) {
    let (resync_tx, resync_rx) = mpsc::unbounded();
    let (synced_tx, synced_rx) = oneshot::channel();

    let controller = project_helm_chart_controller::build(&ctx, resync_rx);
    let charts = controller.store();

    let namespaces = namespace_controller::run(ctx.clone(), charts, resync_tx, synced_tx);
    let project_helm_charts = async {
        if synced_rx.await.is_err() {
            error!("Namespace watch stopped before the initial sync completed");
            return;
        }
        project_helm_chart_controller::run(controller, ctx.clone()).await;
    };

    tokio::join!(namespaces, project_helm_charts);
}
