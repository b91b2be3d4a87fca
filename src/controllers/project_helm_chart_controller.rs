//! Controller for ProjectHelmChart resources

use futures::channel::mpsc::UnboundedReceiver;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    api::{ListParams, Patch, PatchParams},
    runtime::{
        controller::{self, Action, Controller},
        finalizer::{finalizer, Event},
        reflector::ObjectRef,
        watcher::Config,
    },
    Api, ResourceExt,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::common::labels::{
    HELM_PROJECT_OPERATED_LABEL, HELM_PROJECT_OPERATOR_DASHBOARD_VALUES_CONFIGMAP_LABEL,
};
use crate::controllers::{Context, DEFAULT_WORKERS};
use crate::crd::{HelmChart, HelmRelease, ProjectHelmChart, ProjectHelmChartStatus};
use crate::metrics::prometheus::{RECONCILE_DURATION, RECONCILIATIONS, RECONCILIATION_ERRORS};
use crate::reconcilers::apply::{apply_desired, delete_derived};
use crate::reconcilers::project_helm_chart::{dashboard_values, failed_status, status_patch};
use crate::reconcilers::resync::resolve_owner;
use crate::Error;

/// Finalizer name for cleanup of derived resources
pub const FINALIZER: &str = "helm.cattle.io/project-helm-chart-finalizer";

const KIND: &str = "ProjectHelmChart";

/// Deployed releases are revisited to pick up new dashboard values
const DASHBOARD_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Build the ProjectHelmChart controller.
///
/// Changes to derived HelmCharts and HelmReleases in the system namespace are
/// mapped back to their ProjectHelmChart, and `resync` carries requests queued
/// by the namespace loop.
pub fn build(
    ctx: &Arc<Context>,
    resync: UnboundedReceiver<ObjectRef<ProjectHelmChart>>,
) -> Controller<ProjectHelmChart> {
    let client = ctx.client.clone();

    // With a project label, registration namespaces are spread over the
    // cluster; otherwise the system namespace is the only one.
    let project_helm_charts: Api<ProjectHelmChart> = if ctx.opts.project_label.is_some() {
        Api::all(client.clone())
    } else {
        Api::namespaced(client.clone(), &ctx.system_namespace)
    };
    let helm_charts: Api<HelmChart> = Api::namespaced(client.clone(), &ctx.system_namespace);
    let helm_releases: Api<HelmRelease> = Api::namespaced(client, &ctx.system_namespace);

    let operated = Config::default().labels(&format!("{}=true", HELM_PROJECT_OPERATED_LABEL));

    let chart_getter = ctx.project_getter.clone();
    let release_getter = ctx.project_getter.clone();

    Controller::new(project_helm_charts, Config::default().any_semantic())
        .with_config(controller::Config::default().concurrency(DEFAULT_WORKERS))
        .watches(helm_charts, operated.clone(), move |helm_chart| {
            resolve_owner(&helm_chart, chart_getter.as_ref())
        })
        .watches(helm_releases, operated, move |helm_release| {
            resolve_owner(&helm_release, release_getter.as_ref())
        })
        .reconcile_on(resync)
}

/// Run the ProjectHelmChart controller
pub async fn run(controller: Controller<ProjectHelmChart>, ctx: Arc<Context>) {
    info!(
        helm_api_version = %ctx.opts.helm_api_version,
        system_namespace = %ctx.system_namespace,
        "Starting ProjectHelmChart controller"
    );

    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => debug!("Reconciled {:?}", o),
                Err(e) => warn!("Reconcile failed: {:?}", e),
            }
        })
        .await;

    info!("ProjectHelmChart controller stopped");
}

/// Reconcile a ProjectHelmChart resource
#[instrument(skip(project_helm_chart, ctx), fields(name = %project_helm_chart.name_any(), namespace = project_helm_chart.namespace().unwrap_or_default()))]
async fn reconcile(
    project_helm_chart: Arc<ProjectHelmChart>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let start = std::time::Instant::now();
    let ns = project_helm_chart.namespace().unwrap_or_default();
    let name = project_helm_chart.name_any();

    // Requests owned by another operator never get our finalizer. One that
    // already carries it (e.g. its API version changed) goes through the
    // finalizer so derived resources are pruned.
    let handled = ctx.reconciler.is_handled(&project_helm_chart)?;
    let has_finalizer = project_helm_chart.finalizers().iter().any(|f| f == FINALIZER);
    if !handled && !has_finalizer {
        debug!("Skipping ProjectHelmChart {}/{}", ns, name);
        return Ok(Action::await_change());
    }

    RECONCILIATIONS.with_label_values(&[KIND]).inc();

    let project_helm_charts: Api<ProjectHelmChart> = Api::namespaced(ctx.client.clone(), &ns);

    let result = finalizer(&project_helm_charts, FINALIZER, project_helm_chart, |event| async {
        match event {
            Event::Apply(project_helm_chart) => apply(&project_helm_chart, &ctx).await,
            Event::Cleanup(project_helm_chart) => cleanup(&project_helm_chart, &ctx).await,
        }
    })
    .await
    .map_err(Error::from);

    let duration = start.elapsed().as_secs_f64();
    RECONCILE_DURATION
        .with_label_values(&[KIND])
        .observe(duration);

    match &result {
        Ok(_) => info!("Successfully reconciled {}/{} in {:.2}s", ns, name, duration),
        Err(e) => {
            RECONCILIATION_ERRORS
                .with_label_values(&[KIND, e.metric_label()])
                .inc();
            error!("Failed to reconcile {}/{}: {}", ns, name, e);
        }
    }

    result
}

/// Generate and apply derived resources for a ProjectHelmChart
async fn apply(project_helm_chart: &ProjectHelmChart, ctx: &Context) -> Result<Action, Error> {
    let ns = project_helm_chart.namespace().unwrap_or_default();
    let name = project_helm_chart.name_any();
    let current = project_helm_chart.status.clone().unwrap_or_default();

    info!("Applying ProjectHelmChart {}/{}", ns, name);

    let generated = match check_singleton(project_helm_chart, ctx)
        .await
        .and_then(|_| ctx.reconciler.on_change(project_helm_chart, current.clone()))
    {
        Ok(generated) => generated,
        Err(e) if !e.is_retriable() => {
            // Stuck requests keep no derived resources around
            delete_derived(&ctx.client, &ctx.system_namespace, &ns, &name).await?;
            let status = failed_status(project_helm_chart, current.clone(), &e);
            update_status(project_helm_chart, ctx, &current, &status).await?;
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    apply_desired(
        &ctx.client,
        &ctx.system_namespace,
        &ns,
        &name,
        &generated.resources,
    )
    .await?;

    let mut status = generated.status;
    if generated.resources.is_empty() {
        update_status(project_helm_chart, ctx, &current, &status).await?;
        return Ok(Action::await_change());
    }

    if let (Some(release_namespace), Some(release_name)) =
        (&status.release_namespace, &status.release_name)
    {
        status.dashboard_values =
            read_dashboard_values(ctx, release_namespace, release_name).await?;
    }
    update_status(project_helm_chart, ctx, &current, &status).await?;

    Ok(Action::requeue(DASHBOARD_REFRESH_INTERVAL))
}

/// Remove derived resources when a ProjectHelmChart is deleted
async fn cleanup(project_helm_chart: &ProjectHelmChart, ctx: &Context) -> Result<Action, Error> {
    let ns = project_helm_chart.namespace().unwrap_or_default();
    let name = project_helm_chart.name_any();

    info!("Cleaning up ProjectHelmChart {}/{}", ns, name);

    delete_derived(&ctx.client, &ctx.system_namespace, &ns, &name).await?;

    Ok(Action::await_change())
}

async fn check_singleton(project_helm_chart: &ProjectHelmChart, ctx: &Context) -> Result<(), Error> {
    if !ctx.opts.singleton {
        return Ok(());
    }
    let ns = project_helm_chart.namespace().unwrap_or_default();
    let siblings: Api<ProjectHelmChart> = Api::namespaced(ctx.client.clone(), &ns);
    let siblings = siblings
        .list(&ListParams::default())
        .await
        .map_err(|e| Error::KubeError(format!("Failed to list ProjectHelmCharts: {}", e)))?;
    ctx.reconciler
        .check_singleton(project_helm_chart, &siblings.items)
}

async fn read_dashboard_values(
    ctx: &Context,
    release_namespace: &str,
    release_name: &str,
) -> Result<Option<crate::crd::GenericMap>, Error> {
    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), release_namespace);
    let selector = format!(
        "{}={}",
        HELM_PROJECT_OPERATOR_DASHBOARD_VALUES_CONFIGMAP_LABEL, release_name
    );
    let list = config_maps
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(|e| Error::KubeError(format!("Failed to list dashboard ConfigMaps: {}", e)))?;
    Ok(dashboard_values(&list.items))
}

async fn update_status(
    project_helm_chart: &ProjectHelmChart,
    ctx: &Context,
    current: &ProjectHelmChartStatus,
    status: &ProjectHelmChartStatus,
) -> Result<(), Error> {
    if current == status {
        return Ok(());
    }
    let ns = project_helm_chart.namespace().unwrap_or_default();
    let name = project_helm_chart.name_any();
    let api: Api<ProjectHelmChart> = Api::namespaced(ctx.client.clone(), &ns);
    api.patch_status(
        &name,
        &PatchParams::default(),
        &Patch::Merge(status_patch(status)),
    )
    .await
    .map_err(|e| Error::KubeError(format!("Failed to update status: {}", e)))?;
    debug!("Updated status of ProjectHelmChart {}/{}", ns, name);
    Ok(())
}

/// Error policy for the controller
fn error_policy(project_helm_chart: Arc<ProjectHelmChart>, err: &Error, _ctx: Arc<Context>) -> Action {
    let ns = project_helm_chart.namespace().unwrap_or_default();
    let name = project_helm_chart.name_any();

    if !err.is_retriable() {
        warn!("Not retrying {}/{} until it changes: {}", ns, name, err);
        return Action::await_change();
    }

    match err {
        Error::ResolutionError(_) => Action::requeue(Duration::from_secs(15)),
        Error::KubeError(_) => Action::requeue(Duration::from_secs(30)),
        _ => Action::requeue(Duration::from_secs(60)),
    }
}
