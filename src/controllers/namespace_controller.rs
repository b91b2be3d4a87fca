//! Watch loop feeding namespace events into the project resolver
//!
//! Every event updates the resolver's index first; the resulting work
//! (registration namespaces, ConfigMaps, resyncs) is then applied to the
//! cluster. The loop runs on a single task, so index updates are serialized.
//! Work that fails to apply is retried with backoff until it lands.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use futures::channel::mpsc::UnboundedSender;
use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, ResourceExt};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::controllers::Context;
use crate::crd::ProjectHelmChart;
use crate::metrics::prometheus::set_registration_namespaces;
use crate::reconcilers::namespace::{reconcile_namespace_update, PendingUpdate};
use crate::resolver::NamespaceUpdate;

/// Run the namespace watch loop.
///
/// `synced` fires once the initial listing has been processed. ProjectHelmCharts
/// in registration namespaces touched by an event are sent on `resync`.
pub async fn run(
    ctx: Arc<Context>,
    charts: Store<ProjectHelmChart>,
    resync: UnboundedSender<ObjectRef<ProjectHelmChart>>,
    synced: oneshot::Sender<()>,
) {
    let namespaces: Api<Namespace> = Api::all(ctx.client.clone());
    let mut synced = Some(synced);

    // Namespaces seen so far, used to detect deletions missed while the watch
    // was being re-listed.
    let mut known: BTreeMap<String, Namespace> = BTreeMap::new();
    let mut relisted: BTreeSet<String> = BTreeSet::new();
    let mut pending = PendingUpdate::default();

    info!("Starting namespace watch");

    let stream = watcher(namespaces, watcher::Config::default()).default_backoff();
    pin_mut!(stream);

    loop {
        let retry_at = pending.retry_at();
        let event = tokio::select! {
            event = stream.next() => match event {
                Some(event) => event,
                None => break,
            },
            _ = wait_until(retry_at) => {
                if let Some(update) = pending.take_due(Instant::now()) {
                    debug!("Retrying namespace update");
                    handle_update(&ctx, &charts, &resync, &mut pending, update).await;
                }
                continue;
            }
        };

        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Namespace watch error");
                continue;
            }
        };

        let initial_sync_done = matches!(event, watcher::Event::InitDone);
        let getter = &ctx.project_getter;
        let mut updates = Vec::new();
        match event {
            watcher::Event::Init => relisted.clear(),
            watcher::Event::InitApply(namespace) => {
                relisted.insert(namespace.name_any());
                updates.push(getter.on_namespace_change(&namespace));
                known.insert(namespace.name_any(), namespace);
            }
            watcher::Event::InitDone => {
                let missing: Vec<String> = known
                    .keys()
                    .filter(|name| !relisted.contains(*name))
                    .cloned()
                    .collect();
                for name in missing {
                    if let Some(namespace) = known.remove(&name) {
                        debug!(namespace = %name, "Namespace removed while re-listing");
                        updates.push(getter.on_namespace_remove(&namespace));
                    }
                }
                updates.push(getter.on_initial_sync());
                relisted.clear();
            }
            watcher::Event::Apply(namespace) => {
                updates.push(getter.on_namespace_change(&namespace));
                known.insert(namespace.name_any(), namespace);
            }
            watcher::Event::Delete(namespace) => {
                known.remove(&namespace.name_any());
                updates.push(getter.on_namespace_remove(&namespace));
            }
        }

        for update in updates.into_iter().filter(|u| !u.is_empty()) {
            let update = pending.combine(update);
            handle_update(&ctx, &charts, &resync, &mut pending, update).await;
        }

        let counts = getter.registration_counts();
        set_registration_namespaces(counts.active, counts.orphaned);

        if initial_sync_done {
            if let Some(synced) = synced.take() {
                info!("Initial namespace sync complete");
                let _ = synced.send(());
            }
        }
    }

    info!("Namespace watch stopped");
}

async fn wait_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

/// Apply the cluster side of an update, then queue resyncs.
/// A failed update is parked in `pending` for the next attempt.
async fn handle_update(
    ctx: &Context,
    charts: &Store<ProjectHelmChart>,
    resync: &UnboundedSender<ObjectRef<ProjectHelmChart>>,
    pending: &mut PendingUpdate,
    update: NamespaceUpdate,
) {
    match reconcile_namespace_update(&ctx.client, &update, &ctx.opts).await {
        Ok(()) => pending.succeeded(),
        Err(e) => {
            let delay = pending.failed(update.clone(), Instant::now());
            warn!(error = %e, retry_in = ?delay, "Failed to apply namespace update, retrying");
        }
    }

    for obj in charts.state() {
        if obj
            .namespace()
            .is_some_and(|ns| update.resync_namespaces.contains(&ns))
        {
            debug!(
                namespace = obj.namespace().unwrap_or_default(),
                name = %obj.name_any(),
                "Resyncing ProjectHelmChart after namespace change"
            );
            if resync.unbounded_send(ObjectRef::from_obj(obj.as_ref())).is_err() {
                debug!("ProjectHelmChart controller is not accepting resyncs");
                return;
            }
        }
    }
}
