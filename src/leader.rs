//! Leader election using Kubernetes Leases
//!
//! Each lock is a `coordination.k8s.io/v1` Lease in the system namespace.
//! Updates carry the lease's resourceVersion, so a concurrent change fails
//! with 409 Conflict instead of producing two holders.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::select_all;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::prometheus::LEADERSHIP;

/// Lock held by the helm-controller loop
pub const HELM_CONTROLLER_LOCK: &str = "helm-controller-lock";

/// Lock held by the helm-locker loop
pub const HELM_LOCKER_LOCK: &str = "helm-locker-lock";

/// Lock held by the ProjectHelmChart loop
pub const HELM_PROJECT_OPERATOR_LOCK: &str = "helm-project-operator-lock";

/// Locks that must all be held before any loop starts, in acquisition order
pub const LOCKS: [&str; 3] = [
    HELM_CONTROLLER_LOCK,
    HELM_LOCKER_LOCK,
    HELM_PROJECT_OPERATOR_LOCK,
];

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Leader election errors
#[derive(Debug, Error)]
pub enum LeaderElectionError {
    /// Kubernetes API error
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Lease returned by the API server without a resourceVersion
    #[error("lease {0} is missing a resourceVersion")]
    MissingResourceVersion(String),
}

/// Leader elector for a single named lock
pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
    lease_duration: Duration,
    renew_interval: Duration,
    retry_interval: Duration,
}

impl LeaderElector {
    /// Create a new leader elector with default timing (30s lease, 10s renew, 5s retry)
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            lease_duration: LEASE_DURATION,
            renew_interval: RENEW_INTERVAL,
            retry_interval: RETRY_INTERVAL,
        }
    }

    /// Block until the lock is held, then return a guard that keeps renewing it.
    /// There is no timeout: without leadership there is nothing to do.
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            "Waiting for leadership..."
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, lease = %self.lease_name, "Leadership acquired");
                    LEADERSHIP.with_label_values(&[&self.lease_name]).set(1.0);
                    return self.create_guard();
                }
                Ok(false) => {
                    debug!(
                        identity = %self.identity,
                        lease = %self.lease_name,
                        retry_secs = self.retry_interval.as_secs(),
                        "Lease held by another, waiting..."
                    );
                }
                Err(e) => {
                    warn!(
                        identity = %self.identity,
                        lease = %self.lease_name,
                        error = %e,
                        retry_secs = self.retry_interval.as_secs(),
                        "Failed to acquire lease, retrying..."
                    );
                }
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        let existing = match api.get(&self.lease_name).await {
            Ok(lease) => lease,
            Err(kube::Error::Api(e)) if e.code == 404 => return self.create_lease(&api, now).await,
            Err(e) => return Err(e.into()),
        };

        let spec = existing.spec.as_ref();
        let holder = spec.and_then(|s| s.holder_identity.as_ref());
        let transitions = spec.and_then(|s| s.lease_transitions).unwrap_or(0);

        if holder == Some(&self.identity) {
            let acquired = spec.and_then(|s| s.acquire_time.clone());
            return self
                .replace_lease(&api, &existing, now, acquired, transitions)
                .await;
        }

        let renew_time = spec.and_then(|s| s.renew_time.as_ref());
        let duration_secs = spec.and_then(|s| s.lease_duration_seconds);
        let is_expired = match (renew_time, duration_secs) {
            (Some(rt), Some(duration)) => now > rt.0 + chrono::Duration::seconds(duration as i64),
            _ => true,
        };

        if !is_expired {
            return Ok(false);
        }

        let taken = self
            .replace_lease(&api, &existing, now, None, transitions + 1)
            .await?;
        if taken {
            info!(
                identity = %self.identity,
                lease = %self.lease_name,
                transitions = transitions + 1,
                "Took over expired lease"
            );
        }
        Ok(taken)
    }

    async fn create_lease(
        &self,
        api: &Api<Lease>,
        now: chrono::DateTime<Utc>,
    ) -> Result<bool, LeaderElectionError> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(self.lease_spec(now, None, 0)),
        };

        match api.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!(identity = %self.identity, lease = %self.lease_name, "Created new lease");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Write ourselves as holder, guarded by the resourceVersion we read
    async fn replace_lease(
        &self,
        api: &Api<Lease>,
        existing: &Lease,
        now: chrono::DateTime<Utc>,
        acquired: Option<MicroTime>,
        transitions: i32,
    ) -> Result<bool, LeaderElectionError> {
        let resource_version = existing
            .metadata
            .resource_version
            .clone()
            .ok_or_else(|| LeaderElectionError::MissingResourceVersion(self.lease_name.clone()))?;

        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version: Some(resource_version),
                ..Default::default()
            },
            spec: Some(self.lease_spec(now, acquired, transitions)),
        };

        match api
            .replace(&self.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, lease = %self.lease_name, "Lease update conflict");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn lease_spec(
        &self,
        now: chrono::DateTime<Utc>,
        acquired: Option<MicroTime>,
        transitions: i32,
    ) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(self.lease_duration.as_secs() as i32),
            acquire_time: Some(acquired.unwrap_or(MicroTime(now))),
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(transitions),
            ..Default::default()
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        let mut last_renewal = tokio::time::Instant::now();
        loop {
            tokio::time::sleep(self.renew_interval).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => last_renewal = tokio::time::Instant::now(),
                // Transient API errors are tolerated while the lease is still valid
                Err(e) if last_renewal.elapsed() + self.renew_interval < self.lease_duration => {
                    warn!(identity = %self.identity, lease = %self.lease_name, error = %e, "Failed to renew lease, retrying");
                }
                Ok(false) | Err(_) => {
                    warn!(identity = %self.identity, lease = %self.lease_name, "Leadership lost");
                    LEADERSHIP.with_label_values(&[&self.lease_name]).set(0.0);
                    let _ = lost_tx.send(());
                    return;
                }
            }
        }
    }

    /// Clear the holder so a standby can take over without waiting for expiry
    async fn release_lease(&self) -> Result<(), LeaderElectionError> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);

        let lease = match api.get(&self.lease_name).await {
            Ok(l) => l,
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_ref());
        if holder != Some(&self.identity) {
            debug!(identity = %self.identity, lease = %self.lease_name, "Not the lease holder, nothing to release");
            return Ok(());
        }

        let past = Utc::now() - chrono::Duration::seconds(60);
        let patch = json!({
            "spec": {
                "holderIdentity": null,
                "renewTime": past.to_rfc3339()
            }
        });

        api.patch(&self.lease_name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

        info!(identity = %self.identity, lease = %self.lease_name, "Lease released");
        Ok(())
    }
}

/// Guard that keeps a lock renewed while it is alive.
/// The renewal task is aborted when the guard is dropped.
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Name of the held lock
    pub fn lock_name(&self) -> &str {
        &self.elector.lease_name
    }

    /// Wait until leadership is lost
    pub async fn lost(&mut self) {
        match self.lost_rx.take() {
            Some(rx) => {
                let _ = rx.await;
            }
            None => futures::future::pending::<()>().await,
        }
    }

    /// Give up the lock immediately
    pub async fn release(&self) -> Result<(), LeaderElectionError> {
        self.renewal_task.abort();
        self.elector.release_lease().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal_task.abort();
        LEADERSHIP
            .with_label_values(&[&self.elector.lease_name])
            .set(0.0);
        info!(identity = %self.elector.identity, lease = %self.elector.lease_name, "Leadership released");
    }
}

/// Acquire every lock in order, blocking on each until it is held
pub async fn acquire_all(
    client: &Client,
    namespace: &str,
    locks: &[&str],
    identity: &str,
) -> Vec<LeaderGuard> {
    let mut guards = Vec::with_capacity(locks.len());
    for lock in locks {
        let elector = Arc::new(LeaderElector::new(client.clone(), lock, namespace, identity));
        guards.push(elector.acquire().await);
    }
    info!(locks = ?locks, "All leader locks acquired");
    guards
}

/// Resolve as soon as any of the guards loses its lock, returning that lock's name
pub async fn any_lost(guards: &mut [LeaderGuard]) -> String {
    if guards.is_empty() {
        return futures::future::pending().await;
    }
    let names: Vec<String> = guards.iter().map(|g| g.lock_name().to_string()).collect();
    let (_, index, _) = select_all(guards.iter_mut().map(|g| Box::pin(g.lost()))).await;
    names[index].clone()
}

/// Release every held lock, logging failures
pub async fn release_all(guards: &[LeaderGuard]) {
    for guard in guards.iter().rev() {
        if let Err(e) = guard.release().await {
            warn!(lease = %guard.lock_name(), error = %e, "Failed to release lease");
        }
    }
}
