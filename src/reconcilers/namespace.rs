//! Applying the outcome of namespace events

use std::time::{Duration, Instant};

use kube::Client;
use tracing::info;

use crate::adapters::namespace_builder;
use crate::common::labels::project_registration_namespace_name;
use crate::common::Options;
use crate::reconcilers::apply::{apply_config_map, apply_namespace};
use crate::resolver::NamespaceUpdate;
use crate::Result;

/// Create or relabel registration namespaces and publish their ConfigMaps
pub async fn reconcile_namespace_update(
    client: &Client,
    update: &NamespaceUpdate,
    opts: &Options,
) -> Result<()> {
    for registration in &update.registration_namespaces {
        let Some(namespace) = namespace_builder::build_registration_namespace(registration, opts)
        else {
            continue;
        };
        if registration.orphaned {
            info!(
                project = %registration.project_id,
                "Marking project registration namespace {} as orphaned",
                project_registration_namespace_name(&registration.project_id)
            );
        }
        apply_namespace(client, &namespace).await?;
    }

    for namespace in &update.config_map_namespaces {
        let project_id = update
            .registration_namespaces
            .iter()
            .find(|r| project_registration_namespace_name(&r.project_id) == *namespace)
            .map(|r| r.project_id.as_str());
        let config_map = namespace_builder::build_config_map(namespace, project_id, opts);
        apply_config_map(client, &config_map).await?;
    }

    Ok(())
}

/// Delay before the first retry of a failed update
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Upper bound for the delay between retries
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(300);

/// Namespace work that failed to apply and is waiting for its next attempt.
///
/// The resolver index has already moved on when an update fails, so the work
/// is kept here until it lands. Newer updates are folded into the pending one
/// and applied together, which keeps the latest state of every registration
/// namespace.
#[derive(Debug, Default)]
pub struct PendingUpdate {
    update: Option<NamespaceUpdate>,
    failures: u32,
    retry_at: Option<Instant>,
}

impl PendingUpdate {
    /// Take the pending work, folding `newer` into it
    pub fn combine(&mut self, newer: NamespaceUpdate) -> NamespaceUpdate {
        self.retry_at = None;
        match self.update.take() {
            Some(pending) => pending.merge(newer),
            None => newer,
        }
    }

    /// Take the pending work if its retry is due
    pub fn take_due(&mut self, now: Instant) -> Option<NamespaceUpdate> {
        match self.retry_at {
            Some(at) if at <= now => Some(self.combine(NamespaceUpdate::default())),
            _ => None,
        }
    }

    /// Keep work that failed to apply and schedule its next attempt
    pub fn failed(&mut self, update: NamespaceUpdate, now: Instant) -> Duration {
        let delay = retry_delay(self.failures);
        self.failures = self.failures.saturating_add(1);
        self.update = Some(update);
        self.retry_at = Some(now + delay);
        delay
    }

    /// Reset the backoff once work has been applied
    pub fn succeeded(&mut self) {
        self.failures = 0;
    }

    /// When the pending work should be attempted again
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn is_empty(&self) -> bool {
        self.update.is_none()
    }
}

/// Exponential backoff from [`RETRY_BASE_DELAY`], capped at [`RETRY_MAX_DELAY`]
pub fn retry_delay(failures: u32) -> Duration {
    RETRY_BASE_DELAY
        .checked_mul(2u32.saturating_pow(failures))
        .map_or(RETRY_MAX_DELAY, |delay| delay.min(RETRY_MAX_DELAY))
}
