//! Integration tests for namespace work that fails to apply
//!
//! These tests verify that failed namespace updates are kept, come back after
//! their backoff and are merged with newer work instead of being dropped.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use helm_project_operator::reconcilers::namespace::{
    retry_delay, PendingUpdate, RETRY_BASE_DELAY, RETRY_MAX_DELAY,
};
use helm_project_operator::resolver::{NamespaceUpdate, RegistrationNamespace};

// ============================================================================
// Test Helpers
// ============================================================================

fn registration(project_id: &str, orphaned: bool) -> RegistrationNamespace {
    RegistrationNamespace {
        project_id: project_id.to_string(),
        orphaned,
    }
}

fn update(registrations: Vec<RegistrationNamespace>, config_maps: &[&str]) -> NamespaceUpdate {
    NamespaceUpdate {
        registration_namespaces: registrations,
        config_map_namespaces: config_maps.iter().map(|ns| ns.to_string()).collect(),
        resync_namespaces: BTreeSet::new(),
    }
}

// ============================================================================
// Retry Tests
// ============================================================================

#[test]
fn test_failed_update_is_emitted_again_after_backoff() {
    let mut pending = PendingUpdate::default();
    let now = Instant::now();
    let work = update(vec![registration("p1", false)], &["cattle-project-p1"]);

    let delay = pending.failed(work.clone(), now);

    assert_eq!(delay, RETRY_BASE_DELAY);
    assert_eq!(pending.retry_at(), Some(now + delay));
    assert_eq!(pending.take_due(now), None);
    assert_eq!(pending.take_due(now + delay), Some(work));
    assert!(pending.is_empty());
    assert_eq!(pending.retry_at(), None);
}

#[test]
fn test_failed_update_is_never_given_up() {
    let mut pending = PendingUpdate::default();
    let mut now = Instant::now();
    let work = update(vec![registration("p1", true)], &[]);

    let mut previous = Duration::ZERO;
    for _ in 0..20 {
        let delay = pending.failed(work.clone(), now);
        assert!(delay >= previous);
        assert!(delay <= RETRY_MAX_DELAY);
        previous = delay;

        now += delay;
        assert_eq!(pending.take_due(now), Some(work.clone()));
    }
    assert_eq!(previous, RETRY_MAX_DELAY);
}

#[test]
fn test_success_resets_backoff() {
    let mut pending = PendingUpdate::default();
    let now = Instant::now();
    let work = update(vec![registration("p1", false)], &[]);

    pending.failed(work.clone(), now);
    pending.failed(work.clone(), now);
    pending.take_due(now + RETRY_MAX_DELAY);
    pending.succeeded();

    assert_eq!(pending.failed(work, now), RETRY_BASE_DELAY);
}

#[test]
fn test_newer_update_is_folded_into_pending_work() {
    let mut pending = PendingUpdate::default();
    let now = Instant::now();
    pending.failed(
        update(
            vec![registration("p1", false), registration("p2", false)],
            &["cattle-project-p1", "cattle-project-p2"],
        ),
        now,
    );

    let mut newer = update(vec![registration("p1", true)], &["cattle-project-p2"]);
    newer.resync_namespaces.insert("cattle-project-p1".to_string());
    let combined = pending.combine(newer);

    assert_eq!(
        combined.registration_namespaces,
        vec![registration("p2", false), registration("p1", true)]
    );
    assert_eq!(
        combined.config_map_namespaces,
        vec!["cattle-project-p1", "cattle-project-p2"]
    );
    assert!(combined.resync_namespaces.contains("cattle-project-p1"));
    assert!(pending.is_empty());
    assert_eq!(pending.retry_at(), None);
}

#[test]
fn test_retry_delay_doubles_until_capped() {
    assert_eq!(retry_delay(0), Duration::from_millis(200));
    assert_eq!(retry_delay(1), Duration::from_millis(400));
    assert_eq!(retry_delay(3), Duration::from_millis(1600));
    assert_eq!(retry_delay(11), RETRY_MAX_DELAY);
    assert_eq!(retry_delay(u32::MAX), RETRY_MAX_DELAY);
}
