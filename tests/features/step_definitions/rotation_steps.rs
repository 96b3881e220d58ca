//! Rotation step definitions

use std::sync::atomic::Ordering;

use chrono::{NaiveDate, TimeZone, Utc};
use cucumber::{given, then, when};

use certrotate::services::{keys, CredentialStore, SyncOutcome};
use certrotate::RotationError;

use crate::common::{identity, not_after, not_before, subject, IDENTITY_NAME};
use crate::features::support::TestWorld;

#[given("no credential is stored")]
async fn no_credential(world: &mut TestWorld) {
    assert!(world.store.get(IDENTITY_NAME).await.unwrap().is_none());
}

#[given(expr = "a valid credential whose {string} is {string}")]
async fn valid_credential(world: &mut TestWorld, key: String, value: String) {
    let mut record = world.ca.credential(&identity());
    record.data.insert(key, value.into_bytes());
    world.store.seed(IDENTITY_NAME, &record).await;
}

#[given("a certificate request was submitted")]
async fn request_submitted(world: &mut TestWorld) {
    world.sync().await;
    assert!(matches!(
        world.last_result,
        Some(Ok(SyncOutcome::RequestSubmitted { .. }))
    ));
}

#[given("the authority issues a certificate for the held key")]
async fn issue_matching(world: &mut TestWorld) {
    let request = world.authority.last_request().unwrap();
    world
        .authority
        .approve_and_issue(&request.request_id, &world.ca, not_before(), not_after());
}

#[given("the authority issues a certificate for an unrelated key")]
async fn issue_unrelated(world: &mut TestWorld) {
    let request = world.authority.last_request().unwrap();
    let unrelated = keys::generate_private_key_pem().unwrap();
    let certificate = world
        .ca
        .issue_for_key(&unrelated, &subject(), not_before(), not_after());
    world
        .authority
        .approve_with_certificate(&request.request_id, certificate);
}

#[given("the admission guard halts")]
async fn guard_halts(world: &mut TestWorld) {
    world.halt.store(true, Ordering::SeqCst);
}

#[when("a reconciliation pass runs")]
async fn pass_runs(world: &mut TestWorld) {
    world.sync().await;
}

#[when(expr = "a reconciliation pass runs on {string}")]
async fn pass_runs_on(world: &mut TestWorld, date: String) {
    let day = NaiveDate::parse_from_str(&date, "%Y-%m-%d").unwrap();
    let now = Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap());
    world.sync_at(now).await;
}

#[then("a certificate request is submitted")]
async fn request_is_submitted(world: &mut TestWorld) {
    assert!(matches!(
        world.last_result,
        Some(Ok(SyncOutcome::RequestSubmitted { .. }))
    ));
    assert_eq!(world.authority.request_count(), 1);
}

#[then("no certificate request is submitted")]
async fn no_request_submitted(world: &mut TestWorld) {
    assert_eq!(world.authority.request_count(), 0);
}

#[then("a request is pending")]
async fn request_pending(world: &mut TestWorld) {
    assert!(!world.reconciler.pending().is_idle());
}

#[then("no request is pending")]
async fn no_request_pending(world: &mut TestWorld) {
    assert!(world.reconciler.pending().is_idle());
}

#[then("the store holds a credential whose certificate matches its key")]
async fn store_holds_credential(world: &mut TestWorld) {
    let stored = world.store.get(IDENTITY_NAME).await.unwrap().unwrap();
    assert!(keys::certificate_matches_key(
        stored.certificate().unwrap(),
        stored.private_key().unwrap()
    ));
}

#[then("no credential is stored")]
async fn no_credential_stored(world: &mut TestWorld) {
    assert!(world.store.get(IDENTITY_NAME).await.unwrap().is_none());
}

#[then("the pass fails with a key mismatch")]
async fn pass_fails_with_mismatch(world: &mut TestWorld) {
    assert!(matches!(
        world.last_result,
        Some(Err(RotationError::KeyMismatch(_)))
    ));
}

#[then("no condition is reported")]
async fn no_condition(world: &mut TestWorld) {
    assert!(world.reporter.conditions().is_empty());
}

#[then("a successful condition is reported")]
async fn successful_condition(world: &mut TestWorld) {
    let conditions = world.reporter.conditions();
    assert_eq!(conditions.len(), 1);
    assert!(conditions[0].1.status);
}

#[then(expr = "a failed condition is reported with reason {string}")]
async fn failed_condition_with_reason(world: &mut TestWorld, reason: String) {
    let condition = world.reporter.last().unwrap();
    assert!(!condition.status);
    assert_eq!(condition.reason.as_str(), reason);
}

#[then(expr = "a failed condition is reported with message {string}")]
async fn failed_condition_with_message(world: &mut TestWorld, message: String) {
    let condition = world.reporter.last().unwrap();
    assert!(!condition.status);
    assert_eq!(condition.message, message);
}

#[then(expr = "the last event is {string}")]
async fn last_event(world: &mut TestWorld, reason: String) {
    assert_eq!(world.events.reasons().last(), Some(&reason));
}
