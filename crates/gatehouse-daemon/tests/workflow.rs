//! Maker-checker verification through the full dispatch path.

mod common;

use common::{add_user, call, engine, login, reason};
use gatehouse_daemon::handlers::Endpoint;
use serde_json::{json, Value};

fn serial(response: &Value) -> String {
    response["data"]["serial"]
        .as_str()
        .expect("serial in pending response")
        .to_string()
}

#[tokio::test]
async fn mutation_by_a_regular_user_parks_as_pending() {
    let ctx = engine().await;
    add_user(&ctx, "alice", "alice pw", &["user_service"]);
    let alice = login(&ctx, "alice", "alice pw").await;

    let response = call(
        &ctx,
        Some(&alice),
        "user_service",
        "create_user",
        json!({"username": "newbie", "password": "newbie pw"}),
    )
    .await;
    assert_eq!(reason(&response), "pending");
    assert!(ctx.credentials.get("newbie").is_none());
    assert_eq!(ctx.actions.len(), 1);
}

#[tokio::test]
async fn self_verification_is_rejected_and_the_action_survives() {
    let ctx = engine().await;
    add_user(&ctx, "alice", "alice pw", &["user_service"]);
    let alice = login(&ctx, "alice", "alice pw").await;

    let pending = call(
        &ctx,
        Some(&alice),
        "user_service",
        "create_user",
        json!({"username": "newbie"}),
    )
    .await;
    let serial = serial(&pending);

    let response = call(
        &ctx,
        Some(&alice),
        "user_service",
        "verify_action",
        json!({"serial": serial}),
    )
    .await;
    assert_eq!(reason(&response), "selfverification");
    assert_eq!(ctx.actions.len(), 1);
}

#[tokio::test]
async fn foreign_verification_replays_and_commits() {
    let ctx = engine().await;
    add_user(&ctx, "alice", "alice pw", &["user_service"]);
    add_user(&ctx, "bob", "bob pw", &["user_service"]);
    let alice = login(&ctx, "alice", "alice pw").await;
    let bob = login(&ctx, "bob", "bob pw").await;

    let pending = call(
        &ctx,
        Some(&alice),
        "user_service",
        "create_user",
        json!({"username": "newbie", "password": "newbie pw"}),
    )
    .await;
    let serial = serial(&pending);

    let response = call(
        &ctx,
        Some(&bob),
        "user_service",
        "verify_action",
        json!({"serial": serial}),
    )
    .await;
    assert_eq!(reason(&response), "success");
    assert_eq!(
        response["data"]["response"]["reason"], "success",
        "replay outcome travels back to the verifier"
    );
    assert!(ctx.credentials.get("newbie").is_some());
    assert!(ctx.actions.is_empty());
}

#[tokio::test]
async fn replay_runs_under_the_verifier_authority() {
    let ctx = engine().await;
    // A privileged target service the verifier cannot reach.
    let probe =
        common::register_probe(&ctx, "vault_service", "open", true, common::ProbeMode::Success);
    // The probe endpoint must itself be verification-gated for this path.
    ctx.registry
        .register("vault_service", "open", Endpoint::verified(probe.clone()));
    add_user(&ctx, "alice", "alice pw", &["user_service", "vault_service"]);
    add_user(&ctx, "bob", "bob pw", &["user_service"]);
    let alice = login(&ctx, "alice", "alice pw").await;
    let bob = login(&ctx, "bob", "bob pw").await;

    let pending = call(&ctx, Some(&alice), "vault_service", "open", json!({})).await;
    assert_eq!(reason(&pending), "pending");

    let response = call(
        &ctx,
        Some(&bob),
        "user_service",
        "verify_action",
        json!({"serial": serial(&pending)}),
    )
    .await;
    // Verification succeeds, but the replayed unit is judged against
    // bob's snapshot, which lacks the vault privilege.
    assert_eq!(reason(&response), "success");
    assert_eq!(response["data"]["response"]["reason"], "deniedaccess");
    assert_eq!(probe.hit_count(), 0);
}

#[tokio::test]
async fn unknown_serial_is_reported() {
    let ctx = engine().await;
    add_user(&ctx, "bob", "bob pw", &["user_service"]);
    let bob = login(&ctx, "bob", "bob pw").await;
    let response = call(
        &ctx,
        Some(&bob),
        "user_service",
        "verify_action",
        json!({"serial": "nope"}),
    )
    .await;
    assert_eq!(reason(&response), "unknownserial");
}

#[tokio::test]
async fn only_the_proposer_may_withdraw() {
    let ctx = engine().await;
    add_user(&ctx, "alice", "alice pw", &["user_service"]);
    add_user(&ctx, "bob", "bob pw", &["user_service"]);
    let alice = login(&ctx, "alice", "alice pw").await;
    let bob = login(&ctx, "bob", "bob pw").await;

    let pending = call(
        &ctx,
        Some(&alice),
        "user_service",
        "disable_user",
        json!({"username": "bob"}),
    )
    .await;
    let serial = serial(&pending);

    let foreign = call(
        &ctx,
        Some(&bob),
        "user_service",
        "delete_action",
        json!({"serial": serial}),
    )
    .await;
    assert_eq!(reason(&foreign), "foreigndeletion");

    let own = call(
        &ctx,
        Some(&alice),
        "user_service",
        "delete_action",
        json!({"serial": serial}),
    )
    .await;
    assert_eq!(reason(&own), "success");
    assert!(ctx.actions.is_empty());
}

#[tokio::test]
async fn exempt_identities_commit_immediately() {
    let ctx = engine().await;
    let root = login(&ctx, "root", "root secret").await;
    let response = call(
        &ctx,
        Some(&root),
        "user_service",
        "create_user",
        json!({"username": "direct", "password": "direct pw"}),
    )
    .await;
    assert_eq!(reason(&response), "success");
    assert!(ctx.credentials.get("direct").is_some());
    assert!(ctx.actions.is_empty());
}

#[tokio::test]
async fn last_action_returns_the_newest_proposal() {
    let ctx = engine().await;
    add_user(&ctx, "alice", "alice pw", &["user_service"]);
    let alice = login(&ctx, "alice", "alice pw").await;

    call(
        &ctx,
        Some(&alice),
        "user_service",
        "disable_user",
        json!({"username": "x"}),
    )
    .await;
    let second = call(
        &ctx,
        Some(&alice),
        "user_service",
        "create_user",
        json!({"username": "y"}),
    )
    .await;

    let last = call(&ctx, Some(&alice), "user_service", "last_action", json!({})).await;
    assert_eq!(reason(&last), "success");
    assert_eq!(last["data"]["serial"], second["data"]["serial"]);
    assert_eq!(ctx.actions.len(), 2);
}
