//! Composite request aggregation.

mod common;

use std::time::Duration;

use common::{engine, engine_with, reason, register_probe, ProbeMode};
use gatehouse_core::{ClientRequest, GroupId, UnitResponse};
use gatehouse_daemon::orchestrator::{self, GroupTable, TOKEN_GROUP_TIMEOUT};
use proptest::prelude::*;
use serde_json::{json, Value};

#[tokio::test]
async fn composite_response_is_keyed_per_unit() {
    let ctx = engine().await;
    let a = register_probe(&ctx, "svc_a", "m1", false, ProbeMode::Success);
    let b = register_probe(&ctx, "svc_b", "m2", false, ProbeMode::Success);

    let request = ClientRequest::new("svc_a,svc_b", "m1,m2").with_body(json!({"shared": true}));
    let response = orchestrator::dispatch(&ctx, &request).await.expect("dispatch");

    assert_eq!(reason(&response["svc_a_m1"]), "success");
    assert_eq!(reason(&response["svc_b_m2"]), "success");
    assert_eq!(a.hit_count(), 1);
    assert_eq!(b.hit_count(), 1);
    assert!(ctx.groups.is_empty());
}

#[tokio::test]
async fn one_service_fans_out_over_messages() {
    let ctx = engine().await;
    register_probe(&ctx, "svc_a", "m1", false, ProbeMode::Success);
    let extra = common::Probe::new(ProbeMode::Success);
    ctx.registry.register(
        "svc_a",
        "m2",
        gatehouse_daemon::handlers::Endpoint::direct(extra.clone()),
    );

    let request = ClientRequest::new("svc_a", "m1,m2");
    let response = orchestrator::dispatch(&ctx, &request).await.expect("dispatch");
    assert_eq!(reason(&response["svc_a_m1"]), "success");
    assert_eq!(reason(&response["svc_a_m2"]), "success");
}

#[tokio::test]
async fn mismatched_lists_fail_before_any_handler_runs() {
    let ctx = engine().await;
    let probe = register_probe(&ctx, "svc_a", "m1", false, ProbeMode::Success);
    let request = ClientRequest::new("svc_a,svc_b", "m1,m2,m3");
    let err = orchestrator::dispatch(&ctx, &request).await.unwrap_err();
    assert_eq!(err.client_token(), "badrequest");
    assert_eq!(probe.hit_count(), 0);
}

#[tokio::test]
async fn stalled_unit_is_bounded_by_the_group_timeout() {
    let mut config = common::test_config();
    config.group_timeout_ms = 200;
    let ctx = engine_with(config).await;
    register_probe(&ctx, "svc_fast", "m", false, ProbeMode::Success);
    register_probe(
        &ctx,
        "svc_slow",
        "m",
        false,
        ProbeMode::Sleep(Duration::from_secs(10)),
    );

    let request = ClientRequest::new("svc_fast,svc_slow", "m,m");
    let response = orchestrator::dispatch(&ctx, &request).await.expect("dispatch");
    assert_eq!(reason(&response["svc_fast_m"]), "success");
    assert_eq!(reason(&response["svc_slow_m"]), TOKEN_GROUP_TIMEOUT);
    assert!(ctx.groups.is_empty());
}

fn filled(table: &GroupTable, group: &GroupId, index: usize) -> Option<usize> {
    table
        .complete(group, index, UnitResponse::success(Value::Null))
        .map(|slots| slots.len())
}

proptest! {
    // Exactly one delivery, on the final completion, whatever the order.
    #[test]
    fn exactly_one_delivery_for_any_completion_order(
        keys in proptest::collection::vec(any::<u64>(), 2..8)
    ) {
        let size = keys.len();
        let mut order: Vec<usize> = (0..size).collect();
        order.sort_by_key(|&i| keys[i]);

        let table = GroupTable::new();
        let group = GroupId::generate();
        table.open(&group, (0..size).map(|i| format!("svc_m{i}")).collect());

        let mut deliveries = 0;
        for (step, &index) in order.iter().enumerate() {
            match filled(&table, &group, index) {
                Some(len) => {
                    deliveries += 1;
                    prop_assert_eq!(step, size - 1);
                    prop_assert_eq!(len, size);
                }
                None => prop_assert!(step < size - 1),
            }
        }
        prop_assert_eq!(deliveries, 1);
        // Late triggers after delivery are no-ops.
        prop_assert!(filled(&table, &group, order[0]).is_none());
    }
}
