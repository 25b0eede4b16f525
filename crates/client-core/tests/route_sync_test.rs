//! Route-role synchronizer against a live authority

mod common;

use agency_auth_core::Role;
use agency_client_core::{RouteRoleMap, RouteRoleSynchronizer, SyncOutcome};
use common::*;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

fn synchronizer(h: &Harness) -> RouteRoleSynchronizer {
    RouteRoleSynchronizer::new(h.authority.clone(), RouteRoleMap::default())
}

#[tokio::test]
async fn mapped_route_switches_held_role() {
    let h = Harness::new().start_as(SELLER).await;
    let sync = synchronizer(&h);

    let outcome = sync.on_navigate("/plan-dashboard?week=12").await.unwrap();

    assert_eq!(outcome, SyncOutcome::Switched(Role::TeamLeader));
    assert_eq!(h.authority.get_active_role().await, Some(Role::TeamLeader));
    assert_eq!(h.profiles.stored_active_role(SELLER), Some(Role::TeamLeader));
}

#[tokio::test]
async fn shorter_prefix_does_not_shadow_longer_one() {
    let h = Harness::new().start_as(SELLER).await;
    h.authority.switch_role(Role::TeamLeader).await.unwrap();
    let sync = synchronizer(&h);

    assert_eq!(
        sync.on_navigate("/plan-dashboard").await.unwrap(),
        SyncOutcome::AlreadyActive
    );
    assert_eq!(
        sync.on_navigate("/plan/today").await.unwrap(),
        SyncOutcome::Switched(Role::Salesperson)
    );
}

#[tokio::test]
async fn unmapped_and_ungranted_routes_write_nothing() {
    let h = Harness::new().start_as(SELLER).await;
    let sync = synchronizer(&h);

    assert_eq!(
        sync.on_navigate("/settings").await.unwrap(),
        SyncOutcome::Unmapped
    );
    assert_eq!(
        sync.on_navigate("/office/reports").await.unwrap(),
        SyncOutcome::NotGranted
    );
    assert_eq!(
        sync.on_navigate("/pipeline").await.unwrap(),
        SyncOutcome::AlreadyActive
    );
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn impersonation_suppresses_every_write() {
    let h = Harness::impersonating().await;
    let sync = synchronizer(&h);

    for path in ["/office", "/admin", "/plan-dashboard", "/plan", "/team/roster", "/assistant"] {
        assert_eq!(sync.on_navigate(path).await.unwrap(), SyncOutcome::Suppressed);
    }

    assert!(h.gateway.calls().is_empty());
    assert!(h.profiles.active_role_writes().is_empty());
    assert_eq!(h.profiles.stored_active_role(TARGET), None);
    assert_eq!(h.profiles.stored_active_role(ADMIN), None);
}

#[tokio::test]
async fn sync_resumes_after_impersonation_ends() {
    let h = Harness::impersonating().await;
    let sync = synchronizer(&h);
    assert_eq!(
        sync.on_navigate("/office").await.unwrap(),
        SyncOutcome::Suppressed
    );

    h.authority.stop_viewing_as().await;

    assert_eq!(
        sync.on_navigate("/office").await.unwrap(),
        SyncOutcome::Switched(Role::OfficeManager)
    );
    assert_eq!(h.gateway.calls(), vec![(ADMIN.to_string(), Role::OfficeManager)]);
}

#[tokio::test]
async fn spawned_synchronizer_follows_navigation_channel() {
    let h = Harness::new().start_as(SELLER).await;
    let (tx, rx) = mpsc::channel(8);
    let task = synchronizer(&h).spawn(rx);

    tx.send("/plan-dashboard".to_string()).await.unwrap();
    tx.send("/settings".to_string()).await.unwrap();
    drop(tx);
    task.await.unwrap();

    assert_eq!(h.authority.get_active_role().await, Some(Role::TeamLeader));
    assert_eq!(h.gateway.calls(), vec![(SELLER.to_string(), Role::TeamLeader)]);
}

mod proptest_route_sync {
    use super::*;
    use proptest::prelude::*;

    fn navigation_path() -> impl Strategy<Value = String> {
        prop_oneof![
            prop::string::string_regex(
                "/(admin|office|team|plan-dashboard|plan|assistant|pipeline)[a-z0-9/?#=&.-]{0,24}"
            )
            .expect("valid mapped path regex"),
            prop::string::string_regex("[a-zA-Z0-9_./?#=%: -]{0,64}")
                .expect("valid free-form path regex"),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn impersonation_suppresses_writes_for_any_path(
            paths in prop::collection::vec(navigation_path(), 1..12)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("test runtime");
            let (outcomes, writes, calls) = runtime.block_on(async {
                let h = Harness::impersonating().await;
                let sync = synchronizer(&h);
                let mut outcomes = Vec::with_capacity(paths.len());
                for path in &paths {
                    outcomes.push(sync.on_navigate(path).await);
                }
                (outcomes, h.profiles.active_role_writes(), h.gateway.calls())
            });

            for outcome in &outcomes {
                prop_assert!(matches!(outcome, Ok(SyncOutcome::Suppressed)), "{:?}", outcome);
            }
            prop_assert!(writes.is_empty());
            prop_assert!(calls.is_empty());
        }
    }
}
