//! Member health lifecycle: timeouts, demotion to unreachable, revival.

#[path = "../common/mod.rs"]
mod common;

use std::time::Duration;

use syndic::cohort::ConnectorState;
use syndic::collection::RepositoryErrorKind;
use syndic::instances::PropertyMatch;
use syndic::Syndic;

use common::{fast_config, identity, join_member, term};

#[tokio::test]
async fn test_repeated_timeouts_demote_member_then_success_revives() {
    // 100ms member timeout, unreachable after 2 consecutive timeouts.
    let syndic = Syndic::open(fast_config());
    let registry = syndic.registry();

    let slow = join_member(&registry, "slow", &[]).await;
    let healthy = join_member(&registry, "healthy", &[]).await;
    slow.set_delay(Duration::from_millis(400)).await;
    healthy.seed_entity(term("h-1", "col-healthy", 1)).await;

    let search = || {
        syndic.entities_by_property(
            "erinoverview",
            "GlossaryTerm",
            PropertyMatch::default(),
            None,
        )
    };

    // First run: timeout recorded, member still active.
    let outcome = search().await.unwrap();
    assert_eq!(
        outcome.member_errors.get(&identity("slow")),
        Some(&RepositoryErrorKind::Timeout)
    );
    assert_eq!(outcome.instances.len(), 1);

    let snapshot = registry.snapshot().await;
    let slow_connector = snapshot
        .iter()
        .find(|c| c.identity().collection_id == "col-slow")
        .unwrap()
        .clone();
    assert_eq!(slow_connector.state(), ConnectorState::Active);

    // Second consecutive timeout demotes the member.
    search().await.unwrap();
    assert_eq!(slow_connector.state(), ConnectorState::Unreachable);

    // An unreachable member is still retried on the next run; once it
    // answers in time it is revived.
    slow.set_delay(Duration::from_millis(0)).await;
    slow.seed_entity(term("s-1", "col-slow", 1)).await;
    let outcome = search().await.unwrap();
    assert_eq!(outcome.instances.len(), 2);
    assert_eq!(outcome.reached_members, 2);
    assert_eq!(slow_connector.state(), ConnectorState::Active);
}

#[tokio::test]
async fn test_unreachable_error_demotes_immediately() {
    let syndic = Syndic::open(fast_config());
    let registry = syndic.registry();

    let flaky = join_member(&registry, "flaky", &[]).await;
    let healthy = join_member(&registry, "healthy", &[]).await;
    flaky.set_fail_with(RepositoryErrorKind::Unreachable).await;
    healthy.seed_entity(term("h-1", "col-healthy", 1)).await;

    syndic
        .entities_by_property(
            "erinoverview",
            "GlossaryTerm",
            PropertyMatch::default(),
            None,
        )
        .await
        .unwrap();

    let snapshot = registry.snapshot().await;
    let flaky_connector = snapshot
        .iter()
        .find(|c| c.identity().collection_id == "col-flaky")
        .unwrap();
    assert_eq!(flaky_connector.state(), ConnectorState::Unreachable);
}

#[tokio::test]
async fn test_deregistered_member_skipped_by_in_flight_snapshot_holders() {
    let syndic = Syndic::open(fast_config());
    let registry = syndic.registry();

    let a = join_member(&registry, "a", &[]).await;
    a.seed_entity(term("a-1", "col-a", 1)).await;

    // A snapshot taken before the leave notice still holds the connector,
    // but the controller filters deregistered entries out.
    registry.deregister(&identity("a")).await;

    let outcome = syndic
        .entities_by_property(
            "erinoverview",
            "GlossaryTerm",
            PropertyMatch::default(),
            None,
        )
        .await
        .unwrap();

    assert!(outcome.is_empty());
    assert_eq!(outcome.eligible_members, 0);
    assert_eq!(a.call_count(), 0);
}
