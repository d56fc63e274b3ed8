//! Federation merge, early-stop and authorization scenarios.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use syndic::collection::RepositoryErrorKind;
use syndic::config::Config;
use syndic::federation::FederationError;
use syndic::instances::{Guid, MatchCriteria, Paging, PropertyMatch, PropertyValue};
use syndic::security::{Decision, PolicyDecisionPoint, PolicyGate};
use syndic::Syndic;

use common::{fast_config, identity, join_member, term};

fn name_match(value: &str) -> PropertyMatch {
    PropertyMatch::new(MatchCriteria::All)
        .with_property("displayName", PropertyValue::Text(value.to_string()))
}

#[tokio::test]
async fn test_point_lookup_stops_at_first_hit() {
    let syndic = Syndic::open(fast_config());
    let registry = syndic.registry();

    let a = join_member(&registry, "a", &[]).await;
    let b = join_member(&registry, "b", &[]).await;
    let c = join_member(&registry, "c", &[]).await;

    a.seed_entity(term("g1", "col-a", 1)).await;
    b.seed_entity(term("g1", "col-b", 2)).await;
    b.set_delay(Duration::from_millis(50)).await;
    c.set_delay(Duration::from_secs(10)).await;

    let outcome = syndic
        .entity_by_guid("erinoverview", &Guid::from("g1"))
        .await
        .unwrap();

    // Point lookups run sequentially: the first hit satisfies the run and
    // the slower members are never contacted, so no conflict is recorded.
    assert_eq!(outcome.instances.len(), 1);
    assert_eq!(outcome.instances[0].version, 1);
    assert_eq!(outcome.reached_members, 1);
    assert_eq!(outcome.eligible_members, 3);
    assert!(outcome.stopped_early);
    assert!(outcome.conflicts.is_empty());
    assert!(outcome.member_errors.is_empty());
    assert_eq!(b.call_count(), 0);
    assert_eq!(c.call_count(), 0);
}

#[tokio::test]
async fn test_search_merges_across_members() {
    let syndic = Syndic::open(fast_config());
    let registry = syndic.registry();

    for name in ["a", "b", "c"] {
        let member = join_member(&registry, name, &["GlossaryTerm"]).await;
        member.seed_entity(term(&format!("{name}-1"), &format!("col-{name}"), 1)).await;
        member.seed_entity(term(&format!("{name}-2"), &format!("col-{name}"), 1)).await;
    }

    let outcome = syndic
        .entities_by_property(
            "erinoverview",
            "GlossaryTerm",
            PropertyMatch::default(),
            Some(Paging::first(10)),
        )
        .await
        .unwrap();

    assert_eq!(outcome.instances.len(), 6);
    assert_eq!(outcome.reached_members, 3);
    assert!(outcome.conflicts.is_empty());
    assert!(!outcome.stopped_early);
}

#[tokio::test]
async fn test_same_guid_disagreement_records_one_conflict() {
    let syndic = Syndic::open(fast_config());
    let registry = syndic.registry();

    let a = join_member(&registry, "a", &[]).await;
    let b = join_member(&registry, "b", &[]).await;

    a.seed_entity(term("g1", "col-a", 1)).await;
    b.seed_entity(term("g1", "col-b", 2)).await;
    // Delay the second member so merge order is deterministic.
    b.set_delay(Duration::from_millis(50)).await;

    let outcome = syndic
        .entities_by_property(
            "erinoverview",
            "GlossaryTerm",
            name_match("g1"),
            Some(Paging::first(10)),
        )
        .await
        .unwrap();

    assert_eq!(outcome.instances.len(), 1);
    assert_eq!(outcome.instances[0].version, 1);
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].guid, Guid::from("g1"));
    assert_eq!(outcome.conflicts[0].winner, identity("a"));
    assert_eq!(outcome.conflicts[0].loser, identity("b"));
    assert_eq!(outcome.reached_members, 2);
}

#[tokio::test]
async fn test_satisfied_search_discards_late_responses() {
    let syndic = Syndic::open(fast_config());
    let registry = syndic.registry();

    let a = join_member(&registry, "a", &[]).await;
    let b = join_member(&registry, "b", &[]).await;

    a.seed_entity(term("a-1", "col-a", 1)).await;
    a.seed_entity(term("a-2", "col-a", 1)).await;
    b.seed_entity(term("b-1", "col-b", 1)).await;
    b.set_delay(Duration::from_millis(300)).await;

    let outcome = syndic
        .entities_by_property(
            "erinoverview",
            "GlossaryTerm",
            PropertyMatch::default(),
            Some(Paging::first(2)),
        )
        .await
        .unwrap();

    // The fast member fills the page; the slow member's in-flight call is
    // cancelled and nothing of it is folded.
    assert_eq!(outcome.instances.len(), 2);
    assert!(outcome
        .instances
        .iter()
        .all(|i| i.home_collection_id == "col-a"));
    assert_eq!(outcome.reached_members, 1);
    assert!(outcome.stopped_early);
}

#[tokio::test]
async fn test_all_members_failed() {
    let syndic = Syndic::open(fast_config());
    let registry = syndic.registry();

    let a = join_member(&registry, "a", &[]).await;
    let b = join_member(&registry, "b", &[]).await;
    a.set_fail_with(RepositoryErrorKind::Unreachable).await;
    b.set_fail_with(RepositoryErrorKind::MalformedResponse).await;

    let result = syndic
        .entities_by_property(
            "erinoverview",
            "GlossaryTerm",
            PropertyMatch::default(),
            None,
        )
        .await;

    match result {
        Err(FederationError::AllMembersFailed { errors }) => {
            assert_eq!(errors.len(), 2);
            assert_eq!(
                errors.get(&identity("a")),
                Some(&RepositoryErrorKind::Unreachable)
            );
            assert_eq!(
                errors.get(&identity("b")),
                Some(&RepositoryErrorKind::MalformedResponse)
            );
        }
        other => panic!("expected AllMembersFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_partial_failure_still_returns_merged_result() {
    let syndic = Syndic::open(fast_config());
    let registry = syndic.registry();

    let a = join_member(&registry, "a", &[]).await;
    let b = join_member(&registry, "b", &[]).await;
    a.seed_entity(term("a-1", "col-a", 1)).await;
    b.set_fail_with(RepositoryErrorKind::MalformedResponse).await;

    let outcome = syndic
        .entities_by_property(
            "erinoverview",
            "GlossaryTerm",
            PropertyMatch::default(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.instances.len(), 1);
    assert_eq!(outcome.reached_members, 1);
    assert_eq!(
        outcome.member_errors.get(&identity("b")),
        Some(&RepositoryErrorKind::MalformedResponse)
    );
}

#[tokio::test]
async fn test_empty_registry_is_an_empty_result() {
    let syndic = Syndic::open(Config::for_test());

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
    assert!(outcome.member_errors.is_empty());
}

#[tokio::test]
async fn test_unsupported_type_skips_members_without_calls() {
    let syndic = Syndic::open(Config::for_test());
    let registry = syndic.registry();

    let a = join_member(&registry, "a", &["Asset"]).await;
    let b = join_member(&registry, "b", &["Asset"]).await;

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
    assert_eq!(b.call_count(), 0);
}

#[tokio::test]
async fn test_relationships_merge_and_entityless_members_contribute_nothing() {
    let syndic = Syndic::open(fast_config());
    let registry = syndic.registry();

    let a = join_member(&registry, "a", &[]).await;
    let b = join_member(&registry, "b", &[]).await;
    let _c = join_member(&registry, "c", &[]).await;

    let anchor = Guid::from("g1");
    a.seed_relationship(&anchor, term("r1", "col-a", 1)).await;
    b.seed_relationship(&anchor, term("r2", "col-b", 1)).await;

    let outcome = syndic
        .relationships_for_entity("erinoverview", &anchor, None, None)
        .await
        .unwrap();

    assert_eq!(outcome.instances.len(), 2);
    assert_eq!(outcome.reached_members, 3);
    assert!(outcome.member_errors.is_empty());
}

/// Denies per-instance clearance, allows everything else.
struct InstanceOnlyDenial;

#[async_trait]
impl PolicyDecisionPoint for InstanceOnlyDenial {
    async fn decide(&self, _user_id: &str, descriptor: &str) -> Decision {
        if descriptor.starts_with("access instance") {
            Decision::Deny
        } else {
            Decision::Allow
        }
    }
}

/// Denies everything.
struct DenyAll;

#[async_trait]
impl PolicyDecisionPoint for DenyAll {
    async fn decide(&self, _user_id: &str, _descriptor: &str) -> Decision {
        Decision::Deny
    }
}

#[tokio::test]
async fn test_denied_caller_never_reaches_a_member() {
    let syndic = Syndic::new(fast_config(), Arc::new(PolicyGate::new(Arc::new(DenyAll))));
    let registry = syndic.registry();

    let a = join_member(&registry, "a", &[]).await;
    a.seed_entity(term("g1", "col-a", 1)).await;

    let result = syndic.entity_by_guid("mallory", &Guid::from("g1")).await;
    match result {
        Err(FederationError::NotAuthorized(err)) => assert_eq!(err.user_id, "mallory"),
        other => panic!("expected NotAuthorized, got {other:?}"),
    }
    assert_eq!(a.call_count(), 0);
}

#[tokio::test]
async fn test_late_authorization_filters_merged_instances() {
    let syndic = Syndic::new(
        fast_config(),
        Arc::new(PolicyGate::new(Arc::new(InstanceOnlyDenial))),
    );
    let registry = syndic.registry();

    let a = join_member(&registry, "a", &[]).await;
    a.seed_entity(term("g1", "col-a", 1)).await;

    let outcome = syndic
        .entity_by_guid("erinoverview", &Guid::from("g1"))
        .await
        .unwrap();

    // The member was reached and answered, but the instance is withheld.
    assert_eq!(outcome.reached_members, 1);
    assert!(outcome.instances.is_empty());
}
