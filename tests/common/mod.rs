//! Shared builders for federation integration tests.

use std::collections::HashSet;
use std::sync::Arc;

use syndic::cohort::{CohortConnector, CohortRegistry, RepositoryIdentity};
use syndic::collection::ScriptedCollection;
use syndic::config::Config;
use syndic::instances::{Guid, InstanceSummary, PropertyValue};

/// Identity for a member named after its short test name.
pub fn identity(name: &str) -> RepositoryIdentity {
    RepositoryIdentity::new(format!("col-{name}"), format!("server-{name}"))
}

/// Register a scripted member and hand back its collection for seeding.
pub async fn join_member(
    registry: &CohortRegistry,
    name: &str,
    types: &[&str],
) -> Arc<ScriptedCollection> {
    let collection = Arc::new(ScriptedCollection::new(format!("col-{name}")));
    registry
        .register(CohortConnector::new(
            identity(name),
            collection.clone(),
            types.iter().map(|t| t.to_string()).collect::<HashSet<_>>(),
        ))
        .await;
    collection
}

/// A glossary term entity homed at the given member.
pub fn term(guid: &str, home: &str, version: i64) -> InstanceSummary {
    InstanceSummary::new(Guid::from(guid), "GlossaryTerm", home)
        .with_version(version)
        .with_property("displayName", PropertyValue::Text(guid.to_string()))
}

/// Config with timings short enough for scripted-delay tests.
pub fn fast_config() -> Config {
    let mut config = Config::for_test();
    config.federation.member_timeout_ms = 100;
    config.federation.unreachable_after_timeouts = 2;
    config
}
