//! Cohort connector registry - thread-safe membership for one server.
//!
//! Mutations arrive from the membership notice feed and from federation
//! runs reporting member health; reads are point-in-time snapshots so a
//! run's iteration stays stable while membership changes underneath it.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{CohortConnector, ConnectorState, RepositoryIdentity};

/// Thread-safe registry of cohort connectors.
///
/// Registration order is preserved; snapshots hand connectors out in that
/// order, which is also the calling order for sequential federation runs.
pub struct CohortRegistry {
    members: RwLock<Vec<Arc<CohortConnector>>>,
    /// Consecutive timeouts before a member is demoted to `Unreachable`.
    unreachable_after: u32,
}

impl CohortRegistry {
    pub fn new(unreachable_after: u32) -> Self {
        Self {
            members: RwLock::new(Vec::new()),
            unreachable_after,
        }
    }

    /// Register a connector, replacing any prior entry with the same
    /// collection id (idempotent re-registration after reconnect).
    pub async fn register(&self, connector: CohortConnector) {
        let connector = Arc::new(connector);
        let mut members = self.members.write().await;

        let position = members
            .iter()
            .position(|m| m.identity().collection_id == connector.identity().collection_id);
        match position {
            Some(index) => {
                info!(member = %connector.identity(), "Re-registering cohort member");
                // Snapshots still holding the old connector must stop calling it.
                members[index].set_state(ConnectorState::Deregistered);
                members[index] = connector;
            }
            None => {
                info!(member = %connector.identity(), "Registering cohort member");
                members.push(connector);
            }
        }
    }

    /// Remove a member on a cohort-leave notice.
    ///
    /// The removed connector is marked `Deregistered` so in-flight runs
    /// holding it in a snapshot skip it. Unknown identities are ignored
    /// (at-least-once notice delivery).
    pub async fn deregister(&self, identity: &RepositoryIdentity) {
        let mut members = self.members.write().await;
        let position = members
            .iter()
            .position(|m| m.identity().collection_id == identity.collection_id);
        match position {
            Some(index) => {
                info!(member = %identity, "Deregistering cohort member");
                let removed = members.remove(index);
                removed.set_state(ConnectorState::Deregistered);
            }
            None => {
                debug!(member = %identity, "Deregister notice for unknown member, ignoring");
            }
        }
    }

    /// Point-in-time copy of the membership, in registration order.
    ///
    /// Only reads membership metadata - never calls a member, never blocks
    /// on one being slow.
    pub async fn snapshot(&self) -> Vec<Arc<CohortConnector>> {
        let members = self.members.read().await;
        members.clone()
    }

    /// Force a member into the `Unreachable` state.
    pub async fn mark_unreachable(&self, identity: &RepositoryIdentity) {
        if let Some(connector) = self.find(identity).await {
            warn!(member = %identity, "Marking cohort member unreachable");
            connector.set_state(ConnectorState::Unreachable);
        }
    }

    /// Record a call timeout for a member; demotes it to `Unreachable`
    /// once the consecutive-timeout threshold is reached.
    pub async fn record_timeout(&self, identity: &RepositoryIdentity) {
        if let Some(connector) = self.find(identity).await {
            let streak = connector.note_timeout();
            if streak >= self.unreachable_after && connector.state() == ConnectorState::Active {
                warn!(
                    member = %identity,
                    consecutive_timeouts = streak,
                    "Cohort member demoted to unreachable"
                );
                connector.set_state(ConnectorState::Unreachable);
            }
        }
    }

    /// Record a successful call: resets the timeout streak and revives an
    /// `Unreachable` member.
    pub async fn record_success(&self, identity: &RepositoryIdentity) {
        if let Some(connector) = self.find(identity).await {
            connector.reset_timeouts();
            if connector.state() == ConnectorState::Unreachable {
                info!(member = %identity, "Cohort member reachable again");
                connector.set_state(ConnectorState::Active);
            }
        }
    }

    pub async fn len(&self) -> usize {
        let members = self.members.read().await;
        members.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn find(&self, identity: &RepositoryIdentity) -> Option<Arc<CohortConnector>> {
        let members = self.members.read().await;
        members
            .iter()
            .find(|m| m.identity().collection_id == identity.collection_id)
            .cloned()
    }
}
