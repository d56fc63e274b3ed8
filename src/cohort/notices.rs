//! Cohort membership notice feed.
//!
//! The event-bus transport that carries cohort registration traffic is an
//! external collaborator; what arrives here is its decoded form - join and
//! leave notices on an mpsc channel. Delivery is at-least-once, which the
//! registry's idempotent register/deregister absorbs.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{CohortConnector, CohortRegistry, RepositoryIdentity};

/// A membership change announced over the cohort topic.
pub enum MembershipNotice {
    /// A member joined (or re-announced itself); carries the resolved
    /// connector for that member.
    MemberJoined { connector: CohortConnector },
    /// A member left the cohort.
    MemberLeft { identity: RepositoryIdentity },
}

impl std::fmt::Debug for MembershipNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemberJoined { connector } => f
                .debug_struct("MemberJoined")
                .field("identity", connector.identity())
                .finish(),
            Self::MemberLeft { identity } => f
                .debug_struct("MemberLeft")
                .field("identity", identity)
                .finish(),
        }
    }
}

/// Spawn the listener task that applies membership notices to the registry.
///
/// Runs until the notice channel closes. The returned handle is for
/// lifecycle wiring (await on shutdown); the task holds its own registry
/// reference.
pub fn spawn_membership_listener(
    registry: Arc<CohortRegistry>,
    mut notices: mpsc::Receiver<MembershipNotice>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Membership listener started");
        while let Some(notice) = notices.recv().await {
            match notice {
                MembershipNotice::MemberJoined { connector } => {
                    registry.register(connector).await;
                }
                MembershipNotice::MemberLeft { identity } => {
                    registry.deregister(&identity).await;
                }
            }
        }
        debug!("Membership notice channel closed, listener stopping");
    })
}
