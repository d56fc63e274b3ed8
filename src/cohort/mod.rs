//! Cohort membership: connectors, the live registry, and the membership
//! notice feed.
//!
//! A cohort is a set of repositories agreeing to share metadata instances.
//! Each member is represented locally by a `CohortConnector` wrapping its
//! resolved `MetadataCollection`; the `CohortRegistry` is the only state
//! shared across concurrent federation runs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collection::MetadataCollection;

pub mod notices;
pub mod registry;

pub use notices::{spawn_membership_listener, MembershipNotice};
pub use registry::CohortRegistry;

/// Immutable identity of one cohort member, assigned at connector creation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepositoryIdentity {
    /// Unique id of the member's metadata collection.
    pub collection_id: String,
    /// Human-readable name of the member server.
    pub server_name: String,
}

impl RepositoryIdentity {
    pub fn new(collection_id: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            server_name: server_name.into(),
        }
    }
}

impl std::fmt::Display for RepositoryIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.server_name, self.collection_id)
    }
}

/// Liveness state of a cohort connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum ConnectorState {
    /// Member is believed reachable and is called on every run.
    Active = 0,
    /// Member failed repeatedly; still retried on later runs (self-healing).
    Unreachable = 1,
    /// Member left the cohort; never called again through this connector.
    Deregistered = 2,
}

impl ConnectorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Unreachable,
            _ => Self::Deregistered,
        }
    }
}

/// One cohort member as seen by the federation layer.
///
/// Owned by the registry; handed out inside `Arc` via snapshots. State and
/// the timeout counter are atomics so snapshot holders observe demotions
/// made by concurrent runs.
pub struct CohortConnector {
    identity: RepositoryIdentity,
    collection: Arc<dyn MetadataCollection>,
    supported_types: HashSet<String>,
    state: AtomicU8,
    consecutive_timeouts: AtomicU32,
}

impl CohortConnector {
    pub fn new(
        identity: RepositoryIdentity,
        collection: Arc<dyn MetadataCollection>,
        supported_types: HashSet<String>,
    ) -> Self {
        Self {
            identity,
            collection,
            supported_types,
            state: AtomicU8::new(ConnectorState::Active as u8),
            consecutive_timeouts: AtomicU32::new(0),
        }
    }

    pub fn identity(&self) -> &RepositoryIdentity {
        &self.identity
    }

    pub fn collection(&self) -> Arc<dyn MetadataCollection> {
        self.collection.clone()
    }

    pub fn state(&self) -> ConnectorState {
        ConnectorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: ConnectorState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Whether this member declares compatibility with the given type.
    ///
    /// An empty declaration means the member accepts all types.
    pub fn supports_type(&self, type_name: &str) -> bool {
        self.supported_types.is_empty() || self.supported_types.contains(type_name)
    }

    pub fn supported_types(&self) -> &HashSet<String> {
        &self.supported_types
    }

    /// Record one timeout; returns the new consecutive count.
    pub(crate) fn note_timeout(&self) -> u32 {
        self.consecutive_timeouts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// A successful call resets the timeout streak.
    pub(crate) fn reset_timeouts(&self) {
        self.consecutive_timeouts.store(0, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for CohortConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CohortConnector")
            .field("identity", &self.identity)
            .field("supported_types", &self.supported_types)
            .field("state", &self.state())
            .finish()
    }
}
