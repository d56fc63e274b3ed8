//! Federation of one logical request across all cohort members.
//!
//! This module contains:
//! - `FederatedOperation` trait: one unit of federated work (what to ask
//!   one member, how to merge its answer, when to stop)
//! - `MergeState`: the guid-deduplicating accumulator with conflict
//!   recording
//! - `FederationController`: drives an operation across the registry with
//!   bounded fan-out, per-member timeouts and partial-failure semantics
//! - Concrete operations: find-entity-by-guid, find-entities-by-property,
//!   get-relationships-for-entity, verify-type-support

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::cohort::{CohortConnector, RepositoryIdentity};
use crate::collection::{self, RepositoryErrorKind};
use crate::instances::{Guid, InstanceStatus, InstanceSummary};
use crate::security::{AuthorizationScope, NotAuthorizedError};

pub mod controller;
pub mod operations;

pub use controller::FederationController;
pub use operations::{
    FindEntitiesByProperty, FindEntityByGuid, RelationshipsForEntity, VerifyTypeSupport,
};

/// Input common to every federated run. Immutable for the life of one run;
/// operation-specific parameters live on the operation itself.
#[derive(Debug, Clone)]
pub struct FederationRequest {
    pub user_id: String,
}

impl FederationRequest {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Run-level failures surfaced to the caller.
///
/// Per-member errors never appear here directly - they ride along inside
/// `FederationOutcome::member_errors` (or inside `AllMembersFailed` when no
/// usable result exists).
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("every eligible cohort member failed ({} errors)", .errors.len())]
    AllMembersFailed {
        errors: BTreeMap<RepositoryIdentity, RepositoryErrorKind>,
    },

    #[error(transparent)]
    NotAuthorized(#[from] NotAuthorizedError),
}

/// Two members disagreed on the content of one guid. Non-fatal metadata
/// attached to the outcome alongside the winning value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuidConflict {
    pub guid: Guid,
    pub winner: RepositoryIdentity,
    pub loser: RepositoryIdentity,
}

/// Merged answer of one federated run.
#[derive(Debug)]
pub struct FederationOutcome {
    /// Deduplicated-by-guid merged instances, in merge order.
    pub instances: Vec<InstanceSummary>,
    /// Same-guid disagreements detected during the merge.
    pub conflicts: Vec<GuidConflict>,
    /// Members whose call failed, by error kind.
    pub member_errors: BTreeMap<RepositoryIdentity, RepositoryErrorKind>,
    /// Whether the run stopped before contacting every eligible member.
    pub stopped_early: bool,
    /// Members whose response was merged.
    pub reached_members: usize,
    /// Members that passed the operation's type filter.
    pub eligible_members: usize,
}

impl FederationOutcome {
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// How the controller schedules member calls for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Bounded concurrent fan-out (the default).
    Concurrent,
    /// One member at a time, in snapshot order - for operations whose
    /// `is_satisfied` is expected to trigger early.
    Sequential,
}

/// Guid-deduplicating accumulator shared by every operation.
///
/// Merge rule: the first-merged report of a guid wins, except that an
/// `Active` report replaces an earlier non-`Active` one. Every same-guid
/// content disagreement is recorded as exactly one `GuidConflict`.
#[derive(Default)]
pub struct MergeState {
    merged: Vec<InstanceSummary>,
    index: HashMap<Guid, usize>,
    owners: HashMap<Guid, RepositoryIdentity>,
    conflicts: Vec<GuidConflict>,
}

impl MergeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one member's batch. Pure bookkeeping - no I/O, no blocking.
    pub fn absorb(&mut self, responder: &RepositoryIdentity, batch: Vec<InstanceSummary>) {
        for incoming in batch {
            let guid = incoming.guid.clone();
            match self.index.get(&guid) {
                None => {
                    self.index.insert(guid.clone(), self.merged.len());
                    self.owners.insert(guid, responder.clone());
                    self.merged.push(incoming);
                }
                Some(&slot) => {
                    let existing = &self.merged[slot];
                    if !crate::instances::content_differs(existing, &incoming) {
                        continue;
                    }
                    let prior_owner = self.owners[&guid].clone();
                    if existing.status != InstanceStatus::Active
                        && incoming.status == InstanceStatus::Active
                    {
                        // An active report beats an earlier non-active one.
                        self.conflicts.push(GuidConflict {
                            guid: guid.clone(),
                            winner: responder.clone(),
                            loser: prior_owner,
                        });
                        self.owners.insert(guid, responder.clone());
                        self.merged[slot] = incoming;
                    } else {
                        self.conflicts.push(GuidConflict {
                            guid,
                            winner: prior_owner,
                            loser: responder.clone(),
                        });
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    /// Hand the accumulated instances and conflicts to outcome assembly,
    /// optionally truncated to a page limit.
    pub fn into_parts(self, limit: Option<usize>) -> (Vec<InstanceSummary>, Vec<GuidConflict>) {
        let mut merged = self.merged;
        if let Some(limit) = limit {
            merged.truncate(limit);
        }
        (merged, self.conflicts)
    }
}

/// One unit of federated work, invoked per reachable member by the
/// controller.
///
/// `call_member` is the only suspending step; `should_call`, `fold` and
/// `is_satisfied` are pure and must not perform I/O. The returned future
/// owns everything it needs (`BoxFuture<'static, _>`) so the controller
/// can run calls concurrently while folding completed responses one at a
/// time.
pub trait FederatedOperation: Send {
    /// What the authorization gate must clear before any member is called.
    fn scope(&self) -> AuthorizationScope;

    /// Scheduling preference for this operation kind.
    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Concurrent
    }

    /// Skip members whose declared type compatibility excludes this
    /// request - avoids wasted calls.
    fn should_call(&self, connector: &CohortConnector) -> bool;

    /// Perform the per-member fetch/search. May block on network I/O.
    fn call_member(
        &self,
        user_id: &str,
        connector: Arc<CohortConnector>,
    ) -> BoxFuture<'static, collection::Result<Vec<InstanceSummary>>>;

    /// Merge one member's successful response into the accumulator.
    fn fold(&mut self, responder: &RepositoryIdentity, batch: Vec<InstanceSummary>);

    /// True once the operation has enough information to stop early.
    fn is_satisfied(&self) -> bool;

    /// Hand over the accumulated state for outcome assembly.
    fn finish(self) -> (Vec<InstanceSummary>, Vec<GuidConflict>)
    where
        Self: Sized;
}
