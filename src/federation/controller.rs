//! Federation controller - drives one operation across the cohort.
//!
//! Ordering, concurrency policy, stop conditions and error aggregation
//! live here; what to ask a member and how to merge answers live on the
//! operation. Per-member failures are recorded, never thrown across the
//! fan-out boundary.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::cohort::{CohortConnector, CohortRegistry, ConnectorState, RepositoryIdentity};
use crate::collection::{self, RepositoryError, RepositoryErrorKind};
use crate::config::FederationConfig;
use crate::instances::InstanceSummary;
use crate::security::AuthorizationGate;

use super::{
    ExecutionMode, FederatedOperation, FederationError, FederationOutcome, FederationRequest,
};

/// Drives a `FederatedOperation` across the registry snapshot.
///
/// The authorization gate is injected at construction and checked exactly
/// once per run, before any member is contacted.
pub struct FederationController {
    registry: Arc<CohortRegistry>,
    gate: Arc<dyn AuthorizationGate>,
    config: FederationConfig,
    server_name: String,
}

impl FederationController {
    pub fn new(
        registry: Arc<CohortRegistry>,
        gate: Arc<dyn AuthorizationGate>,
        config: FederationConfig,
        server_name: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            gate,
            config,
            server_name: server_name.into(),
        }
    }

    pub fn registry(&self) -> Arc<CohortRegistry> {
        self.registry.clone()
    }

    /// Run one federated operation to completion.
    ///
    /// Fails with `NotAuthorized` before any member call, or with
    /// `AllMembersFailed` when every eligible member errored. An empty
    /// eligible set is an empty success, not an error.
    #[tracing::instrument(name = "federation.run", skip_all, fields(user = %request.user_id))]
    pub async fn run<O: FederatedOperation>(
        &self,
        request: &FederationRequest,
        mut operation: O,
    ) -> Result<FederationOutcome, FederationError> {
        let scope = operation.scope();
        self.gate
            .validate_service_access(&request.user_id, scope.service)
            .await?;
        if let Some(type_name) = &scope.type_name {
            self.gate
                .validate_type_access(&request.user_id, type_name, &self.server_name)
                .await?;
        }

        let eligible: Vec<Arc<CohortConnector>> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|c| c.state() != ConnectorState::Deregistered)
            .filter(|c| operation.should_call(c))
            .collect();
        let eligible_members = eligible.len();

        if eligible.is_empty() {
            debug!(service = scope.service, "No eligible cohort members");
            let (instances, conflicts) = operation.finish();
            return Ok(FederationOutcome {
                instances,
                conflicts,
                member_errors: BTreeMap::new(),
                stopped_early: false,
                reached_members: 0,
                eligible_members: 0,
            });
        }

        let mut member_errors = BTreeMap::new();
        let mut reached_members = 0usize;

        match operation.execution_mode() {
            ExecutionMode::Sequential => {
                self.run_sequential(request, &mut operation, &eligible, &mut member_errors, &mut reached_members)
                    .await;
            }
            ExecutionMode::Concurrent => {
                self.run_concurrent(request, &mut operation, &eligible, &mut member_errors, &mut reached_members)
                    .await;
            }
        }

        if reached_members == 0 && !member_errors.is_empty() {
            warn!(
                service = scope.service,
                failed = member_errors.len(),
                "Every eligible cohort member failed"
            );
            return Err(FederationError::AllMembersFailed {
                errors: member_errors,
            });
        }

        let stopped_early =
            operation.is_satisfied() && reached_members + member_errors.len() < eligible_members;

        let (instances, conflicts) = operation.finish();
        let instances = self.authorize_instances(&request.user_id, instances).await;

        debug!(
            service = scope.service,
            merged = instances.len(),
            conflicts = conflicts.len(),
            reached = reached_members,
            eligible = eligible_members,
            stopped_early,
            "Federation run complete"
        );

        Ok(FederationOutcome {
            instances,
            conflicts,
            member_errors,
            stopped_early,
            reached_members,
            eligible_members,
        })
    }

    /// Call members one at a time in snapshot order, stopping as soon as
    /// the operation is satisfied. Used for point lookups where the first
    /// or second member usually answers.
    async fn run_sequential<O: FederatedOperation>(
        &self,
        request: &FederationRequest,
        operation: &mut O,
        eligible: &[Arc<CohortConnector>],
        member_errors: &mut BTreeMap<RepositoryIdentity, RepositoryErrorKind>,
        reached_members: &mut usize,
    ) {
        for connector in eligible {
            let call = operation.call_member(&request.user_id, connector.clone());
            let (identity, result) = guarded_call(
                connector.identity().clone(),
                call,
                self.config.member_timeout(),
                self.config.member_timeout_ms,
            )
            .await;

            self.absorb_response(operation, identity, result, member_errors, reached_members)
                .await;
            if operation.is_satisfied() {
                break;
            }
        }
    }

    /// Bounded concurrent fan-out. Completed responses are folded one at a
    /// time; once the operation is satisfied, in-flight calls are aborted
    /// (best-effort) and any late completions are discarded unfolded.
    async fn run_concurrent<O: FederatedOperation>(
        &self,
        request: &FederationRequest,
        operation: &mut O,
        eligible: &[Arc<CohortConnector>],
        member_errors: &mut BTreeMap<RepositoryIdentity, RepositoryErrorKind>,
        reached_members: &mut usize,
    ) {
        let fan_out = self.config.fan_out_limit.max(1);
        let timeout = self.config.member_timeout();
        let timeout_ms = self.config.member_timeout_ms;

        let mut pending = eligible.iter();
        let mut in_flight = JoinSet::new();

        while in_flight.len() < fan_out {
            let Some(connector) = pending.next() else { break };
            let call = operation.call_member(&request.user_id, connector.clone());
            in_flight.spawn(guarded_call(
                connector.identity().clone(),
                call,
                timeout,
                timeout_ms,
            ));
        }

        while let Some(joined) = in_flight.join_next().await {
            let (identity, result) = match joined {
                Ok(response) => response,
                Err(err) if err.is_cancelled() => continue,
                Err(err) => {
                    error!(error = %err, "Federated member task panicked");
                    continue;
                }
            };

            self.absorb_response(operation, identity, result, member_errors, reached_members)
                .await;
            if operation.is_satisfied() {
                in_flight.abort_all();
                break;
            }

            if let Some(connector) = pending.next() {
                let call = operation.call_member(&request.user_id, connector.clone());
                in_flight.spawn(guarded_call(
                    connector.identity().clone(),
                    call,
                    timeout,
                    timeout_ms,
                ));
            }
        }
    }

    /// Fold a success, or record the failure and report member health to
    /// the registry. Never aborts the rest of the fan-out.
    async fn absorb_response<O: FederatedOperation>(
        &self,
        operation: &mut O,
        identity: RepositoryIdentity,
        result: collection::Result<Vec<InstanceSummary>>,
        member_errors: &mut BTreeMap<RepositoryIdentity, RepositoryErrorKind>,
        reached_members: &mut usize,
    ) {
        match result {
            Ok(batch) => {
                self.registry.record_success(&identity).await;
                *reached_members += 1;
                operation.fold(&identity, batch);
            }
            Err(err) => {
                warn!(member = %identity, error = %err, "Cohort member call failed");
                match &err {
                    RepositoryError::Timeout { .. } => {
                        self.registry.record_timeout(&identity).await;
                    }
                    RepositoryError::Unreachable { .. } => {
                        self.registry.mark_unreachable(&identity).await;
                    }
                    _ => {}
                }
                member_errors.insert(identity, err.kind());
            }
        }
    }

    /// Late authorization: instances the merge surfaced still need
    /// per-instance clearance; denied ones are filtered out rather than
    /// re-running the query.
    async fn authorize_instances(
        &self,
        user_id: &str,
        instances: Vec<InstanceSummary>,
    ) -> Vec<InstanceSummary> {
        let mut kept = Vec::with_capacity(instances.len());
        for instance in instances {
            match self
                .gate
                .validate_instance_access(user_id, &instance.guid, &instance.type_name, &self.server_name)
                .await
            {
                Ok(()) => kept.push(instance),
                Err(err) => {
                    debug!(
                        guid = %instance.guid,
                        error = %err,
                        "Instance filtered by late authorization"
                    );
                }
            }
        }
        kept
    }
}

/// Wrap a member call with the per-member timeout, mapping an elapse to a
/// `Timeout` repository error so every failure takes the same path.
async fn guarded_call(
    identity: RepositoryIdentity,
    call: BoxFuture<'static, collection::Result<Vec<InstanceSummary>>>,
    timeout: Duration,
    timeout_ms: u64,
) -> (RepositoryIdentity, collection::Result<Vec<InstanceSummary>>) {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => (identity, result),
        Err(_) => {
            let member = identity.collection_id.clone();
            (
                identity,
                Err(RepositoryError::Timeout { member, timeout_ms }),
            )
        }
    }
}
