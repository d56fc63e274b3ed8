//! Concrete federated operations.
//!
//! Each operation is an independent strategy struct constructed with its
//! request parameters; the controller depends only on the
//! `FederatedOperation` trait.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::cohort::{CohortConnector, RepositoryIdentity};
use crate::collection::{self, RepositoryError};
use crate::instances::{Guid, InstanceSummary, Paging, PropertyMatch};
use crate::security::AuthorizationScope;

use super::{ExecutionMode, FederatedOperation, GuidConflict, MergeState};

/// Point lookup of one entity by guid.
///
/// Sequential by default: the entity usually lives at one member, so the
/// first hit satisfies the run and spares the remaining members a call. A
/// member that does not hold the guid answers with a miss, not a failure.
pub struct FindEntityByGuid {
    guid: Guid,
    state: MergeState,
}

impl FindEntityByGuid {
    pub fn new(guid: Guid) -> Self {
        Self {
            guid,
            state: MergeState::new(),
        }
    }
}

impl FederatedOperation for FindEntityByGuid {
    fn scope(&self) -> AuthorizationScope {
        AuthorizationScope {
            service: "find-entity-by-guid",
            type_name: None,
        }
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }

    fn should_call(&self, _connector: &CohortConnector) -> bool {
        // The entity's type is unknown until a member answers, so no
        // member can be excluded up front.
        true
    }

    fn call_member(
        &self,
        user_id: &str,
        connector: Arc<CohortConnector>,
    ) -> BoxFuture<'static, collection::Result<Vec<InstanceSummary>>> {
        let user = user_id.to_string();
        let guid = self.guid.clone();
        let collection = connector.collection();
        Box::pin(async move {
            match collection.entity_detail(&user, &guid).await {
                Ok(entity) => Ok(vec![entity]),
                // A member not holding the instance is a miss, not a failure.
                Err(RepositoryError::NotFound { .. }) => Ok(Vec::new()),
                Err(err) => Err(err),
            }
        })
    }

    fn fold(&mut self, responder: &RepositoryIdentity, batch: Vec<InstanceSummary>) {
        self.state.absorb(responder, batch);
    }

    fn is_satisfied(&self) -> bool {
        !self.state.is_empty()
    }

    fn finish(self) -> (Vec<InstanceSummary>, Vec<GuidConflict>) {
        self.state.into_parts(None)
    }
}

/// Broad property search across every member that supports the type.
pub struct FindEntitiesByProperty {
    type_name: String,
    criteria: PropertyMatch,
    page: Paging,
    state: MergeState,
}

impl FindEntitiesByProperty {
    pub fn new(type_name: impl Into<String>, criteria: PropertyMatch, page: Paging) -> Self {
        Self {
            type_name: type_name.into(),
            criteria,
            page,
            state: MergeState::new(),
        }
    }
}

impl FederatedOperation for FindEntitiesByProperty {
    fn scope(&self) -> AuthorizationScope {
        AuthorizationScope {
            service: "find-entities-by-property",
            type_name: Some(self.type_name.clone()),
        }
    }

    fn should_call(&self, connector: &CohortConnector) -> bool {
        connector.supports_type(&self.type_name)
    }

    fn call_member(
        &self,
        user_id: &str,
        connector: Arc<CohortConnector>,
    ) -> BoxFuture<'static, collection::Result<Vec<InstanceSummary>>> {
        let user = user_id.to_string();
        let type_name = self.type_name.clone();
        let criteria = self.criteria.clone();
        let page = self.page;
        let collection = connector.collection();
        Box::pin(async move {
            collection
                .entities_by_property(&user, &type_name, &criteria, page)
                .await
        })
    }

    fn fold(&mut self, responder: &RepositoryIdentity, batch: Vec<InstanceSummary>) {
        self.state.absorb(responder, batch);
    }

    fn is_satisfied(&self) -> bool {
        self.state.len() >= self.page.limit
    }

    fn finish(self) -> (Vec<InstanceSummary>, Vec<GuidConflict>) {
        self.state.into_parts(Some(self.page.limit))
    }
}

/// Relationships attached to one entity across the cohort.
pub struct RelationshipsForEntity {
    entity_guid: Guid,
    relationship_type: Option<String>,
    page: Paging,
    state: MergeState,
}

impl RelationshipsForEntity {
    pub fn new(entity_guid: Guid, relationship_type: Option<String>, page: Paging) -> Self {
        Self {
            entity_guid,
            relationship_type,
            page,
            state: MergeState::new(),
        }
    }
}

impl FederatedOperation for RelationshipsForEntity {
    fn scope(&self) -> AuthorizationScope {
        AuthorizationScope {
            service: "get-relationships-for-entity",
            type_name: self.relationship_type.clone(),
        }
    }

    fn should_call(&self, connector: &CohortConnector) -> bool {
        match &self.relationship_type {
            Some(type_name) => connector.supports_type(type_name),
            None => true,
        }
    }

    fn call_member(
        &self,
        user_id: &str,
        connector: Arc<CohortConnector>,
    ) -> BoxFuture<'static, collection::Result<Vec<InstanceSummary>>> {
        let user = user_id.to_string();
        let guid = self.entity_guid.clone();
        let relationship_type = self.relationship_type.clone();
        let collection = connector.collection();
        Box::pin(async move {
            match collection
                .relationships_for_entity(&user, &guid, relationship_type.as_deref())
                .await
            {
                Ok(batch) => Ok(batch),
                // Members that never saw the entity contribute nothing.
                Err(RepositoryError::NotFound { .. }) => Ok(Vec::new()),
                Err(err) => Err(err),
            }
        })
    }

    fn fold(&mut self, responder: &RepositoryIdentity, batch: Vec<InstanceSummary>) {
        self.state.absorb(responder, batch);
    }

    fn is_satisfied(&self) -> bool {
        self.state.len() >= self.page.limit
    }

    fn finish(self) -> (Vec<InstanceSummary>, Vec<GuidConflict>) {
        self.state.into_parts(Some(self.page.limit))
    }
}

/// Validate type compatibility across the whole cohort.
///
/// Asks every active member: a member whose declaration excludes the type
/// records a `TypeMismatch`; a supporting member is probed for liveness
/// and identity (its reported collection id must match the registered
/// one). `reached_members` counts the compatible, reachable members.
pub struct VerifyTypeSupport {
    type_name: String,
    state: MergeState,
}

impl VerifyTypeSupport {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            state: MergeState::new(),
        }
    }
}

impl FederatedOperation for VerifyTypeSupport {
    fn scope(&self) -> AuthorizationScope {
        AuthorizationScope {
            service: "verify-type-support",
            type_name: Some(self.type_name.clone()),
        }
    }

    fn should_call(&self, _connector: &CohortConnector) -> bool {
        // Every member gets a verdict, including the incompatible ones.
        true
    }

    fn call_member(
        &self,
        user_id: &str,
        connector: Arc<CohortConnector>,
    ) -> BoxFuture<'static, collection::Result<Vec<InstanceSummary>>> {
        let user = user_id.to_string();
        let type_name = self.type_name.clone();
        Box::pin(async move {
            if !connector.supports_type(&type_name) {
                return Err(RepositoryError::TypeMismatch {
                    member: connector.identity().collection_id.clone(),
                    type_name,
                });
            }
            let declared = connector.identity().collection_id.clone();
            let reported = connector.collection().metadata_collection_id(&user).await?;
            if reported != declared {
                return Err(RepositoryError::MalformedResponse {
                    member: declared,
                    message: format!("reported metadata collection id '{reported}'"),
                });
            }
            Ok(Vec::new())
        })
    }

    fn fold(&mut self, responder: &RepositoryIdentity, batch: Vec<InstanceSummary>) {
        self.state.absorb(responder, batch);
    }

    fn is_satisfied(&self) -> bool {
        false
    }

    fn finish(self) -> (Vec<InstanceSummary>, Vec<GuidConflict>) {
        self.state.into_parts(None)
    }
}
