//! Syndic facade - the caller-facing federation surface.
//!
//! One method per federated operation kind, taking the caller's user id
//! and typed parameters and returning a merged `FederationOutcome` or a
//! typed error. REST/CLI layers are thin clients of this type.
//!
//! # Example
//!
//! ```ignore
//! use syndic::config::Config;
//! use syndic::facade::Syndic;
//! use syndic::instances::Guid;
//!
//! let syndic = Syndic::open(Config::load(None)?);
//!
//! // Wire the cohort membership feed.
//! let notices = syndic.membership_feed(64);
//! notices.send(MembershipNotice::MemberJoined { connector }).await?;
//!
//! // Federate a point lookup.
//! let outcome = syndic.entity_by_guid("erinoverview", &Guid::from("...")).await?;
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::cohort::{spawn_membership_listener, CohortRegistry, MembershipNotice};
use crate::config::Config;
use crate::federation::{
    FederationController, FederationError, FederationOutcome, FederationRequest,
    FindEntitiesByProperty, FindEntityByGuid, RelationshipsForEntity, VerifyTypeSupport,
};
use crate::instances::{Guid, Paging, PropertyMatch};
use crate::security::{AuthorizationGate, OpenGate};

/// Single logical view over an open set of cohort member repositories.
pub struct Syndic {
    controller: FederationController,
    registry: Arc<CohortRegistry>,
    config: Config,
}

impl Syndic {
    /// Create a federation surface with the given authorization gate.
    pub fn new(config: Config, gate: Arc<dyn AuthorizationGate>) -> Self {
        let registry = Arc::new(CohortRegistry::new(
            config.federation.unreachable_after_timeouts,
        ));
        let controller = FederationController::new(
            registry.clone(),
            gate,
            config.federation.clone(),
            config.cohort.server_name.clone(),
        );
        Self {
            controller,
            registry,
            config,
        }
    }

    /// Create a federation surface in open mode (always-allow gate).
    pub fn open(config: Config) -> Self {
        Self::new(config, Arc::new(OpenGate))
    }

    /// The cohort registry, for wiring and inspection.
    pub fn registry(&self) -> Arc<CohortRegistry> {
        self.registry.clone()
    }

    /// Open a membership notice feed into the registry.
    ///
    /// Spawns the listener task; dropping the returned sender closes the
    /// feed and stops the listener.
    pub fn membership_feed(&self, capacity: usize) -> mpsc::Sender<MembershipNotice> {
        let (tx, rx) = mpsc::channel(capacity);
        spawn_membership_listener(self.registry.clone(), rx);
        tx
    }

    /// Find one entity by guid anywhere in the cohort.
    pub async fn entity_by_guid(
        &self,
        user_id: &str,
        guid: &Guid,
    ) -> Result<FederationOutcome, FederationError> {
        let request = FederationRequest::new(user_id);
        self.controller
            .run(&request, FindEntityByGuid::new(guid.clone()))
            .await
    }

    /// Search entities of one type by property criteria across the cohort.
    pub async fn entities_by_property(
        &self,
        user_id: &str,
        type_name: &str,
        criteria: PropertyMatch,
        page: Option<Paging>,
    ) -> Result<FederationOutcome, FederationError> {
        let request = FederationRequest::new(user_id);
        let page = page.unwrap_or_else(|| self.default_page());
        self.controller
            .run(&request, FindEntitiesByProperty::new(type_name, criteria, page))
            .await
    }

    /// Collect the relationships attached to an entity across the cohort.
    pub async fn relationships_for_entity(
        &self,
        user_id: &str,
        entity_guid: &Guid,
        relationship_type: Option<String>,
        page: Option<Paging>,
    ) -> Result<FederationOutcome, FederationError> {
        let request = FederationRequest::new(user_id);
        let page = page.unwrap_or_else(|| self.default_page());
        self.controller
            .run(
                &request,
                RelationshipsForEntity::new(entity_guid.clone(), relationship_type, page),
            )
            .await
    }

    /// Validate type compatibility across the whole cohort.
    ///
    /// `reached_members` counts the compatible, reachable members;
    /// incompatible members appear in `member_errors` as `TypeMismatch`.
    pub async fn verify_type_support(
        &self,
        user_id: &str,
        type_name: &str,
    ) -> Result<FederationOutcome, FederationError> {
        let request = FederationRequest::new(user_id);
        self.controller
            .run(&request, VerifyTypeSupport::new(type_name))
            .await
    }

    fn default_page(&self) -> Paging {
        Paging::first(self.config.federation.default_page_limit)
    }
}
