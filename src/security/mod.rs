//! Authorization gate checked before any federated operation runs.
//!
//! This module contains:
//! - `AuthorizationGate` trait: platform/server/service/type/instance/asset
//!   level checks
//! - `OpenGate`: always-allow default for open deployments
//! - `PolicyGate`: delegates every check to an external policy decision
//!   point
//!
//! The gate is injected into the federation controller at construction -
//! there is no ambient lookup of a security connector per call site.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::instances::Guid;

/// Result type for authorization checks.
pub type Result<T> = std::result::Result<T, NotAuthorizedError>;

/// The caller lacks permission for an operation. Never retried; surfaced
/// to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("user '{user_id}' is not authorized to {operation}")]
pub struct NotAuthorizedError {
    pub user_id: String,
    pub operation: String,
}

impl NotAuthorizedError {
    pub fn new(user_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            operation: operation.into(),
        }
    }
}

/// What one federated run must be cleared for before any member is called.
///
/// Produced by the operation, consumed exactly once by the controller.
#[derive(Debug, Clone)]
pub struct AuthorizationScope {
    /// Service-level operation name, e.g. `"find-entities-by-property"`.
    pub service: &'static str,
    /// Type the request touches, when it names one.
    pub type_name: Option<String>,
}

/// Security connector enforcing platform-, server-, service-, type-,
/// instance- and asset-level permissions.
///
/// Every check either returns `Ok(())` (authorized) or fails with
/// `NotAuthorizedError`.
#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    async fn validate_platform_access(&self, user_id: &str) -> Result<()>;

    async fn validate_server_access(&self, user_id: &str, server_name: &str) -> Result<()>;

    async fn validate_service_access(&self, user_id: &str, service_name: &str) -> Result<()>;

    async fn validate_asset_access(&self, user_id: &str, asset_guid: &Guid) -> Result<()>;

    async fn validate_asset_change(&self, user_id: &str, asset_guid: &Guid) -> Result<()>;

    async fn validate_type_access(
        &self,
        user_id: &str,
        type_name: &str,
        server_name: &str,
    ) -> Result<()>;

    async fn validate_instance_access(
        &self,
        user_id: &str,
        instance_guid: &Guid,
        type_name: &str,
        server_name: &str,
    ) -> Result<()>;
}

/// Always-allow gate for open deployments (the default).
#[derive(Debug, Default, Clone)]
pub struct OpenGate;

#[async_trait]
impl AuthorizationGate for OpenGate {
    async fn validate_platform_access(&self, _user_id: &str) -> Result<()> {
        Ok(())
    }

    async fn validate_server_access(&self, _user_id: &str, _server_name: &str) -> Result<()> {
        Ok(())
    }

    async fn validate_service_access(&self, _user_id: &str, _service_name: &str) -> Result<()> {
        Ok(())
    }

    async fn validate_asset_access(&self, _user_id: &str, _asset_guid: &Guid) -> Result<()> {
        Ok(())
    }

    async fn validate_asset_change(&self, _user_id: &str, _asset_guid: &Guid) -> Result<()> {
        Ok(())
    }

    async fn validate_type_access(
        &self,
        _user_id: &str,
        _type_name: &str,
        _server_name: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn validate_instance_access(
        &self,
        _user_id: &str,
        _instance_guid: &Guid,
        _type_name: &str,
        _server_name: &str,
    ) -> Result<()> {
        Ok(())
    }
}

/// Outcome of an external policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// External policy decision point consumed as an opaque capability.
#[async_trait]
pub trait PolicyDecisionPoint: Send + Sync {
    /// Decide whether `user_id` may perform the described operation.
    async fn decide(&self, user_id: &str, descriptor: &str) -> Decision;
}

/// Gate that delegates every check to a policy decision point.
pub struct PolicyGate {
    policy: Arc<dyn PolicyDecisionPoint>,
}

impl PolicyGate {
    pub fn new(policy: Arc<dyn PolicyDecisionPoint>) -> Self {
        Self { policy }
    }

    async fn check(&self, user_id: &str, descriptor: String) -> Result<()> {
        match self.policy.decide(user_id, &descriptor).await {
            Decision::Allow => Ok(()),
            Decision::Deny => {
                debug!(user = %user_id, operation = %descriptor, "Policy denied access");
                Err(NotAuthorizedError::new(user_id, descriptor))
            }
        }
    }
}

#[async_trait]
impl AuthorizationGate for PolicyGate {
    async fn validate_platform_access(&self, user_id: &str) -> Result<()> {
        self.check(user_id, "access the platform".to_string()).await
    }

    async fn validate_server_access(&self, user_id: &str, server_name: &str) -> Result<()> {
        self.check(user_id, format!("issue requests to server {server_name}"))
            .await
    }

    async fn validate_service_access(&self, user_id: &str, service_name: &str) -> Result<()> {
        self.check(user_id, format!("issue {service_name} requests"))
            .await
    }

    async fn validate_asset_access(&self, user_id: &str, asset_guid: &Guid) -> Result<()> {
        self.check(user_id, format!("access asset {asset_guid}"))
            .await
    }

    async fn validate_asset_change(&self, user_id: &str, asset_guid: &Guid) -> Result<()> {
        self.check(user_id, format!("change asset {asset_guid}"))
            .await
    }

    async fn validate_type_access(
        &self,
        user_id: &str,
        type_name: &str,
        server_name: &str,
    ) -> Result<()> {
        self.check(
            user_id,
            format!("access type {type_name} on server {server_name}"),
        )
        .await
    }

    async fn validate_instance_access(
        &self,
        user_id: &str,
        instance_guid: &Guid,
        type_name: &str,
        server_name: &str,
    ) -> Result<()> {
        self.check(
            user_id,
            format!("access instance {instance_guid} of type {type_name} on server {server_name}"),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Denies a single user, allows everyone else.
    pub struct DenyUser(pub String);

    #[async_trait]
    impl PolicyDecisionPoint for DenyUser {
        async fn decide(&self, user_id: &str, _descriptor: &str) -> Decision {
            if user_id == self.0 {
                Decision::Deny
            } else {
                Decision::Allow
            }
        }
    }

    #[tokio::test]
    async fn test_open_gate_allows_everything() {
        let gate = OpenGate;
        gate.validate_platform_access("anyone").await.unwrap();
        gate.validate_service_access("anyone", "find-entity-by-guid")
            .await
            .unwrap();
        gate.validate_instance_access("anyone", &Guid::from("g1"), "Asset", "server")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_policy_gate_denies_listed_user() {
        let gate = PolicyGate::new(Arc::new(DenyUser("mallory".to_string())));

        gate.validate_service_access("alice", "find-entity-by-guid")
            .await
            .unwrap();

        let err = gate
            .validate_service_access("mallory", "find-entity-by-guid")
            .await
            .unwrap_err();
        assert_eq!(err.user_id, "mallory");
        assert!(err.operation.contains("find-entity-by-guid"));
    }
}
