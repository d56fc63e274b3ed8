//! Metadata collection capability contract.
//!
//! This module contains:
//! - `MetadataCollection` trait: the calls every repository (local or
//!   remote) must answer for federation
//! - `RepositoryError`: per-member failures, recorded rather than thrown
//!   across the fan-out boundary
//! - `mock::ScriptedCollection`: in-memory implementation for tests and
//!   standalone development

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::instances::{Guid, InstanceSummary, Paging, PropertyMatch};

pub mod mock;

pub use mock::ScriptedCollection;

/// Result type for collection operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Errors one cohort member can return from a federated call.
///
/// These never abort a federation run; the controller records them per
/// member and keeps going.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("member '{member}' timed out after {timeout_ms}ms")]
    Timeout { member: String, timeout_ms: u64 },

    #[error("member '{member}' is unreachable: {message}")]
    Unreachable { member: String, message: String },

    #[error("instance '{guid}' not found in collection '{member}'")]
    NotFound { member: String, guid: Guid },

    #[error("member '{member}' returned a malformed response: {message}")]
    MalformedResponse { member: String, message: String },

    #[error("member '{member}' does not support type '{type_name}'")]
    TypeMismatch { member: String, type_name: String },
}

impl RepositoryError {
    /// The error kind, for per-member error maps.
    pub fn kind(&self) -> RepositoryErrorKind {
        match self {
            Self::Timeout { .. } => RepositoryErrorKind::Timeout,
            Self::Unreachable { .. } => RepositoryErrorKind::Unreachable,
            Self::NotFound { .. } => RepositoryErrorKind::NotFound,
            Self::MalformedResponse { .. } => RepositoryErrorKind::MalformedResponse,
            Self::TypeMismatch { .. } => RepositoryErrorKind::TypeMismatch,
        }
    }
}

/// Discriminant of `RepositoryError`, kept in federation outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepositoryErrorKind {
    Timeout,
    Unreachable,
    NotFound,
    MalformedResponse,
    TypeMismatch,
}

/// Capability contract every repository exposes to the federation layer.
///
/// Implementations wrap whatever persistence and transport the member
/// actually uses; the federation layer only sees these four calls. Every
/// call may block on network I/O and may fail with a `RepositoryError`.
#[async_trait]
pub trait MetadataCollection: Send + Sync {
    /// The unique metadata collection id of this repository.
    async fn metadata_collection_id(&self, user_id: &str) -> Result<String>;

    /// Fetch a single entity by guid. `NotFound` when the member does not
    /// hold the instance.
    async fn entity_detail(&self, user_id: &str, guid: &Guid) -> Result<InstanceSummary>;

    /// Search entities of one type by property criteria, bounded by paging.
    async fn entities_by_property(
        &self,
        user_id: &str,
        type_name: &str,
        criteria: &PropertyMatch,
        paging: Paging,
    ) -> Result<Vec<InstanceSummary>>;

    /// Relationships attached to an entity, optionally filtered by
    /// relationship type name.
    async fn relationships_for_entity(
        &self,
        user_id: &str,
        guid: &Guid,
        relationship_type: Option<&str>,
    ) -> Result<Vec<InstanceSummary>>;
}
