//! Scripted in-memory MetadataCollection for testing.
//!
//! Supports seeded instances and relationships, injected failures, and an
//! artificial response delay so federation timing behavior (timeouts,
//! early stop, cancellation) can be exercised without a real member.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::instances::{Guid, InstanceSummary, Paging, PropertyMatch};

use super::{MetadataCollection, RepositoryError, RepositoryErrorKind, Result};

/// In-memory metadata collection with scripted behavior.
pub struct ScriptedCollection {
    collection_id: String,
    entities: RwLock<HashMap<Guid, InstanceSummary>>,
    relationships: RwLock<HashMap<Guid, Vec<InstanceSummary>>>,
    delay: RwLock<Option<Duration>>,
    fail_with: RwLock<Option<RepositoryErrorKind>>,
    calls: AtomicUsize,
}

impl ScriptedCollection {
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            entities: RwLock::new(HashMap::new()),
            relationships: RwLock::new(HashMap::new()),
            delay: RwLock::new(None),
            fail_with: RwLock::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Seed an entity the collection will answer with.
    pub async fn seed_entity(&self, entity: InstanceSummary) {
        let mut entities = self.entities.write().await;
        entities.insert(entity.guid.clone(), entity);
    }

    /// Seed a relationship attached to the given entity.
    pub async fn seed_relationship(&self, entity: &Guid, relationship: InstanceSummary) {
        let mut relationships = self.relationships.write().await;
        relationships
            .entry(entity.clone())
            .or_default()
            .push(relationship);
    }

    /// Delay every response by the given duration.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    /// Fail every call with the given error kind.
    pub async fn set_fail_with(&self, kind: RepositoryErrorKind) {
        *self.fail_with.write().await = Some(kind);
    }

    /// Number of federated calls this collection has answered or failed.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter_call(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fail = *self.fail_with.read().await;
        match fail {
            None => Ok(()),
            Some(kind) => Err(self.scripted_error(kind)),
        }
    }

    fn scripted_error(&self, kind: RepositoryErrorKind) -> RepositoryError {
        let member = self.collection_id.clone();
        match kind {
            RepositoryErrorKind::Timeout => RepositoryError::Timeout {
                member,
                timeout_ms: 0,
            },
            RepositoryErrorKind::Unreachable => RepositoryError::Unreachable {
                member,
                message: "scripted failure".to_string(),
            },
            RepositoryErrorKind::NotFound => RepositoryError::NotFound {
                member,
                guid: Guid::from("scripted"),
            },
            RepositoryErrorKind::MalformedResponse => RepositoryError::MalformedResponse {
                member,
                message: "scripted failure".to_string(),
            },
            RepositoryErrorKind::TypeMismatch => RepositoryError::TypeMismatch {
                member,
                type_name: "scripted".to_string(),
            },
        }
    }
}

#[async_trait]
impl MetadataCollection for ScriptedCollection {
    async fn metadata_collection_id(&self, _user_id: &str) -> Result<String> {
        self.enter_call().await?;
        Ok(self.collection_id.clone())
    }

    async fn entity_detail(&self, _user_id: &str, guid: &Guid) -> Result<InstanceSummary> {
        self.enter_call().await?;
        let entities = self.entities.read().await;
        entities
            .get(guid)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound {
                member: self.collection_id.clone(),
                guid: guid.clone(),
            })
    }

    async fn entities_by_property(
        &self,
        _user_id: &str,
        type_name: &str,
        criteria: &PropertyMatch,
        paging: Paging,
    ) -> Result<Vec<InstanceSummary>> {
        self.enter_call().await?;
        let entities = self.entities.read().await;
        let mut hits: Vec<InstanceSummary> = entities
            .values()
            .filter(|e| e.type_name == type_name && criteria.matches(e))
            .cloned()
            .collect();
        // HashMap iteration order is arbitrary; sort for stable paging.
        hits.sort_by(|a, b| a.guid.cmp(&b.guid));
        Ok(hits
            .into_iter()
            .skip(paging.offset)
            .take(paging.limit)
            .collect())
    }

    async fn relationships_for_entity(
        &self,
        _user_id: &str,
        guid: &Guid,
        relationship_type: Option<&str>,
    ) -> Result<Vec<InstanceSummary>> {
        self.enter_call().await?;
        let relationships = self.relationships.read().await;
        let attached = relationships.get(guid).cloned().unwrap_or_default();
        Ok(match relationship_type {
            None => attached,
            Some(type_name) => attached
                .into_iter()
                .filter(|r| r.type_name == type_name)
                .collect(),
        })
    }
}
