//! Metadata instance model shared by every cohort member.
//!
//! These are the projections members return from federated calls:
//! entity/relationship summaries, lightweight entity proxies, and the
//! property match criteria used by searches. All types are plain data -
//! no I/O, no member-specific detail.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally-intended unique identifier minted by an instance's home repository.
///
/// Uniqueness is a convention of the minting member, not an enforced
/// guarantee - two members may report the same guid with different content,
/// which the federation layer records as a conflict.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(String);

impl Guid {
    /// Wrap an existing identifier string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Mint a fresh v4 UUID guid.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Guid {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle status of a metadata instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    Active,
    Deleted,
    Proposed,
    Draft,
    Unknown,
}

/// A single typed property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyValue {
    Text(String),
    Int(i64),
    Float(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Json(serde_json::Value),
}

/// Ordered name -> value mapping. BTreeMap keeps property ordering stable
/// across members so equality and conflict detection are deterministic.
pub type InstanceProperties = BTreeMap<String, PropertyValue>;

/// Entity or relationship projection returned by one cohort member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub guid: Guid,
    pub type_name: String,
    pub status: InstanceStatus,
    pub properties: InstanceProperties,
    /// Metadata collection id of the repository that owns this instance.
    pub home_collection_id: String,
    pub version: i64,
    pub update_time: Option<DateTime<Utc>>,
}

impl InstanceSummary {
    /// Create an active instance with no properties.
    pub fn new(guid: Guid, type_name: impl Into<String>, home: impl Into<String>) -> Self {
        Self {
            guid,
            type_name: type_name.into(),
            status: InstanceStatus::Active,
            properties: InstanceProperties::new(),
            home_collection_id: home.into(),
            version: 1,
            update_time: None,
        }
    }

    /// Builder-style property attachment.
    pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }
}

/// Minimal reference to an entity, used as a relationship endpoint without
/// requiring the full entity body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityProxy {
    pub guid: Guid,
    pub type_name: String,
    pub home_collection_id: String,
}

impl EntityProxy {
    pub fn from_summary(summary: &InstanceSummary) -> Self {
        Self {
            guid: summary.guid.clone(),
            type_name: summary.type_name.clone(),
            home_collection_id: summary.home_collection_id.clone(),
        }
    }
}

/// How a set of match properties combines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchCriteria {
    /// Every listed property must match.
    #[default]
    All,
    /// At least one listed property must match.
    Any,
    /// No listed property may match.
    None,
}

/// Property search criteria for find-entities-by-property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyMatch {
    pub properties: InstanceProperties,
    pub criteria: MatchCriteria,
}

impl PropertyMatch {
    pub fn new(criteria: MatchCriteria) -> Self {
        Self {
            properties: InstanceProperties::new(),
            criteria,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Check an instance against these criteria.
    ///
    /// An empty property map matches every instance, whatever the criteria.
    pub fn matches(&self, instance: &InstanceSummary) -> bool {
        if self.properties.is_empty() {
            return true;
        }
        let hits = self
            .properties
            .iter()
            .filter(|(name, value)| instance.properties.get(*name) == Some(value))
            .count();
        match self.criteria {
            MatchCriteria::All => hits == self.properties.len(),
            MatchCriteria::Any => hits > 0,
            MatchCriteria::None => hits == 0,
        }
    }
}

/// Page window for bounded searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    pub offset: usize,
    pub limit: usize,
}

impl Paging {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// First page with the given limit.
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }
}

/// Whether two reports of the same guid disagree on content.
///
/// Version, status, type or property differences all count; the caller is
/// expected to have already matched on guid.
pub fn content_differs(a: &InstanceSummary, b: &InstanceSummary) -> bool {
    a.version != b.version
        || a.status != b.status
        || a.type_name != b.type_name
        || a.properties != b.properties
}
