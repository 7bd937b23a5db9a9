//! Persistence backends for committed objects.
//!
//! The store hands a backend fully validated [`Commit`]s; a backend only
//! merges versions and answers lookups. [`MemoryBackend`] is the reference
//! implementation and what the daemon runs with today.

use crate::attribute::{AttributeHistory, AttributeVersion};
use crate::error::{StoreError, StoreResult};
use crate::urn::Urn;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An object as persisted: type plus every retained attribute version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub urn: Urn,
    pub type_name: String,
    pub attributes: BTreeMap<String, AttributeHistory>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredObject {
    pub fn new(urn: Urn, type_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            urn,
            type_name: type_name.into(),
            attributes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn history(&self, attribute: &str) -> Option<&AttributeHistory> {
        self.attributes.get(attribute)
    }
}

/// A buffered write waiting for commit.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingWrite {
    pub attribute: String,
    pub version: AttributeVersion,
    /// Retention for the attribute; `None` keeps all versions.
    pub history: Option<usize>,
}

/// One atomic merge into a single object.
#[derive(Clone, Debug)]
pub struct Commit {
    pub urn: Urn,
    pub type_name: String,
    pub writes: Vec<PendingWrite>,
    pub committed_at: DateTime<Utc>,
}

/// Storage for committed objects.
pub trait StoreBackend: Send + Sync {
    fn load(&self, urn: &Urn) -> StoreResult<Option<StoredObject>>;

    /// Merge `commit` into the stored object, creating it if needed, and
    /// return the merged result.
    fn commit(&self, commit: Commit) -> StoreResult<StoredObject>;

    /// URNs of every object of `type_name`, in URN order.
    fn list(&self, type_name: &str) -> StoreResult<Vec<Urn>>;

    /// Direct children of `urn` that hold objects.
    fn children(&self, urn: &Urn) -> StoreResult<Vec<Urn>>;
}

/// In-memory backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<Urn, StoredObject>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl StoreBackend for MemoryBackend {
    fn load(&self, urn: &Urn) -> StoreResult<Option<StoredObject>> {
        Ok(self.objects.read().get(urn).cloned())
    }

    fn commit(&self, commit: Commit) -> StoreResult<StoredObject> {
        let mut objects = self.objects.write();
        let object = objects
            .entry(commit.urn.clone())
            .or_insert_with(|| StoredObject::new(commit.urn.clone(), &commit.type_name, commit.committed_at));

        if object.type_name != commit.type_name {
            return Err(StoreError::WrongType {
                urn: commit.urn,
                expected: commit.type_name,
                found: object.type_name.clone(),
            });
        }

        for write in commit.writes {
            let history = object.attributes.entry(write.attribute).or_default();
            history.insert(write.version);
            if let Some(limit) = write.history {
                history.retain_latest(limit);
            }
        }
        object.updated_at = commit.committed_at;
        Ok(object.clone())
    }

    fn list(&self, type_name: &str) -> StoreResult<Vec<Urn>> {
        Ok(self
            .objects
            .read()
            .values()
            .filter(|o| o.type_name == type_name)
            .map(|o| o.urn.clone())
            .collect())
    }

    fn children(&self, urn: &Urn) -> StoreResult<Vec<Urn>> {
        Ok(self
            .objects
            .read()
            .keys()
            .filter(|candidate| candidate.parent().as_ref() == Some(urn))
            .cloned()
            .collect())
    }
}
