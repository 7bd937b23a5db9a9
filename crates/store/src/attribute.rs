//! Timestamped attribute versions.

use crate::value::AttributeValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One version of an attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeVersion {
    pub value: AttributeValue,
    pub timestamp: DateTime<Utc>,
}

impl AttributeVersion {
    pub fn new(value: AttributeValue, timestamp: DateTime<Utc>) -> Self {
        Self { value, timestamp }
    }
}

/// All retained versions of one attribute, ascending by timestamp.
///
/// Versions are inserted at the upper bound of their timestamp, so writers
/// may arrive in any order and equal timestamps keep arrival order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeHistory(Vec<AttributeVersion>);

impl AttributeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, version: AttributeVersion) {
        let pos = self
            .0
            .partition_point(|existing| existing.timestamp <= version.timestamp);
        self.0.insert(pos, version);
    }

    /// Drop the oldest versions so at most `limit` remain.
    pub fn retain_latest(&mut self, limit: usize) {
        if self.0.len() > limit {
            let excess = self.0.len() - limit;
            self.0.drain(..excess);
        }
    }

    pub fn latest(&self) -> Option<&AttributeVersion> {
        self.0.last()
    }

    /// Version with the greatest timestamp not after `at`.
    pub fn latest_at(&self, at: DateTime<Utc>) -> Option<&AttributeVersion> {
        let pos = self.0.partition_point(|v| v.timestamp <= at);
        pos.checked_sub(1).map(|i| &self.0[i])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AttributeVersion> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<AttributeVersion> {
        self.0
    }
}

impl FromIterator<AttributeVersion> for AttributeHistory {
    fn from_iter<I: IntoIterator<Item = AttributeVersion>>(iter: I) -> Self {
        let mut history = Self::new();
        for version in iter {
            history.insert(version);
        }
        history
    }
}
