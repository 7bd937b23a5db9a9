//! Open handles on store objects.

use crate::attribute::{AttributeHistory, AttributeVersion};
use crate::backend::{PendingWrite, StoredObject};
use crate::error::{StoreError, StoreResult};
use crate::object_store::ObjectStore;
use crate::schema::{attrs, Schema};
use crate::token::{AccessMode, Token};
use crate::urn::Urn;
use crate::value::AttributeValue;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A live view of one object, bound to the token it was opened with.
///
/// Writes are buffered in the handle and are visible through it right
/// away, but other handles only see them once this one is flushed.
/// Closing with `flush = false`, or dropping the handle with buffered
/// writes, parks them in the store until the next flush of the same URN
/// through a handle of the same type, or [`ObjectStore::flush_deferred`].
pub struct Aff4Object {
    store: ObjectStore,
    urn: Urn,
    schema: Arc<Schema>,
    token: Token,
    mode: AccessMode,
    committed: Option<StoredObject>,
    pending: Vec<PendingWrite>,
    reference_time: Option<DateTime<Utc>>,
}

impl Aff4Object {
    pub(crate) fn new(
        store: ObjectStore,
        urn: Urn,
        schema: Arc<Schema>,
        token: Token,
        mode: AccessMode,
        committed: Option<StoredObject>,
    ) -> Self {
        Self {
            store,
            urn,
            schema,
            token,
            mode,
            committed,
            pending: Vec::new(),
            reference_time: None,
        }
    }

    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn type_name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// True until the object has been committed at least once.
    pub fn is_new(&self) -> bool {
        self.committed.is_none()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Read values as of `time` instead of now.
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.reference_time = Some(time);
        self
    }

    /// Current value of `name`: the version with the greatest timestamp
    /// not after the reference time.
    pub fn get(&self, name: &str) -> Option<AttributeValue> {
        self.get_at(name, self.reference_time.unwrap_or_else(Utc::now))
    }

    pub fn get_at(&self, name: &str, at: DateTime<Utc>) -> Option<AttributeValue> {
        match name {
            attrs::SUBJECT => return Some(AttributeValue::String(self.urn.to_string())),
            attrs::TYPE => return Some(AttributeValue::String(self.schema.name.clone())),
            _ => {}
        }

        let committed = self
            .committed
            .as_ref()
            .and_then(|o| o.history(name))
            .and_then(|h| h.latest_at(at));
        let buffered = self
            .pending
            .iter()
            .filter(|w| w.attribute == name && w.version.timestamp <= at)
            .max_by_key(|w| w.version.timestamp)
            .map(|w| &w.version);

        match (committed, buffered) {
            (Some(c), Some(b)) if c.timestamp > b.timestamp => Some(c.value.clone()),
            (_, Some(b)) => Some(b.value.clone()),
            (Some(c), None) => Some(c.value.clone()),
            (None, None) => None,
        }
    }

    /// Every retained version of `name`, committed and buffered, ascending by timestamp.
    pub fn get_versions(&self, name: &str) -> Vec<AttributeVersion> {
        let mut history = self
            .committed
            .as_ref()
            .and_then(|o| o.history(name))
            .cloned()
            .unwrap_or_else(AttributeHistory::new);
        for write in self.pending.iter().filter(|w| w.attribute == name) {
            history.insert(write.version.clone());
        }
        history.into_vec()
    }

    /// Buffer a new version of `name` stamped now.
    pub fn set(&mut self, name: &str, value: impl Into<AttributeValue>) -> StoreResult<()> {
        self.set_at(name, value, Utc::now())
    }

    /// Buffer a new version of `name` with an explicit timestamp.
    pub fn set_at(
        &mut self,
        name: &str,
        value: impl Into<AttributeValue>,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()> {
        if !self.mode.can_write() {
            return Err(StoreError::ReadOnly(self.urn.clone()));
        }
        let value = value.into();
        let spec = self.schema.validate(name, &value)?;
        let history = spec.history();
        self.pending.push(PendingWrite {
            attribute: name.to_string(),
            version: AttributeVersion::new(value, timestamp),
            history,
        });
        Ok(())
    }

    /// Commit buffered versions, together with any writes parked for this
    /// URN under the same type. On error the buffered versions stay in the
    /// handle, so the flush can be retried.
    pub fn flush(&mut self) -> StoreResult<()> {
        let create = self.is_new() && self.mode.can_write();
        if let Some(merged) =
            self.store
                .commit_writes(&self.urn, &self.schema.name, &self.pending, create)?
        {
            self.committed = Some(merged);
        }
        self.pending.clear();
        Ok(())
    }

    /// Close and commit.
    pub fn close(self) -> StoreResult<()> {
        self.close_with(true)
    }

    /// Close; with `flush = false` buffered writes are deferred, not lost.
    pub fn close_with(mut self, flush: bool) -> StoreResult<()> {
        if flush {
            self.flush()
        } else {
            self.park_pending();
            Ok(())
        }
    }

    fn park_pending(&mut self) {
        let writes = std::mem::take(&mut self.pending);
        if !writes.is_empty() {
            self.store.defer(&self.urn, &self.schema.name, writes);
        }
    }
}

impl Drop for Aff4Object {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                urn = %self.urn,
                writes = self.pending.len(),
                "Handle dropped with unflushed writes; deferring"
            );
            self.park_pending();
        }
    }
}

impl std::fmt::Debug for Aff4Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aff4Object")
            .field("urn", &self.urn)
            .field("type", &self.schema.name)
            .field("mode", &self.mode)
            .field("pending", &self.pending.len())
            .finish()
    }
}
