//! The object store: create, open, scan and commit.

use crate::backend::{Commit, MemoryBackend, PendingWrite, StoreBackend, StoredObject};
use crate::error::{StoreError, StoreResult};
use crate::handle::Aff4Object;
use crate::index::ClientIndex;
use crate::schema::{types, Schema, SchemaRegistry};
use crate::token::{AccessMode, AccessPolicy, AllowAll, Token};
use crate::urn::Urn;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use warden_telemetry::Telemetry;

/// URN-addressed, versioned object store. Cheap to clone.
#[derive(Clone)]
pub struct ObjectStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    backend: Arc<dyn StoreBackend>,
    policy: Arc<dyn AccessPolicy>,
    schemas: SchemaRegistry,
    index: ClientIndex,
    /// Parked writes, keyed by URN and the type of the handle that parked them.
    deferred: Mutex<HashMap<(Urn, String), Vec<PendingWrite>>>,
    telemetry: Arc<Telemetry>,
}

impl ObjectStore {
    pub fn builder() -> ObjectStoreBuilder {
        ObjectStoreBuilder::default()
    }

    /// Memory backend, built-in schemas, no access control.
    pub fn in_memory() -> Self {
        Self::builder().build()
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.inner.schemas
    }

    pub fn index(&self) -> &ClientIndex {
        &self.inner.index
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.inner.telemetry
    }

    /// Check `token` against `urn` without reading anything.
    pub fn authorize(&self, urn: &Urn, token: &Token, mode: AccessMode) -> StoreResult<()> {
        let result = self.inner.policy.check(urn, token, mode);
        if let Err(e) = &result {
            self.inner.telemetry.increment("store_access_denied");
            tracing::debug!(urn = %urn, user = %token.username, error = %e, "Access denied");
        }
        result
    }

    /// Open or allocate an object of `type_name`.
    pub fn create(
        &self,
        urn: &Urn,
        type_name: &str,
        mode: AccessMode,
        token: &Token,
    ) -> StoreResult<Aff4Object> {
        let schema = self.inner.schemas.get(type_name)?;
        self.authorize(urn, token, mode)?;

        let existing = self.inner.backend.load(urn)?;
        if let Some(object) = &existing {
            if object.type_name != type_name {
                return Err(StoreError::WrongType {
                    urn: urn.clone(),
                    expected: type_name.to_string(),
                    found: object.type_name.clone(),
                });
            }
        }

        Ok(Aff4Object::new(
            self.clone(),
            urn.clone(),
            schema,
            token.clone(),
            mode,
            existing,
        ))
    }

    /// Open an existing object. Rights are checked before existence, so an
    /// unauthorized caller cannot learn which URNs exist.
    pub fn open(&self, urn: &Urn, token: &Token, mode: AccessMode) -> StoreResult<Aff4Object> {
        self.authorize(urn, token, mode)?;
        let object = self
            .inner
            .backend
            .load(urn)?
            .ok_or_else(|| StoreError::NotFound(urn.clone()))?;
        let schema = self.inner.schemas.get(&object.type_name)?;
        Ok(Aff4Object::new(
            self.clone(),
            urn.clone(),
            schema,
            token.clone(),
            mode,
            Some(object),
        ))
    }

    /// Open an existing object and require it to be of `type_name`.
    pub fn open_as(
        &self,
        urn: &Urn,
        type_name: &str,
        token: &Token,
        mode: AccessMode,
    ) -> StoreResult<Aff4Object> {
        let handle = self.open(urn, token, mode)?;
        if handle.type_name() != type_name {
            return Err(StoreError::WrongType {
                urn: urn.clone(),
                expected: type_name.to_string(),
                found: handle.type_name().to_string(),
            });
        }
        Ok(handle)
    }

    pub fn exists(&self, urn: &Urn) -> StoreResult<bool> {
        Ok(self.inner.backend.load(urn)?.is_some())
    }

    pub fn children(&self, urn: &Urn) -> StoreResult<Vec<Urn>> {
        self.inner.backend.children(urn)
    }

    /// Lazily open every object of `type_name` readable by `token`.
    ///
    /// URNs are listed up front; each object is loaded only when the
    /// iterator reaches it. Objects the token may not read are skipped.
    pub fn scan(&self, type_name: &str, token: &Token) -> StoreResult<Scan> {
        self.inner.schemas.get(type_name)?;
        let urns = self.inner.backend.list(type_name)?;
        Ok(Scan {
            store: self.clone(),
            token: token.clone(),
            urns: urns.into_iter(),
        })
    }

    /// Commit every deferred write. Returns the number of objects committed.
    ///
    /// Writes that fail to commit stay parked; the first error is returned
    /// after every other object has been tried.
    pub fn flush_deferred(&self) -> StoreResult<usize> {
        let parked: Vec<(Urn, String)> = self.inner.deferred.lock().keys().cloned().collect();
        let mut committed = 0;
        let mut first_error = None;
        for (urn, type_name) in parked {
            match self.commit_writes(&urn, &type_name, &[], false) {
                Ok(Some(_)) => committed += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        urn = %urn,
                        type_name = %type_name,
                        error = %e,
                        "Deferred writes not committed"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(committed),
        }
    }

    /// Number of objects with deferred writes.
    pub fn deferred_len(&self) -> usize {
        self.inner.deferred.lock().len()
    }

    pub(crate) fn defer(&self, urn: &Urn, type_name: &str, writes: Vec<PendingWrite>) {
        self.inner
            .telemetry
            .add("store_deferred_writes", writes.len() as u64);
        self.park(urn, type_name, writes);
    }

    /// Park `writes` ahead of anything parked for the same object since.
    fn park(&self, urn: &Urn, type_name: &str, mut writes: Vec<PendingWrite>) {
        let mut deferred = self.inner.deferred.lock();
        let parked = deferred
            .entry((urn.clone(), type_name.to_string()))
            .or_default();
        writes.append(parked);
        *parked = writes;
    }

    /// Merge `writes`, and anything deferred for the URN under the same
    /// type, into the backend. Returns `None` when there was nothing to
    /// commit. On error the deferred writes are parked again and the
    /// caller still owns `writes`.
    pub(crate) fn commit_writes(
        &self,
        urn: &Urn,
        type_name: &str,
        writes: &[PendingWrite],
        create: bool,
    ) -> StoreResult<Option<StoredObject>> {
        let schema = self.inner.schemas.get(type_name)?;
        let parked = self
            .inner
            .deferred
            .lock()
            .remove(&(urn.clone(), type_name.to_string()))
            .unwrap_or_default();

        let mut all = parked.clone();
        all.extend_from_slice(writes);
        if all.is_empty() && !create {
            return Ok(None);
        }

        let versions = all.len();
        let validated: StoreResult<()> = all
            .iter()
            .try_for_each(|w| schema.validate(&w.attribute, &w.version.value).map(|_| ()));
        let result = validated.and_then(|()| {
            self.inner.backend.commit(Commit {
                urn: urn.clone(),
                type_name: type_name.to_string(),
                writes: all,
                committed_at: Utc::now(),
            })
        });
        let merged = match result {
            Ok(merged) => merged,
            Err(e) => {
                if !parked.is_empty() {
                    self.park(urn, type_name, parked);
                }
                self.inner.telemetry.increment("store_commit_errors");
                return Err(e);
            }
        };

        if merged.type_name == types::CLIENT {
            self.reindex(&merged)?;
        }

        self.inner.telemetry.increment("store_commits");
        self.inner
            .telemetry
            .add("store_versions_written", versions as u64);
        tracing::debug!(urn = %urn, type_name, versions, "Object committed");
        Ok(Some(merged))
    }

    fn reindex(&self, object: &StoredObject) -> StoreResult<()> {
        let schema = self.inner.schemas.get(&object.type_name)?;
        let mut keywords = BTreeSet::new();
        for spec in schema.attributes().filter(|s| s.indexed) {
            if let Some(latest) = object.history(&spec.name).and_then(|h| h.latest()) {
                keywords.extend(ClientIndex::keywords_for(&latest.value.to_text()));
            }
        }
        self.inner.index.update(&object.urn, keywords);
        Ok(())
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("schemas", &self.inner.schemas.names())
            .field("deferred", &self.deferred_len())
            .finish()
    }
}

/// Lazy iterator returned by [`ObjectStore::scan`].
pub struct Scan {
    store: ObjectStore,
    token: Token,
    urns: std::vec::IntoIter<Urn>,
}

impl Iterator for Scan {
    type Item = Aff4Object;

    fn next(&mut self) -> Option<Self::Item> {
        for urn in self.urns.by_ref() {
            match self.store.open(&urn, &self.token, AccessMode::Read) {
                Ok(handle) => return Some(handle),
                Err(StoreError::AccessDenied { .. }) | Err(StoreError::NotFound(_)) => continue,
                Err(e) => {
                    tracing::warn!(urn = %urn, error = %e, "Skipping unreadable object");
                    continue;
                }
            }
        }
        None
    }
}

/// Builder for [`ObjectStore`].
pub struct ObjectStoreBuilder {
    backend: Option<Arc<dyn StoreBackend>>,
    policy: Option<Arc<dyn AccessPolicy>>,
    schemas: SchemaRegistry,
    telemetry: Option<Arc<Telemetry>>,
}

impl Default for ObjectStoreBuilder {
    fn default() -> Self {
        Self {
            backend: None,
            policy: None,
            schemas: SchemaRegistry::with_builtins(),
            telemetry: None,
        }
    }
}

impl ObjectStoreBuilder {
    pub fn with_backend(mut self, backend: Arc<dyn StoreBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schemas.register(schema);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn build(self) -> ObjectStore {
        ObjectStore {
            inner: Arc::new(StoreInner {
                backend: self
                    .backend
                    .unwrap_or_else(|| Arc::new(MemoryBackend::new())),
                policy: self.policy.unwrap_or_else(|| Arc::new(AllowAll)),
                schemas: self.schemas,
                index: ClientIndex::new(),
                deferred: Mutex::new(HashMap::new()),
                telemetry: self.telemetry.unwrap_or_default(),
            }),
        }
    }
}
