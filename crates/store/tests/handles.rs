//! Handle buffering, deferral, access control and scanning.

use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use warden_store::{
    attrs, types, AccessMode, ApprovalPolicy, AttributeValue, Commit, MemoryBackend, ObjectStore,
    StoreBackend, StoreError, StoreResult, StoredObject, Token, Urn,
};
use warden_telemetry::Telemetry;

/// Memory backend whose next `failures` commits fail.
#[derive(Default)]
struct FlakyBackend {
    inner: MemoryBackend,
    failures: AtomicUsize,
}

impl StoreBackend for FlakyBackend {
    fn load(&self, urn: &Urn) -> StoreResult<Option<StoredObject>> {
        self.inner.load(urn)
    }

    fn commit(&self, commit: Commit) -> StoreResult<StoredObject> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Backend("disk full".into()));
        }
        self.inner.commit(commit)
    }

    fn list(&self, type_name: &str) -> StoreResult<Vec<Urn>> {
        self.inner.list(type_name)
    }

    fn children(&self, urn: &Urn) -> StoreResult<Vec<Urn>> {
        self.inner.children(urn)
    }
}

fn client_store() -> ObjectStore {
    ObjectStore::builder()
        .with_policy(Arc::new(ApprovalPolicy))
        .build()
}

#[test]
fn test_writes_invisible_to_other_handles_until_flush() {
    let store = ObjectStore::in_memory();
    let token = Token::system();
    let urn = Urn::new("C.1");
    store
        .create(&urn, types::CLIENT, AccessMode::Write, &token)
        .unwrap()
        .close()
        .unwrap();

    let mut writer = store.open(&urn, &token, AccessMode::ReadWrite).unwrap();
    writer.set(attrs::HOST, "alpha").unwrap();
    assert_eq!(writer.get(attrs::HOST), Some(AttributeValue::from("alpha")));

    let reader = store.open(&urn, &token, AccessMode::Read).unwrap();
    assert_eq!(reader.get(attrs::HOST), None);

    writer.close().unwrap();
    let reader = store.open(&urn, &token, AccessMode::Read).unwrap();
    assert_eq!(reader.get(attrs::HOST), Some(AttributeValue::from("alpha")));
}

#[test]
fn test_close_without_flush_defers_until_next_flush() {
    let store = ObjectStore::in_memory();
    let token = Token::system();
    let urn = Urn::new("C.2");
    store
        .create(&urn, types::CLIENT, AccessMode::Write, &token)
        .unwrap()
        .close()
        .unwrap();

    let mut handle = store.open(&urn, &token, AccessMode::Write).unwrap();
    handle.set(attrs::VERSION, "3.1").unwrap();
    handle.close_with(false).unwrap();
    assert_eq!(store.deferred_len(), 1);
    assert_eq!(
        store.open(&urn, &token, AccessMode::Read).unwrap().get(attrs::VERSION),
        None
    );

    let mut other = store.open(&urn, &token, AccessMode::Write).unwrap();
    other.set(attrs::MAC, "aa:bb").unwrap();
    other.close().unwrap();

    let reader = store.open(&urn, &token, AccessMode::Read).unwrap();
    assert_eq!(reader.get(attrs::VERSION), Some(AttributeValue::from("3.1")));
    assert_eq!(reader.get(attrs::MAC), Some(AttributeValue::from("aa:bb")));
    assert_eq!(store.deferred_len(), 0);
}

#[test]
fn test_dropped_handle_defers_and_flush_deferred_commits() {
    let store = ObjectStore::in_memory();
    let token = Token::system();
    let urn = Urn::new("C.3");
    {
        let mut handle = store.create(&urn, types::CLIENT, AccessMode::Write, &token).unwrap();
        handle.set(attrs::HOST, "gamma").unwrap();
    }
    assert!(matches!(
        store.open(&urn, &token, AccessMode::Read),
        Err(StoreError::NotFound(_))
    ));

    assert_eq!(store.flush_deferred().unwrap(), 1);
    let reader = store.open(&urn, &token, AccessMode::Read).unwrap();
    assert_eq!(reader.get(attrs::HOST), Some(AttributeValue::from("gamma")));
}

#[test]
fn test_deferred_writes_stay_with_their_type() {
    let store = ObjectStore::in_memory();
    let token = Token::system();
    let urn = Urn::new("C.00000000000000aa");

    let mut client = store.create(&urn, types::CLIENT, AccessMode::Write, &token).unwrap();
    client.set(attrs::HOST, "parked").unwrap();
    client.close_with(false).unwrap();

    let mut series = store
        .create(&urn, types::TIME_SERIES, AccessMode::Write, &token)
        .unwrap();
    series.set(attrs::SIZE, 1i64).unwrap();
    series.close().unwrap();

    let stored = store.open(&urn, &token, AccessMode::Read).unwrap();
    assert_eq!(stored.type_name(), types::TIME_SERIES);
    assert_eq!(stored.get(attrs::HOST), None);

    // The Client writes cannot land on a TimeSeries object and stay parked.
    assert_eq!(store.deferred_len(), 1);
    assert!(matches!(
        store.flush_deferred(),
        Err(StoreError::WrongType { .. })
    ));
    assert_eq!(store.deferred_len(), 1);
}

#[test]
fn test_failed_flush_keeps_writes_for_retry() {
    let backend = Arc::new(FlakyBackend::default());
    let store = ObjectStore::builder().with_backend(backend.clone()).build();
    let token = Token::system();
    let urn = Urn::new("C.00000000000000bb");
    store
        .create(&urn, types::CLIENT, AccessMode::Write, &token)
        .unwrap()
        .close()
        .unwrap();

    let mut parked = store.open(&urn, &token, AccessMode::Write).unwrap();
    parked.set(attrs::VERSION, "7.0").unwrap();
    parked.close_with(false).unwrap();

    let mut handle = store.open(&urn, &token, AccessMode::Write).unwrap();
    handle.set(attrs::HOST, "retry-me").unwrap();

    backend.failures.store(1, Ordering::SeqCst);
    assert!(matches!(handle.flush(), Err(StoreError::Backend(_))));
    assert!(handle.has_pending());
    assert_eq!(store.deferred_len(), 1);
    assert_eq!(store.telemetry().counter("store_commit_errors"), 1);

    handle.flush().unwrap();
    assert!(!handle.has_pending());
    assert_eq!(store.deferred_len(), 0);

    let reader = store.open(&urn, &token, AccessMode::Read).unwrap();
    assert_eq!(reader.get(attrs::HOST), Some(AttributeValue::from("retry-me")));
    assert_eq!(reader.get(attrs::VERSION), Some(AttributeValue::from("7.0")));
}

#[test]
fn test_create_unknown_type_and_undeclared_attribute() {
    let store = ObjectStore::in_memory();
    let token = Token::system();
    assert!(matches!(
        store.create(&Urn::new("x"), "Nope", AccessMode::Write, &token),
        Err(StoreError::UnknownType(_))
    ));

    let mut handle = store
        .create(&Urn::new("C.4"), types::CLIENT, AccessMode::Write, &token)
        .unwrap();
    assert!(matches!(
        handle.set("Color", "blue"),
        Err(StoreError::Schema { .. })
    ));
    handle.close().unwrap();
}

#[test]
fn test_read_only_handle_rejects_writes() {
    let store = ObjectStore::in_memory();
    let token = Token::system();
    let urn = Urn::new("C.5");
    store
        .create(&urn, types::CLIENT, AccessMode::Write, &token)
        .unwrap()
        .close()
        .unwrap();
    let mut handle = store.open(&urn, &token, AccessMode::Read).unwrap();
    assert!(matches!(handle.set(attrs::HOST, "x"), Err(StoreError::ReadOnly(_))));
}

#[test]
fn test_access_checked_before_existence() {
    let store = client_store();
    let analyst = Token::new("analyst", "case 1");

    let err = store
        .open(&Urn::new("C.9/acl_check"), &analyst, AccessMode::Read)
        .unwrap_err();
    assert!(matches!(err, StoreError::AccessDenied { .. }));

    let approved = analyst.with_approval("C.9");
    let err = store
        .open(&Urn::new("C.9/acl_check"), &approved, AccessMode::Read)
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    assert!(store
        .authorize(&Urn::new("C.9/acl_check"), &approved, AccessMode::Read)
        .is_ok());
}

#[test]
fn test_reference_time_reads_older_versions() {
    let store = ObjectStore::in_memory();
    let token = Token::system();
    let urn = Urn::new("C.6");
    let earlier = Utc::now() - Duration::hours(2);
    let later = Utc::now() - Duration::hours(1);

    let mut handle = store.create(&urn, types::CLIENT, AccessMode::Write, &token).unwrap();
    handle.set_at(attrs::HOST, "old-name", earlier).unwrap();
    handle.set_at(attrs::HOST, "new-name", later).unwrap();
    handle.close().unwrap();

    let now = store.open(&urn, &token, AccessMode::Read).unwrap();
    assert_eq!(now.get(attrs::HOST), Some(AttributeValue::from("new-name")));
    assert_eq!(now.get_versions(attrs::HOST).len(), 2);

    let then = store
        .open(&urn, &token, AccessMode::Read)
        .unwrap()
        .at(earlier + Duration::minutes(1));
    assert_eq!(then.get(attrs::HOST), Some(AttributeValue::from("old-name")));
    assert_eq!(then.get(attrs::SUBJECT), Some(AttributeValue::from("aff4:/C.6")));
    assert_eq!(then.get(attrs::TYPE), Some(AttributeValue::from("Client")));
}

#[test]
fn test_scan_is_lazy_and_skips_unreadable() {
    let telemetry = Arc::new(Telemetry::new());
    let store = ObjectStore::builder()
        .with_policy(Arc::new(ApprovalPolicy))
        .with_telemetry(telemetry.clone())
        .build();
    let system = Token::system();
    for id in ["C.a", "C.b", "C.c"] {
        let mut h = store
            .create(&Urn::new(id), types::CLIENT, AccessMode::Write, &system)
            .unwrap();
        h.set(attrs::HOST, id.to_lowercase()).unwrap();
        h.close().unwrap();
    }

    let mut scan = store.scan(types::CLIENT, &Token::new("analyst", "")).unwrap();
    let first = scan.next().unwrap();
    assert_eq!(first.urn(), &Urn::new("C.a"));
    assert_eq!(scan.count(), 2);

    let denied = store.scan(types::CLIENT, &Token::new("", "")).unwrap().count();
    assert_eq!(denied, 0);
    assert!(telemetry.counter("store_access_denied") >= 3);
    assert_eq!(telemetry.counter("store_commits"), 3);
}

#[test]
fn test_client_commit_updates_keyword_index() {
    let store = ObjectStore::in_memory();
    let token = Token::system();
    let urn = Urn::new("C.7");
    let mut handle = store.create(&urn, types::CLIENT, AccessMode::Write, &token).unwrap();
    handle.set(attrs::HOST, "Build-Server.corp").unwrap();
    handle.set(attrs::USERNAMES, "alice bob").unwrap();
    handle.close().unwrap();

    assert_eq!(store.index().lookup("build"), vec![urn.clone()]);
    assert_eq!(store.index().lookup("BOB"), vec![urn.clone()]);

    let mut handle = store.open(&urn, &token, AccessMode::Write).unwrap();
    handle.set(attrs::HOST, "renamed").unwrap();
    handle.close().unwrap();
    assert!(store.index().lookup("build").is_empty());
    assert_eq!(store.index().lookup("alice"), vec![urn]);
}
