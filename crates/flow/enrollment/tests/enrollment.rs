//! Enrolment end to end: CSR at the well-known session, certificate back to
//! the client, first interrogation, and the failure paths in between.

use ed25519_dalek::SigningKey;
use std::sync::Arc;
use std::thread;
use warden_enrollment::{
    register_flows, Certificate, CertificateMessage, CertificateType, Ed25519SigningOracle,
    Enroler, PlatformInfo, SigningOracle, SigningRequest, Subject, UserInfo,
};
use warden_flow_engine::{
    DispatchOutcome, FlowEngine, FlowRegistry, JournalFlowStore, QueueOutbox,
};
use warden_flow_types::{ClientId, ClientMessage, ClientRequest, FlowStatus, SessionId};
use warden_store::{attrs, AccessMode, ObjectStore, Token};

struct Harness {
    engine: FlowEngine,
    store: ObjectStore,
    outbox: Arc<QueueOutbox>,
    oracle: Arc<Ed25519SigningOracle>,
    enroler: Arc<Enroler>,
}

fn oracle() -> Arc<Ed25519SigningOracle> {
    Arc::new(
        Ed25519SigningOracle::from_key(
            SigningKey::from_bytes(&[9; 32]),
            Subject::new("Warden Test CA"),
        )
        .unwrap(),
    )
}

fn harness_with(store: ObjectStore, journal: Option<Arc<JournalFlowStore>>) -> Harness {
    let outbox = Arc::new(QueueOutbox::new());
    let oracle = oracle();
    let enroler = Arc::new(Enroler::default());
    let mut builder = FlowEngine::builder(register_flows(FlowRegistry::new()).unwrap(), store.clone())
        .with_service::<Arc<dyn SigningOracle>>(oracle.clone())
        .with_well_known(enroler.clone())
        .with_outbox(outbox.clone());
    if let Some(journal) = journal {
        builder = builder.with_persistence(journal);
    }
    Harness {
        engine: builder.build(),
        store,
        outbox,
        oracle,
        enroler,
    }
}

fn harness() -> Harness {
    harness_with(ObjectStore::in_memory(), None)
}

fn agent_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

fn csr_message(request: &SigningRequest, source: ClientId) -> ClientMessage {
    ClientMessage::unsolicited(
        SessionId::new("CA:Enrol"),
        source,
        CertificateMessage::csr(request.to_pem().unwrap()),
    )
    .unwrap()
}

/// A correct CSR for `key`, sent by the client it names.
fn enrol_message(key: &SigningKey) -> (ClientId, ClientMessage) {
    let request = SigningRequest::for_key(key).unwrap();
    let client_id = request.validate().unwrap();
    (client_id.clone(), csr_message(&request, client_id))
}

fn cert_versions(store: &ObjectStore, client_id: &ClientId) -> usize {
    store
        .open(&client_id.urn(), &Token::system(), AccessMode::Read)
        .map(|client| client.get_versions(attrs::CERT).len())
        .unwrap_or(0)
}

fn take_request(outbox: &QueueOutbox, action: &str) -> ClientRequest {
    let request = outbox.pop().expect("a request was sent");
    assert_eq!(request.action, action);
    request
}

// ── Happy Path ───────────────────────────────────────────────────────

#[test]
fn test_enrolment_issues_certificate_and_interrogates() {
    let h = harness();
    let (client_id, message) = enrol_message(&agent_key(1));

    assert_eq!(h.engine.dispatch(message), DispatchOutcome::WellKnown);
    assert!(h.enroler.is_cached(&client_id));

    let save = take_request(&h.outbox, "SaveCert");
    assert_eq!(save.client_id, client_id);
    assert_eq!(save.session_id.queue(), "CA");
    let crt: CertificateMessage = serde_json::from_value(save.args.clone()).unwrap();
    assert_eq!(crt.kind, CertificateType::Crt);
    let certificate = Certificate::from_pem(&crt.pem).unwrap();
    h.oracle.verify(&certificate).unwrap();
    assert_eq!(certificate.subject.common_name, client_id.as_str());

    let client = h
        .store
        .open(&client_id.urn(), &Token::system(), AccessMode::Read)
        .unwrap();
    assert_eq!(client.get(attrs::CERT).unwrap().to_text(), crt.pem);
    assert!(client.get(attrs::FIRST_SEEN).is_some());

    h.engine.dispatch(ClientMessage::reply(&save, "saved").unwrap());
    let enrol_state = h.engine.flow_state(&save.session_id).unwrap();
    assert_eq!(enrol_state.status, FlowStatus::Done);
    assert!(enrol_state
        .logs
        .iter()
        .any(|entry| entry.message == format!("Enrolled {} successfully", client_id)));

    let platform = take_request(&h.outbox, "GetPlatformInfo");
    let users = take_request(&h.outbox, "EnumerateUsers");
    assert_eq!(platform.session_id, users.session_id);
    assert_eq!(platform.session_id.queue(), "CA");
    let interrogate = platform.session_id.clone();
    assert_eq!(
        h.engine.flow_state(&interrogate).unwrap().parent,
        Some(save.session_id.clone())
    );

    let mut users_reply = ClientMessage::reply(
        &users,
        UserInfo {
            username: "alice".into(),
        },
    )
    .unwrap();
    users_reply.payloads.push(
        serde_json::to_value(UserInfo {
            username: "bob".into(),
        })
        .unwrap(),
    );
    h.engine.dispatch(users_reply);
    assert_eq!(
        h.engine.flow_state(&interrogate).unwrap().status,
        FlowStatus::Waiting
    );

    h.engine.dispatch(
        ClientMessage::reply(
            &platform,
            PlatformInfo {
                hostname: "web-01".into(),
                os_version: "6.1".into(),
                mac_address: Some("00:11:22:33:44:55".into()),
                install_date: None,
            },
        )
        .unwrap(),
    );
    assert_eq!(
        h.engine.flow_state(&interrogate).unwrap().status,
        FlowStatus::Done
    );

    let client = h
        .store
        .open(&client_id.urn(), &Token::system(), AccessMode::Read)
        .unwrap();
    assert_eq!(client.get(attrs::HOST).unwrap().to_text(), "web-01");
    assert_eq!(client.get(attrs::VERSION).unwrap().to_text(), "6.1");
    assert_eq!(client.get(attrs::MAC).unwrap().to_text(), "00:11:22:33:44:55");
    assert_eq!(client.get(attrs::USERNAMES).unwrap().to_text(), "alice bob");
    assert!(client.get(attrs::CLOCK).is_some());
    assert!(client.get(attrs::INSTALL).is_none());
    assert!(h.outbox.is_empty());
}

// ── Deduplication ────────────────────────────────────────────────────

#[test]
fn test_concurrent_csrs_start_one_enrolment() {
    let h = harness();
    let (client_id, message) = enrol_message(&agent_key(2));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = h.engine.clone();
            let message = message.clone();
            thread::spawn(move || engine.dispatch(message))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), DispatchOutcome::WellKnown);
    }

    let telemetry = h.store.telemetry();
    assert_eq!(telemetry.counter("flows_started"), 1);
    assert_eq!(telemetry.counter("enrolment_duplicates"), 7);
    assert_eq!(telemetry.counter("certificates_issued"), 1);
    assert_eq!(h.outbox.len(), 1);
    assert_eq!(cert_versions(&h.store, &client_id), 1);
}

#[test]
fn test_resent_csr_is_dropped_while_cached() {
    let h = harness();
    let (client_id, message) = enrol_message(&agent_key(3));

    h.engine.dispatch(message.clone());
    let save = take_request(&h.outbox, "SaveCert");
    h.engine.dispatch(ClientMessage::reply(&save, "saved").unwrap());
    h.outbox.drain();

    assert_eq!(h.engine.dispatch(message), DispatchOutcome::WellKnown);
    assert!(h.outbox.is_empty());
    assert_eq!(cert_versions(&h.store, &client_id), 1);
    assert_eq!(h.store.telemetry().counter("enrolment_duplicates"), 1);
}

#[test]
fn test_distinct_clients_enrol_independently() {
    let h = harness();
    let (first, a) = enrol_message(&agent_key(4));
    let (second, b) = enrol_message(&agent_key(5));
    assert_ne!(first, second);

    h.engine.dispatch(a);
    h.engine.dispatch(b);

    let sent = h.outbox.drain();
    assert_eq!(sent.len(), 2);
    assert_ne!(sent[0].session_id, sent[1].session_id);
    assert_eq!(h.enroler.cached(), 2);
}

// ── Rejections ───────────────────────────────────────────────────────

#[test]
fn test_cn_mismatch_is_rejected_without_side_effects() {
    let h = harness();
    let key = agent_key(6);
    let forged = SigningRequest::new(Subject::new("C.0123456789abcdef"), &key).unwrap();
    let claimed = ClientId::new("C.0123456789abcdef");

    let outcome = h.engine.dispatch(csr_message(&forged, claimed.clone()));
    assert!(matches!(outcome, DispatchOutcome::Rejected(ref reason) if reason.contains("does not match")));

    assert_eq!(h.enroler.cached(), 0);
    assert!(h.outbox.is_empty());
    assert!(h.engine.active_flows().is_empty());
    assert!(!h.store.exists(&claimed.urn()).unwrap());
    assert_eq!(h.store.telemetry().counter("flows_started"), 0);
}

#[test]
fn test_certificate_instead_of_csr_is_rejected() {
    let h = harness();
    let request = SigningRequest::for_key(&agent_key(7)).unwrap();
    let client_id = request.validate().unwrap();
    let message = ClientMessage::unsolicited(
        SessionId::new("CA:Enrol"),
        client_id,
        CertificateMessage::crt(request.to_pem().unwrap()),
    )
    .unwrap();

    assert!(matches!(
        h.engine.dispatch(message),
        DispatchOutcome::Rejected(_)
    ));
    assert_eq!(h.enroler.cached(), 0);
}

#[test]
fn test_csr_from_another_client_is_rejected() {
    let h = harness();
    let request = SigningRequest::for_key(&agent_key(8)).unwrap();
    let message = csr_message(&request, ClientId::new("C.ffffffffffffffff"));

    assert!(matches!(
        h.engine.dispatch(message),
        DispatchOutcome::Rejected(_)
    ));
    assert!(h.outbox.is_empty());
}

#[test]
fn test_failed_save_fails_the_enrolment() {
    let h = harness();
    let (_, message) = enrol_message(&agent_key(10));
    h.engine.dispatch(message);
    let save = take_request(&h.outbox, "SaveCert");

    h.engine
        .dispatch(ClientMessage::error_reply(&save, "read-only filesystem"));

    let state = h.engine.flow_state(&save.session_id).unwrap();
    assert!(matches!(state.status, FlowStatus::Failed { .. }));
    assert!(h.outbox.is_empty());
}

// ── Recovery ─────────────────────────────────────────────────────────

#[test]
fn test_enrolment_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flows.journal");
    let store = ObjectStore::in_memory();
    let (client_id, message) = enrol_message(&agent_key(11));

    let save = {
        let h = harness_with(
            store.clone(),
            Some(Arc::new(JournalFlowStore::open(&path).unwrap())),
        );
        h.engine.dispatch(message);
        take_request(&h.outbox, "SaveCert")
    };

    let h = harness_with(
        store,
        Some(Arc::new(JournalFlowStore::open(&path).unwrap())),
    );
    assert_eq!(h.engine.recover().unwrap(), 1);
    assert_eq!(
        h.engine.flow_state(&save.session_id).unwrap().status,
        FlowStatus::Waiting
    );

    h.engine.dispatch(ClientMessage::reply(&save, "saved").unwrap());
    assert_eq!(
        h.engine.flow_state(&save.session_id).unwrap().status,
        FlowStatus::Done
    );
    let follow_up = h.outbox.drain();
    assert_eq!(follow_up.len(), 2);
    assert!(follow_up.iter().all(|r| r.client_id == client_id));
    assert_eq!(cert_versions(&h.store, &client_id), 1);
}
