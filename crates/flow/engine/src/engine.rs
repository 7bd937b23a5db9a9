//! The flow engine: starts instances, routes replies to them, and keeps
//! their state durable.
//!
//! Each instance sits behind its own mutex, so at most one of its handlers
//! runs at a time while different instances proceed in parallel. A dispatch
//! round runs the target state plus any direct transitions it requests,
//! persists the resulting [`FlowState`], and only then hands new requests
//! to the [`ClientOutbox`] and starts child flows.

use crate::config::EngineConfig;
use crate::flow::{Effects, FlowContext, FlowLaunch};
use crate::outbox::{ClientOutbox, QueueOutbox};
use crate::persistence::{FlowStateStore, MemoryFlowStore};
use crate::registry::{ErasedFlow, FlowRegistry};
use crate::services::Services;
use crate::timeout::{TimeoutDecision, TimeoutPolicy};
use crate::well_known::{FlowLauncher, WellKnownFlow};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use warden_cache::FastStore;
use warden_flow_types::{
    ClientMessage, ClientRequest, FlowError, FlowResult, FlowState, FlowStatus,
    OutstandingRequest, Responses, SessionId, START_STATE,
};
use warden_store::ObjectStore;
use warden_telemetry::Telemetry;

/// Why a message was not delivered to any flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// No live or recently finished instance has this session id.
    UnknownSession,
    /// Replies to flow instances must carry a request id.
    MissingRequestId,
    /// The request was already answered, or never issued.
    UnknownRequest,
    /// The instance has finished.
    Finished,
    /// The reply did not come from the client the request was sent to.
    WrongSource,
}

/// What happened to one inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    /// Handled by a well-known flow.
    WellKnown,
    /// A well-known flow rejected the message.
    Rejected(String),
    /// Routed to an instance, which resumed in `state`.
    Delivered { session_id: SessionId, state: String },
    Dropped(DropReason),
}

/// Work left over once a round has been persisted.
#[derive(Default)]
struct RoundOutput {
    sends: Vec<ClientRequest>,
    launches: Vec<FlowLaunch>,
}

type Instance = Arc<Mutex<FlowState>>;

struct EngineInner {
    registry: FlowRegistry,
    well_known: HashMap<SessionId, Arc<dyn WellKnownFlow>>,
    instances: DashMap<SessionId, Instance>,
    archive: FastStore<SessionId, FlowState>,
    persistence: Arc<dyn FlowStateStore>,
    outbox: Arc<dyn ClientOutbox>,
    store: ObjectStore,
    telemetry: Arc<Telemetry>,
    services: Arc<Services>,
    timeouts: TimeoutPolicy,
    config: EngineConfig,
}

/// Runs flow instances. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FlowEngine {
    inner: Arc<EngineInner>,
}

impl FlowEngine {
    pub fn builder(registry: FlowRegistry, store: ObjectStore) -> FlowEngineBuilder {
        FlowEngineBuilder {
            registry,
            store,
            well_known: Vec::new(),
            outbox: None,
            persistence: None,
            telemetry: None,
            services: Services::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn registry(&self) -> &FlowRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ── Starting Flows ───────────────────────────────────────────────

    /// Create an instance and run its `Start` state.
    ///
    /// Fails only if the flow type is unknown. A failing `Start` handler is
    /// recorded on the instance, which is still returned.
    pub fn start(&self, launch: FlowLaunch) -> FlowResult<SessionId> {
        self.inner.registry.get(&launch.flow_name)?;

        let session_id = loop {
            let candidate = SessionId::generate(&launch.queue);
            if !self.inner.instances.contains_key(&candidate)
                && !self.inner.archive.contains(&candidate)
            {
                break candidate;
            }
        };

        let mut state = FlowState::new(
            session_id.clone(),
            launch.flow_name,
            launch.data,
            launch.token,
        );
        state.client_id = launch.client_id;
        state.parent = launch.parent;

        let instance: Instance = Arc::new(Mutex::new(state));
        let mut guard = instance.lock();
        self.inner
            .instances
            .insert(session_id.clone(), instance.clone());
        self.inner.telemetry.increment("flows_started");
        info!(
            session_id = %session_id,
            flow = %guard.flow_name,
            client_id = ?guard.client_id.as_ref().map(|c| c.to_string()),
            "Flow started"
        );

        let output = self.advance(&mut guard, START_STATE.to_string(), Responses::empty());
        let terminal = self.archive_if_finished(&guard);
        drop(guard);

        self.finish_round(&session_id, terminal, output);
        Ok(session_id)
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Deliver one inbound message. Never fails: problems are recorded on
    /// the affected flow, logged, and counted.
    pub fn dispatch(&self, message: ClientMessage) -> DispatchOutcome {
        if let Some(handler) = self.inner.well_known.get(&message.session_id) {
            return self.dispatch_well_known(handler.as_ref(), &message);
        }

        let instance = self
            .inner
            .instances
            .get(&message.session_id)
            .map(|entry| entry.value().clone());
        let Some(instance) = instance else {
            let reason = if self.inner.archive.contains(&message.session_id) {
                DropReason::Finished
            } else {
                DropReason::UnknownSession
            };
            return self.drop_message(&message, reason);
        };
        let Some(request_id) = message.request_id else {
            return self.drop_message(&message, DropReason::MissingRequestId);
        };

        let mut guard = instance.lock();
        if guard.is_terminal() {
            drop(guard);
            return self.drop_message(&message, DropReason::Finished);
        }
        let expected = match guard.outstanding.get(&request_id) {
            Some(outstanding) => outstanding.request.client_id.clone(),
            None => {
                drop(guard);
                return self.drop_message(&message, DropReason::UnknownRequest);
            }
        };
        if message.source.as_ref() != Some(&expected) {
            drop(guard);
            self.inner.telemetry.increment("replies_wrong_source");
            warn!(
                session_id = %message.session_id,
                request_id = %request_id,
                expected = %expected,
                source = ?message.source.as_ref().map(|s| s.to_string()),
                "Reply from a client the request was not sent to"
            );
            return self.drop_message(&message, DropReason::WrongSource);
        }
        let Some(outstanding) = guard.outstanding.remove(&request_id) else {
            drop(guard);
            return self.drop_message(&message, DropReason::UnknownRequest);
        };

        self.inner.telemetry.increment("replies_routed");
        let next_state = outstanding.request.next_state.clone();
        debug!(
            session_id = %message.session_id,
            request_id = %request_id,
            next_state = %next_state,
            "Reply routed"
        );

        let session_id = message.session_id.clone();
        let responses = Responses::from_reply(outstanding.request, message);
        let output = self.advance(&mut guard, next_state.clone(), responses);
        let terminal = self.archive_if_finished(&guard);
        drop(guard);

        self.finish_round(&session_id, terminal, output);
        DispatchOutcome::Delivered {
            session_id,
            state: next_state,
        }
    }

    fn dispatch_well_known(
        &self,
        handler: &dyn WellKnownFlow,
        message: &ClientMessage,
    ) -> DispatchOutcome {
        self.inner.telemetry.increment("well_known_messages");
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.process_message(message, self)
        }))
        .unwrap_or_else(|panic| Err(FlowError::Fatal(panic_message(panic))));

        match result {
            Ok(()) => DispatchOutcome::WellKnown,
            Err(e) => {
                self.inner.telemetry.increment("well_known_errors");
                warn!(
                    session_id = %message.session_id,
                    source = ?message.source.as_ref().map(|s| s.to_string()),
                    error = %e,
                    "Well-known flow rejected message"
                );
                DispatchOutcome::Rejected(e.to_string())
            }
        }
    }

    fn drop_message(&self, message: &ClientMessage, reason: DropReason) -> DispatchOutcome {
        self.inner.telemetry.increment("replies_dropped");
        debug!(
            session_id = %message.session_id,
            request_id = ?message.request_id.map(|r| r.0),
            reason = ?reason,
            "Reply dropped"
        );
        DispatchOutcome::Dropped(reason)
    }

    // ── Running States ───────────────────────────────────────────────

    /// Run `state_name` and the direct transitions it requests, then persist.
    fn advance(&self, state: &mut FlowState, state_name: String, responses: Responses) -> RoundOutput {
        let flow = match self.inner.registry.get(&state.flow_name) {
            Ok(flow) => flow,
            Err(e) => {
                self.fail(state, &e);
                return self.commit(state, RoundOutput::default());
            }
        };

        let max_steps = self.inner.config.max_transitions_per_dispatch.max(1);
        let mut queue = VecDeque::from([(state_name, responses)]);
        let mut output = RoundOutput::default();
        let mut steps = 0;

        while let Some((name, responses)) = queue.pop_front() {
            steps += 1;
            if steps > max_steps {
                let err = FlowError::Fatal(format!(
                    "more than {} transitions in one dispatch",
                    max_steps
                ));
                self.fail(state, &err);
                output = RoundOutput::default();
                break;
            }

            let effects = match self.run_state(flow.as_ref(), state, &name, responses) {
                Ok(effects) => effects,
                Err(e) => {
                    self.fail(state, &e);
                    output = RoundOutput::default();
                    break;
                }
            };

            state.next_request_id = effects.next_request_id;
            for message in effects.logs {
                state.log(message);
            }
            let now = Utc::now();
            for request in effects.requests {
                state.outstanding.insert(
                    request.request_id,
                    OutstandingRequest {
                        request: request.clone(),
                        issued_at: now,
                        attempts: 1,
                        deadline: self.inner.timeouts.deadline_for(1, now),
                    },
                );
                output.sends.push(request);
            }
            output.launches.extend(effects.launches);

            if effects.terminated {
                state.finish();
                output.sends.clear();
                break;
            }
            queue.extend(
                effects
                    .transitions
                    .into_iter()
                    .map(|next| (next, Responses::empty())),
            );
        }

        if !state.is_terminal() {
            if state.outstanding.is_empty() {
                state.finish();
            } else {
                state.status = FlowStatus::Waiting;
            }
        }
        self.commit(state, output)
    }

    fn run_state(
        &self,
        flow: &dyn ErasedFlow,
        state: &mut FlowState,
        name: &str,
        responses: Responses,
    ) -> FlowResult<Effects> {
        state.current_state = name.to_string();
        state.status = FlowStatus::Running;
        debug!(session_id = %state.session_id, state = name, "Entering state");

        let mut ctx = FlowContext::new(
            state,
            self.inner.store.clone(),
            self.inner.telemetry.clone(),
            self.inner.services.clone(),
        );
        let mut data = state.data.clone();
        panic::catch_unwind(AssertUnwindSafe(|| {
            flow.run_state(&mut data, name, &mut ctx, responses)
        }))
        .unwrap_or_else(|panic| Err(FlowError::Fatal(panic_message(panic))))?;

        let effects = ctx.into_effects();
        let targets = effects
            .requests
            .iter()
            .map(|r| r.next_state.as_str())
            .chain(effects.transitions.iter().map(String::as_str));
        for target in targets {
            if !flow.has_state(target) {
                return Err(FlowError::UnknownState {
                    flow: state.flow_name.clone(),
                    state: target.to_string(),
                });
            }
        }

        state.data = data;
        Ok(effects)
    }

    fn fail(&self, state: &mut FlowState, err: &FlowError) {
        self.inner.telemetry.increment("flows_failed");
        if err.is_malformed() {
            warn!(
                session_id = %state.session_id,
                state = %state.current_state,
                error = %err,
                "Flow aborted on malformed request"
            );
        } else {
            error!(
                session_id = %state.session_id,
                state = %state.current_state,
                error = %err,
                "Flow failed"
            );
        }
        state.fail(err.to_string());
    }

    /// Persist the round. Nothing from a round that could not be persisted
    /// is sent.
    fn commit(&self, state: &mut FlowState, output: RoundOutput) -> RoundOutput {
        state.updated_at = Utc::now();
        if let Err(e) = self.inner.persistence.save(state) {
            self.fail(state, &e);
            return RoundOutput::default();
        }
        if state.status == FlowStatus::Done {
            self.inner.telemetry.increment("flows_completed");
            info!(
                session_id = %state.session_id,
                flow = %state.flow_name,
                "Flow completed"
            );
        }
        output
    }

    fn archive_if_finished(&self, state: &FlowState) -> bool {
        if state.is_terminal() {
            self.inner
                .archive
                .put(state.session_id.clone(), state.clone());
            true
        } else {
            false
        }
    }

    /// Post-commit work, done without holding the instance lock.
    fn finish_round(&self, session_id: &SessionId, terminal: bool, output: RoundOutput) {
        if terminal {
            self.inner.instances.remove(session_id);
            self.forget(session_id);
        }
        for request in &output.sends {
            match self.inner.outbox.send(request) {
                Ok(()) => {
                    self.inner.telemetry.increment("requests_sent");
                    debug!(
                        session_id = %request.session_id,
                        request_id = %request.request_id,
                        action = %request.action,
                        client_id = %request.client_id,
                        "Request sent"
                    );
                }
                Err(e) => warn!(
                    session_id = %request.session_id,
                    request_id = %request.request_id,
                    error = %e,
                    "Request send failed, leaving it for the timeout sweep"
                ),
            }
        }
        for launch in output.launches {
            let flow_name = launch.flow_name.clone();
            if let Err(e) = self.start(launch) {
                error!(parent = %session_id, flow = %flow_name, error = %e, "Child flow not started");
            }
        }
        self.inner
            .telemetry
            .set_gauge("active_flows", self.inner.instances.len() as f64);
    }

    /// Drop a finished instance from persistence; the archive keeps it
    /// for inspection.
    fn forget(&self, session_id: &SessionId) {
        if let Err(e) = self.inner.persistence.remove(session_id) {
            warn!(
                session_id = %session_id,
                error = %e,
                "Finished flow not removed from persistence"
            );
        }
    }

    // ── Timeouts and Recovery ────────────────────────────────────────

    /// Resend overdue calls and fail flows that ran out of resends. Returns
    /// the number of calls acted on.
    pub fn check_timeouts(&self, now: DateTime<Utc>) -> usize {
        let instances: Vec<(SessionId, Instance)> = self
            .inner
            .instances
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut acted = 0;
        for (session_id, instance) in instances {
            let mut guard = instance.lock();
            if guard.is_terminal() {
                continue;
            }

            let mut resend = Vec::new();
            let mut abandoned = None;
            for (request_id, outstanding) in guard.outstanding.iter_mut() {
                match self.inner.timeouts.decide(outstanding, now) {
                    TimeoutDecision::Wait => {}
                    TimeoutDecision::Retry { deadline } => {
                        outstanding.attempts += 1;
                        outstanding.deadline = deadline;
                        resend.push(outstanding.request.clone());
                    }
                    TimeoutDecision::Abandon => {
                        abandoned = Some(FlowError::TransientClientError {
                            session_id: session_id.clone(),
                            request_id: *request_id,
                            attempts: outstanding.attempts,
                        });
                        break;
                    }
                }
            }
            if resend.is_empty() && abandoned.is_none() {
                continue;
            }

            acted += resend.len();
            if let Some(err) = abandoned {
                acted += 1;
                resend.clear();
                self.fail(&mut guard, &err);
            } else {
                self.inner
                    .telemetry
                    .add("requests_retried", resend.len() as u64);
                info!(session_id = %session_id, count = resend.len(), "Resending overdue requests");
            }

            let output = self.commit(
                &mut guard,
                RoundOutput {
                    sends: resend,
                    launches: Vec::new(),
                },
            );
            let terminal = self.archive_if_finished(&guard);
            drop(guard);
            self.finish_round(&session_id, terminal, output);
        }
        acted
    }

    /// Reload persisted instances. Unfinished ones become live again;
    /// finished ones (left behind by a crash between persisting and
    /// removing them) are archived and removed. Returns the number of live
    /// instances restored.
    pub fn recover(&self) -> FlowResult<usize> {
        let mut restored = 0;
        for state in self.inner.persistence.load_all()? {
            if state.is_terminal() {
                let session_id = state.session_id.clone();
                self.inner.archive.put(session_id.clone(), state);
                self.forget(&session_id);
                continue;
            }
            if self.inner.instances.contains_key(&state.session_id) {
                continue;
            }
            debug!(
                session_id = %state.session_id,
                state = %state.current_state,
                outstanding = state.outstanding.len(),
                "Flow restored"
            );
            self.inner
                .instances
                .insert(state.session_id.clone(), Arc::new(Mutex::new(state)));
            restored += 1;
        }
        self.inner
            .telemetry
            .set_gauge("active_flows", self.inner.instances.len() as f64);
        info!(restored, "Flow state recovered");
        Ok(restored)
    }

    // ── Inspection ───────────────────────────────────────────────────

    /// Current state of a live or recently finished instance.
    pub fn flow_state(&self, session_id: &SessionId) -> Option<FlowState> {
        let live = self
            .inner
            .instances
            .get(session_id)
            .map(|entry| entry.value().clone());
        match live {
            Some(instance) => Some(instance.lock().clone()),
            None => self.inner.archive.get(session_id),
        }
    }

    /// Live instances, sorted.
    pub fn active_flows(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self
            .inner
            .instances
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }
}

impl FlowLauncher for FlowEngine {
    fn launch(&self, launch: FlowLaunch) -> FlowResult<SessionId> {
        self.start(launch)
    }

    fn store(&self) -> &ObjectStore {
        &self.inner.store
    }

    fn telemetry(&self) -> &Arc<Telemetry> {
        &self.inner.telemetry
    }
}

impl std::fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("registry", &self.inner.registry)
            .field("active_flows", &self.inner.instances.len())
            .finish()
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("handler panicked: {}", detail)
}

// ── Builder ──────────────────────────────────────────────────────────

pub struct FlowEngineBuilder {
    registry: FlowRegistry,
    store: ObjectStore,
    well_known: Vec<Arc<dyn WellKnownFlow>>,
    outbox: Option<Arc<dyn ClientOutbox>>,
    persistence: Option<Arc<dyn FlowStateStore>>,
    telemetry: Option<Arc<Telemetry>>,
    services: Services,
    config: EngineConfig,
}

impl FlowEngineBuilder {
    /// Make `service` available to handlers through [`FlowContext::service`].
    pub fn with_service<T: Send + Sync + 'static>(mut self, service: T) -> Self {
        self.services.insert(service);
        self
    }

    pub fn with_well_known(mut self, flow: Arc<dyn WellKnownFlow>) -> Self {
        self.well_known.push(flow);
        self
    }

    pub fn with_outbox(mut self, outbox: Arc<dyn ClientOutbox>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn FlowStateStore>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Defaults to the object store's telemetry.
    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> FlowEngine {
        let well_known = self
            .well_known
            .into_iter()
            .map(|flow| (flow.session_id().clone(), flow))
            .collect();
        let telemetry = self
            .telemetry
            .unwrap_or_else(|| self.store.telemetry().clone());
        FlowEngine {
            inner: Arc::new(EngineInner {
                registry: self.registry,
                well_known,
                instances: DashMap::new(),
                archive: FastStore::new(self.config.archive_capacity),
                persistence: self
                    .persistence
                    .unwrap_or_else(|| Arc::new(MemoryFlowStore::new())),
                outbox: self.outbox.unwrap_or_else(|| Arc::new(QueueOutbox::new())),
                store: self.store,
                telemetry,
                services: Arc::new(self.services),
                timeouts: TimeoutPolicy::from_config(&self.config),
                config: self.config,
            }),
        }
    }
}
