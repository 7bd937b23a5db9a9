//! Flow definitions: the [`Flow`] trait, its static [`StateTable`], and the
//! [`FlowContext`] handed to each state handler.

use crate::services::Services;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use warden_flow_types::{
    ClientId, ClientRequest, FlowError, FlowResult, FlowState, RequestId, Responses, SessionId,
};
use warden_store::{ObjectStore, Token};
use warden_telemetry::Telemetry;

/// Queue used when a launch does not name one.
pub const DEFAULT_QUEUE: &str = "W";

/// A state handler. Runs with exclusive access to its instance.
pub type StateHandler<F> = fn(&mut F, &mut FlowContext, Responses) -> FlowResult<()>;

/// A multi-state flow.
///
/// The flow value itself is the instance's persisted data: it is
/// deserialized before each handler runs and serialized again afterwards.
pub trait Flow: Serialize + DeserializeOwned + Send + 'static {
    /// Registry name, also recorded in [`FlowState::flow_name`].
    const NAME: &'static str;

    /// Handlers by state name. Must contain `Start`.
    fn state_table() -> StateTable<Self>;
}

// ── State Table ──────────────────────────────────────────────────────

/// State name → handler, built once when the flow type is registered.
pub struct StateTable<F> {
    handlers: BTreeMap<&'static str, StateHandler<F>>,
}

impl<F> StateTable<F> {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    pub fn state(mut self, name: &'static str, handler: StateHandler<F>) -> Self {
        self.handlers.insert(name, handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<StateHandler<F>> {
        self.handlers.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }
}

impl<F> Default for StateTable<F> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Launch Requests ──────────────────────────────────────────────────

/// Everything needed to start a new flow instance.
#[derive(Clone, Debug)]
pub struct FlowLaunch {
    pub flow_name: String,
    /// Serialized flow value.
    pub data: serde_json::Value,
    pub client_id: Option<ClientId>,
    pub queue: String,
    pub token: Token,
    pub parent: Option<SessionId>,
}

impl FlowLaunch {
    pub fn new<F: Flow>(flow: &F) -> FlowResult<Self> {
        Ok(Self {
            flow_name: F::NAME.to_string(),
            data: serde_json::to_value(flow)?,
            client_id: None,
            queue: DEFAULT_QUEUE.to_string(),
            token: Token::system(),
            parent: None,
        })
    }

    pub fn with_client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_token(mut self, token: Token) -> Self {
        self.token = token;
        self
    }

    pub fn with_parent(mut self, parent: SessionId) -> Self {
        self.parent = Some(parent);
        self
    }
}

// ── Flow Context ─────────────────────────────────────────────────────

/// Side effects a handler asked for. Applied only if the handler returns
/// `Ok`.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub next_request_id: u64,
    pub requests: Vec<ClientRequest>,
    pub transitions: Vec<String>,
    pub launches: Vec<FlowLaunch>,
    pub logs: Vec<String>,
    pub terminated: bool,
}

/// The engine as seen from inside a state handler.
pub struct FlowContext {
    session_id: SessionId,
    client_id: Option<ClientId>,
    queue: String,
    token: Token,
    store: ObjectStore,
    telemetry: Arc<Telemetry>,
    services: Arc<Services>,
    effects: Effects,
}

impl FlowContext {
    pub(crate) fn new(
        state: &FlowState,
        store: ObjectStore,
        telemetry: Arc<Telemetry>,
        services: Arc<Services>,
    ) -> Self {
        Self {
            session_id: state.session_id.clone(),
            client_id: state.client_id.clone(),
            queue: state.queue.clone(),
            token: state.token.clone(),
            store,
            telemetry,
            services,
            effects: Effects {
                next_request_id: state.next_request_id,
                ..Effects::default()
            },
        }
    }

    pub(crate) fn into_effects(self) -> Effects {
        self.effects
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn client_id(&self) -> Option<&ClientId> {
        self.client_id.as_ref()
    }

    /// The client this flow runs against, or a fatal error for flows started
    /// without one.
    pub fn require_client(&self) -> FlowResult<&ClientId> {
        self.client_id
            .as_ref()
            .ok_or_else(|| FlowError::Fatal(format!("flow {} has no client", self.session_id)))
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// A service registered with the engine builder.
    pub fn service<T: Send + Sync + 'static>(&self) -> FlowResult<&T> {
        self.services.get::<T>().ok_or_else(|| {
            FlowError::Fatal(format!(
                "service {} is not configured",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Ask the flow's client to run `action`. The reply resumes the flow in
    /// `next_state`; several calls may be outstanding at once.
    pub fn call_client(
        &mut self,
        action: &str,
        args: impl Serialize,
        next_state: &str,
    ) -> FlowResult<RequestId> {
        let client_id = self.require_client()?.clone();
        let request_id = RequestId(self.effects.next_request_id);
        self.effects.next_request_id += 1;
        self.effects.requests.push(ClientRequest {
            client_id,
            action: action.to_string(),
            args: serde_json::to_value(args)?,
            request_id,
            session_id: self.session_id.clone(),
            next_state: next_state.to_string(),
        });
        Ok(request_id)
    }

    /// Run `next_state` right after this handler, without a client round trip.
    pub fn call_state(&mut self, next_state: &str) {
        self.effects.transitions.push(next_state.to_string());
    }

    /// Finish the flow once this handler returns.
    pub fn terminate(&mut self) {
        self.effects.terminated = true;
    }

    /// Start `flow` for the same client once this handler commits.
    pub fn start_flow<F: Flow>(&mut self, flow: &F) -> FlowResult<()> {
        let mut launch = FlowLaunch::new(flow)?
            .with_queue(self.queue.clone())
            .with_token(self.token.clone())
            .with_parent(self.session_id.clone());
        launch.client_id = self.client_id.clone();
        self.effects.launches.push(launch);
        Ok(())
    }

    /// Append to the instance's log.
    pub fn log(&mut self, message: impl Into<String>) {
        self.effects.logs.push(message.into());
    }
}

impl std::fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowContext")
            .field("session_id", &self.session_id)
            .field("client_id", &self.client_id)
            .field("effects", &self.effects)
            .finish()
    }
}
