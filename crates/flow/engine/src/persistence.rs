//! Durable storage for [`FlowState`].

use parking_lot::RwLock;
use std::collections::BTreeMap;
use warden_flow_types::{FlowResult, FlowState, SessionId};

/// Where the engine persists flow instances. `save` is called after every
/// dispatch round, before any request from that round is sent.
pub trait FlowStateStore: Send + Sync {
    /// Record the latest state of one instance, replacing earlier ones.
    fn save(&self, state: &FlowState) -> FlowResult<()>;

    /// Forget an instance. Called once it has finished and been archived.
    fn remove(&self, session_id: &SessionId) -> FlowResult<()>;

    /// Latest state of every instance recorded and not removed.
    fn load_all(&self) -> FlowResult<Vec<FlowState>>;
}

/// Process-local store, for tests and for running without a journal.
#[derive(Debug, Default)]
pub struct MemoryFlowStore {
    states: RwLock<BTreeMap<SessionId, FlowState>>,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &SessionId) -> Option<FlowState> {
        self.states.read().get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}

impl FlowStateStore for MemoryFlowStore {
    fn save(&self, state: &FlowState) -> FlowResult<()> {
        self.states
            .write()
            .insert(state.session_id.clone(), state.clone());
        Ok(())
    }

    fn remove(&self, session_id: &SessionId) -> FlowResult<()> {
        self.states.write().remove(session_id);
        Ok(())
    }

    fn load_all(&self) -> FlowResult<Vec<FlowState>> {
        Ok(self.states.read().values().cloned().collect())
    }
}
