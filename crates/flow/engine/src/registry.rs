//! Flow registry: the set of flow types the engine can run.
//!
//! The registry is assembled once at start-up and handed to the engine,
//! which never changes it afterwards.

use crate::flow::{Flow, FlowContext, StateTable};
use std::collections::HashMap;
use std::sync::Arc;
use warden_flow_types::{FlowError, FlowResult, Responses, START_STATE};

/// A registered flow type with its concrete Rust type erased.
pub(crate) trait ErasedFlow: Send + Sync {
    fn name(&self) -> &'static str;

    fn has_state(&self, state: &str) -> bool;

    /// Run `state` against the serialized flow value in `data`, writing the
    /// updated value back only if the handler succeeds.
    fn run_state(
        &self,
        data: &mut serde_json::Value,
        state: &str,
        ctx: &mut FlowContext,
        responses: Responses,
    ) -> FlowResult<()>;
}

struct Registered<F> {
    table: StateTable<F>,
}

impl<F: Flow> ErasedFlow for Registered<F> {
    fn name(&self) -> &'static str {
        F::NAME
    }

    fn has_state(&self, state: &str) -> bool {
        self.table.contains(state)
    }

    fn run_state(
        &self,
        data: &mut serde_json::Value,
        state: &str,
        ctx: &mut FlowContext,
        responses: Responses,
    ) -> FlowResult<()> {
        let handler = self.table.get(state).ok_or_else(|| FlowError::UnknownState {
            flow: F::NAME.to_string(),
            state: state.to_string(),
        })?;
        let mut flow: F = serde_json::from_value(data.clone())?;
        handler(&mut flow, ctx, responses)?;
        *data = serde_json::to_value(&flow)?;
        Ok(())
    }
}

/// Flow types by name.
#[derive(Clone, Default)]
pub struct FlowRegistry {
    flows: HashMap<&'static str, Arc<dyn ErasedFlow>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `F`. Fails if its state table has no `Start` state.
    pub fn register<F: Flow>(mut self) -> FlowResult<Self> {
        let table = F::state_table();
        if !table.contains(START_STATE) {
            return Err(FlowError::UnknownState {
                flow: F::NAME.to_string(),
                state: START_STATE.to_string(),
            });
        }
        let states: Vec<_> = table.names().collect();
        if self
            .flows
            .insert(F::NAME, Arc::new(Registered { table }))
            .is_some()
        {
            tracing::warn!(flow = F::NAME, "Flow registered twice, keeping the later one");
        }
        tracing::info!(flow = F::NAME, states = ?states, "Flow registered");
        Ok(self)
    }

    pub(crate) fn get(&self, name: &str) -> FlowResult<Arc<dyn ErasedFlow>> {
        self.flows
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::UnknownFlow(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.flows.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.flows.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

impl std::fmt::Debug for FlowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRegistry")
            .field("flows", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Counter {
        runs: u32,
    }

    impl Counter {
        fn start(&mut self, _ctx: &mut FlowContext, _responses: Responses) -> FlowResult<()> {
            self.runs += 1;
            Ok(())
        }
    }

    impl Flow for Counter {
        const NAME: &'static str = "Counter";

        fn state_table() -> StateTable<Self> {
            StateTable::new().state("Start", Self::start)
        }
    }

    #[derive(Serialize, Deserialize)]
    struct NoStart;

    impl Flow for NoStart {
        const NAME: &'static str = "NoStart";

        fn state_table() -> StateTable<Self> {
            StateTable::new()
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = FlowRegistry::new().register::<Counter>().unwrap();
        assert!(registry.contains("Counter"));
        assert_eq!(registry.names(), vec!["Counter"]);
        assert!(registry.get("Counter").unwrap().has_state("Start"));
        assert!(matches!(
            registry.get("Missing"),
            Err(FlowError::UnknownFlow(_))
        ));
    }

    #[test]
    fn test_start_state_is_required() {
        let err = FlowRegistry::new().register::<NoStart>().unwrap_err();
        assert!(matches!(err, FlowError::UnknownState { .. }));
    }
}
