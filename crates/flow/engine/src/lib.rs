//! Warden flow engine.
//!
//! Flows are Rust types with a static table of state handlers. The engine
//! starts instances, sends the client calls their handlers make, routes
//! each reply back to the instance and state named by its request id, and
//! persists instance state after every step so that a restarted server
//! resumes where it stopped.
//!
//! Messages sent to a well-known session id (`<queue>:<name>`) bypass all
//! of that and go straight to a [`WellKnownFlow`] handler.
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use warden_flow_engine::{
//!     Flow, FlowContext, FlowEngine, FlowLaunch, FlowRegistry, QueueOutbox, StateTable,
//! };
//! use warden_flow_types::{ClientId, ClientMessage, FlowResult, FlowStatus, Responses};
//! use warden_store::ObjectStore;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Ping {
//!     answer: Option<String>,
//! }
//!
//! impl Ping {
//!     fn start(&mut self, ctx: &mut FlowContext, _: Responses) -> FlowResult<()> {
//!         ctx.call_client("Echo", "ping", "Pong")?;
//!         Ok(())
//!     }
//!
//!     fn pong(&mut self, _: &mut FlowContext, responses: Responses) -> FlowResult<()> {
//!         self.answer = Some(responses.first()?);
//!         Ok(())
//!     }
//! }
//!
//! impl Flow for Ping {
//!     const NAME: &'static str = "Ping";
//!
//!     fn state_table() -> StateTable<Self> {
//!         StateTable::new()
//!             .state("Start", Self::start)
//!             .state("Pong", Self::pong)
//!     }
//! }
//!
//! let outbox = Arc::new(QueueOutbox::new());
//! let engine = FlowEngine::builder(FlowRegistry::new().register::<Ping>()?, ObjectStore::in_memory())
//!     .with_outbox(outbox.clone())
//!     .build();
//!
//! let launch = FlowLaunch::new(&Ping { answer: None })?.with_client(ClientId::new("C.1"));
//! let session = engine.start(launch)?;
//!
//! let request = outbox.pop().unwrap();
//! engine.dispatch(ClientMessage::reply(&request, "pong")?);
//! assert_eq!(engine.flow_state(&session).unwrap().status, FlowStatus::Done);
//! # Ok::<(), warden_flow_types::FlowError>(())
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod engine;
pub mod flow;
pub mod journal;
pub mod outbox;
pub mod persistence;
pub mod registry;
pub mod services;
pub mod timeout;
pub mod well_known;

pub use config::EngineConfig;
pub use engine::{DispatchOutcome, DropReason, FlowEngine, FlowEngineBuilder};
pub use flow::{Flow, FlowContext, FlowLaunch, StateHandler, StateTable, DEFAULT_QUEUE};
pub use journal::JournalFlowStore;
pub use outbox::{ClientOutbox, QueueOutbox};
pub use persistence::{FlowStateStore, MemoryFlowStore};
pub use registry::FlowRegistry;
pub use services::Services;
pub use timeout::{TimeoutDecision, TimeoutPolicy};
pub use well_known::{FlowLauncher, WellKnownFlow};
