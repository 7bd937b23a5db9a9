//! Flow domain types for Warden.
//!
//! Everything a flow instance needs to survive a restart lives here as plain
//! serializable data: its [`FlowState`], the [`ClientRequest`] envelopes it
//! has sent, and the [`ClientMessage`] replies that resume it. The engine
//! that drives these types lives in `warden-flow-engine`.

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod message;
pub mod state;

pub use errors::{FlowError, FlowResult};
pub use ids::{ClientId, RequestId, SessionId};
pub use message::{ClientMessage, ClientRequest, ReplyStatus, Responses};
pub use state::{FlowLogEntry, FlowState, FlowStatus, OutstandingRequest, START_STATE};
