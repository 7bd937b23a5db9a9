//! Well-known flows: fixed session ids that accept unsolicited messages.

use crate::flow::FlowLaunch;
use std::sync::Arc;
use warden_flow_types::{ClientMessage, FlowResult, SessionId};
use warden_store::ObjectStore;
use warden_telemetry::Telemetry;

/// What a well-known handler may do besides inspecting its message.
pub trait FlowLauncher: Send + Sync {
    /// Start a flow instance and return its session id.
    fn launch(&self, launch: FlowLaunch) -> FlowResult<SessionId>;

    fn store(&self) -> &ObjectStore;

    fn telemetry(&self) -> &Arc<Telemetry>;
}

/// A handler for messages sent to a fixed `<queue>:<name>` session.
///
/// There is no per-message flow state and no serialization: the same message
/// may arrive twice, and different messages arrive concurrently. Handlers
/// must guard their own side effects.
pub trait WellKnownFlow: Send + Sync {
    fn session_id(&self) -> &SessionId;

    fn process_message(&self, message: &ClientMessage, launcher: &dyn FlowLauncher)
        -> FlowResult<()>;
}
