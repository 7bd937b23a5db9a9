//! Outbound side of the engine: where client requests go once committed.

use parking_lot::Mutex;
use std::collections::VecDeque;
use warden_flow_types::{ClientRequest, FlowResult};

/// Delivers requests to agents. Called after the owning flow's state has
/// been persisted; a failed send leaves the request outstanding for the
/// timeout sweeper to resend.
pub trait ClientOutbox: Send + Sync {
    fn send(&self, request: &ClientRequest) -> FlowResult<()>;
}

/// In-process outbox that queues requests until they are taken.
#[derive(Debug, Default)]
pub struct QueueOutbox {
    queue: Mutex<VecDeque<ClientRequest>>,
}

impl QueueOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<ClientRequest> {
        self.queue.lock().pop_front()
    }

    /// Take every queued request, oldest first.
    pub fn drain(&self) -> Vec<ClientRequest> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl ClientOutbox for QueueOutbox {
    fn send(&self, request: &ClientRequest) -> FlowResult<()> {
        self.queue.lock().push_back(request.clone());
        Ok(())
    }
}
