//! Persisted state of a flow instance.

use crate::ids::{ClientId, RequestId, SessionId};
use crate::message::ClientRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use warden_store::Token;

/// Name of the state every new instance runs first.
pub const START_STATE: &str = "Start";

// ── Flow Status ──────────────────────────────────────────────────────

/// Lifecycle of a flow instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlowStatus {
    Created,
    Running,
    /// At least one client call is unanswered.
    Waiting,
    Done,
    Failed {
        reason: String,
    },
}

impl FlowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Waiting => write!(f, "waiting"),
            Self::Done => write!(f, "done"),
            Self::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

// ── Outstanding Requests ─────────────────────────────────────────────

/// A sent client call and its retry bookkeeping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutstandingRequest {
    pub request: ClientRequest,
    pub issued_at: DateTime<Utc>,
    /// Times the request has been sent, starting at 1.
    pub attempts: u32,
    pub deadline: DateTime<Utc>,
}

impl OutstandingRequest {
    pub fn next_state(&self) -> &str {
        &self.request.next_state
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

// ── Flow State ───────────────────────────────────────────────────────

/// Everything needed to resume a flow instance after a restart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    pub session_id: SessionId,
    /// Registered flow type name.
    pub flow_name: String,
    pub queue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    /// State most recently entered.
    pub current_state: String,
    pub status: FlowStatus,
    /// Serialized flow struct.
    pub data: serde_json::Value,
    /// Unanswered client calls keyed by request id.
    #[serde(default)]
    pub outstanding: BTreeMap<RequestId, OutstandingRequest>,
    pub next_request_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<SessionId>,
    pub creator: String,
    pub token: Token,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub logs: Vec<FlowLogEntry>,
}

impl FlowState {
    pub fn new(
        session_id: SessionId,
        flow_name: impl Into<String>,
        data: serde_json::Value,
        token: Token,
    ) -> Self {
        let now = Utc::now();
        Self {
            queue: session_id.queue().to_string(),
            session_id,
            flow_name: flow_name.into(),
            client_id: None,
            current_state: START_STATE.to_string(),
            status: FlowStatus::Created,
            data,
            outstanding: BTreeMap::new(),
            next_request_id: 1,
            parent: None,
            creator: token.username.clone(),
            token,
            created_at: now,
            updated_at: now,
            logs: Vec::new(),
        }
    }

    pub fn with_client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_parent(mut self, parent: SessionId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Request id → next state, the routing table replies are matched against.
    pub fn pending_states(&self) -> BTreeMap<RequestId, &str> {
        self.outstanding
            .iter()
            .map(|(id, out)| (*id, out.next_state()))
            .collect()
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.logs.push(FlowLogEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }

    /// Mark the instance failed and drop its outstanding calls.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.log(format!("failed: {}", reason));
        self.outstanding.clear();
        self.status = FlowStatus::Failed { reason };
        self.updated_at = Utc::now();
    }

    /// Mark the instance done and drop its outstanding calls.
    pub fn finish(&mut self) {
        self.outstanding.clear();
        self.status = FlowStatus::Done;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> FlowState {
        FlowState::new(
            SessionId::new("W:0000000A"),
            "Interrogate",
            serde_json::json!({}),
            Token::system(),
        )
        .with_client(ClientId::new("C.1"))
    }

    #[test]
    fn test_new_state_starts_in_start() {
        let st = state();
        assert_eq!(st.queue, "W");
        assert_eq!(st.current_state, START_STATE);
        assert_eq!(st.status, FlowStatus::Created);
        assert_eq!(st.creator, "system");
        assert!(!st.is_terminal());
    }

    #[test]
    fn test_fail_clears_outstanding_and_logs() {
        let mut st = state();
        let now = Utc::now();
        st.outstanding.insert(
            RequestId(1),
            OutstandingRequest {
                request: ClientRequest {
                    client_id: ClientId::new("C.1"),
                    action: "EnumerateUsers".into(),
                    args: serde_json::Value::Null,
                    request_id: RequestId(1),
                    session_id: st.session_id.clone(),
                    next_state: "Users".into(),
                },
                issued_at: now,
                attempts: 1,
                deadline: now,
            },
        );
        assert_eq!(st.pending_states()[&RequestId(1)], "Users");

        st.fail("boom");
        assert!(st.outstanding.is_empty());
        assert_eq!(st.status.to_string(), "failed: boom");
        assert_eq!(st.logs.last().unwrap().message, "failed: boom");
    }

    #[test]
    fn test_state_survives_json() {
        let mut st = state();
        st.status = FlowStatus::Waiting;
        let json = serde_json::to_string(&st).unwrap();
        let back: FlowState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, st);
    }
}
