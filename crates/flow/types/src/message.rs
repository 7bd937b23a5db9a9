//! Wire envelopes between the engine and agents.

use crate::errors::{FlowError, FlowResult};
use crate::ids::{ClientId, RequestId, SessionId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// An action the server asks an agent to run.
///
/// The agent echoes `session_id` and `request_id` in its reply; that pair is
/// the only thing replies are routed by.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientRequest {
    pub client_id: ClientId,
    pub action: String,
    /// Serialized action arguments.
    pub args: serde_json::Value,
    pub request_id: RequestId,
    /// Session that owns the request.
    pub session_id: SessionId,
    /// State the owning flow resumes in when the reply arrives.
    pub next_state: String,
}

/// Outcome reported by an agent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    #[default]
    Ok,
    Error(String),
}

/// A message from an agent: either a reply to a [`ClientRequest`] or an
/// unsolicited message to a well-known session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub session_id: SessionId,
    /// Absent on unsolicited messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ClientId>,
    #[serde(default)]
    pub status: ReplyStatus,
    #[serde(default)]
    pub payloads: Vec<serde_json::Value>,
}

impl ClientMessage {
    /// A successful reply to `request` carrying one payload.
    pub fn reply(request: &ClientRequest, payload: impl Serialize) -> FlowResult<Self> {
        Ok(Self {
            session_id: request.session_id.clone(),
            request_id: Some(request.request_id),
            source: Some(request.client_id.clone()),
            status: ReplyStatus::Ok,
            payloads: vec![serde_json::to_value(payload)?],
        })
    }

    /// A failed reply to `request`.
    pub fn error_reply(request: &ClientRequest, message: impl Into<String>) -> Self {
        Self {
            session_id: request.session_id.clone(),
            request_id: Some(request.request_id),
            source: Some(request.client_id.clone()),
            status: ReplyStatus::Error(message.into()),
            payloads: Vec::new(),
        }
    }

    /// A message addressed to a well-known session.
    pub fn unsolicited(
        session_id: SessionId,
        source: ClientId,
        payload: impl Serialize,
    ) -> FlowResult<Self> {
        Ok(Self {
            session_id,
            request_id: None,
            source: Some(source),
            status: ReplyStatus::Ok,
            payloads: vec![serde_json::to_value(payload)?],
        })
    }

    /// First payload decoded as `T`. A missing or undecodable payload is a
    /// malformed request.
    pub fn payload<T: DeserializeOwned>(&self) -> FlowResult<T> {
        decode_first(&self.payloads)
    }
}

/// What a state handler receives: the reply to the request that named the
/// state, or nothing for the start state and direct transitions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Responses {
    request: Option<ClientRequest>,
    status: ReplyStatus,
    payloads: Vec<serde_json::Value>,
}

impl Responses {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_reply(request: ClientRequest, message: ClientMessage) -> Self {
        Self {
            request: Some(request),
            status: message.status,
            payloads: message.payloads,
        }
    }

    /// The request being answered, if any.
    pub fn request(&self) -> Option<&ClientRequest> {
        self.request.as_ref()
    }

    pub fn status(&self) -> &ReplyStatus {
        &self.status
    }

    pub fn success(&self) -> bool {
        self.status == ReplyStatus::Ok
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn payloads(&self) -> &[serde_json::Value] {
        &self.payloads
    }

    pub fn first<T: DeserializeOwned>(&self) -> FlowResult<T> {
        decode_first(&self.payloads)
    }

    /// Every payload decoded as `T`.
    pub fn decode_all<T: DeserializeOwned>(&self) -> FlowResult<Vec<T>> {
        self.payloads
            .iter()
            .map(|p| {
                T::deserialize(p).map_err(|e| FlowError::MalformedRequest(e.to_string()))
            })
            .collect()
    }
}

fn decode_first<T: DeserializeOwned>(payloads: &[serde_json::Value]) -> FlowResult<T> {
    let first = payloads
        .first()
        .ok_or_else(|| FlowError::MalformedRequest("message carries no payload".into()))?;
    T::deserialize(first).map_err(|e| FlowError::MalformedRequest(e.to_string()))
}
