//! Identifiers for flow sessions, client requests and clients.

use serde::{Deserialize, Serialize};
use std::fmt;
use warden_store::Urn;

// ── Session Identifier ───────────────────────────────────────────────

/// Identifies one flow instance, or one well-known flow.
///
/// The text form is `<queue>:<name>`. Instances get a random name of eight
/// upper-case hex digits; well-known flows use a fixed name such as
/// `CA:Enrol`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// A fresh instance id in `queue`.
    pub fn generate(queue: &str) -> Self {
        Self(format!("{}:{:08X}", queue, rand::random::<u32>()))
    }

    /// The fixed id of a well-known flow.
    pub fn well_known(queue: &str, name: &str) -> Self {
        Self(format!("{}:{}", queue, name))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Queue prefix. An id without `:` is its own queue.
    pub fn queue(&self) -> &str {
        self.0.split_once(':').map_or(&self.0, |(queue, _)| queue)
    }

    /// Part after the queue prefix.
    pub fn name(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, name)| name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ── Request Identifier ───────────────────────────────────────────────

/// Identifies one outstanding client call within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Client Identifier ────────────────────────────────────────────────

/// An enrolled agent, e.g. `C.0123456789abcdef`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The client's root object in the store.
    pub fn urn(&self) -> Urn {
        Urn::new(&self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}
