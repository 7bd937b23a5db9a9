//! JSON-lines agent transport.
//!
//! Each input line is one [`Inbound`] record, each output line one
//! [`Outbound`] record, both tagged by `kind`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use warden_flow_engine::ClientOutbox;
use warden_flow_types::{ClientMessage, ClientRequest, FlowResult};
use warden_query::{Category, ClientSummary, QueryWindow};

/// A record read from an agent or an operator.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inbound {
    /// A reply or unsolicited message from an agent.
    Message(ClientMessage),
    /// A client search.
    Search {
        query: String,
        #[serde(default)]
        window: QueryWindow,
    },
    /// List the registered navigation categories.
    Navigation,
}

impl Inbound {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// A record written for agents or operators.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outbound<'a> {
    Request(&'a ClientRequest),
    SearchResults {
        query: &'a str,
        clients: Vec<ClientSummary>,
    },
    SearchError {
        query: &'a str,
        error: String,
    },
    Navigation {
        host: Vec<&'a Category>,
        general: Vec<&'a Category>,
    },
}

/// Writes one JSON document per line to a shared sink.
pub struct JsonLinesWriter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesWriter {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    pub fn write(&self, record: &Outbound<'_>) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut out = self.out.lock();
        out.write_all(&line)?;
        out.flush()
    }
}

impl ClientOutbox for JsonLinesWriter {
    fn send(&self, request: &ClientRequest) -> FlowResult<()> {
        self.write(&Outbound::Request(request))?;
        Ok(())
    }
}

impl std::fmt::Debug for JsonLinesWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesWriter").finish_non_exhaustive()
    }
}
