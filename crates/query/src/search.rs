//! Root-level queries and client search.

use crate::error::{QueryError, QueryResult};
use crate::filter::Filter;
use crate::parser::compile;
use crate::shorthand;
use crate::summary::ClientSummary;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use warden_store::{types, AccessMode, Aff4Object, ObjectStore, StoreError, Token};

/// Timing recorded for every client search.
pub const SEARCH_TIMING: &str = "search_host_time";

/// Page of a result stream, applied after filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWindow {
    pub start: usize,
    pub length: usize,
}

impl QueryWindow {
    pub fn new(start: usize, length: usize) -> Self {
        Self { start, length }
    }

    pub fn apply<I: Iterator>(self, items: I) -> std::iter::Take<std::iter::Skip<I>> {
        items.skip(self.start).take(self.length)
    }
}

impl Default for QueryWindow {
    fn default() -> Self {
        Self {
            start: 0,
            length: 50,
        }
    }
}

/// Run `query` over every object of every registered type the token can read.
///
/// The query is compiled before any object is opened, so an invalid query
/// fails without touching the store.
pub fn root_query(
    store: &ObjectStore,
    token: &Token,
    query: &str,
    window: QueryWindow,
) -> QueryResult<Vec<Aff4Object>> {
    let filter = compile(query)?;
    let mut scans = Vec::new();
    for type_name in store.schemas().names() {
        scans.push(store.scan(type_name, token)?);
    }
    Ok(window
        .apply(filter.filter(scans.into_iter().flatten()))
        .collect())
}

/// Run `query` over objects of a single type.
pub fn query_type(
    store: &ObjectStore,
    token: &Token,
    type_name: &str,
    query: &str,
    window: QueryWindow,
) -> QueryResult<Vec<Aff4Object>> {
    let filter = compile(query)?;
    let scan = store.scan(type_name, token)?;
    Ok(window.apply(filter.filter(scan)).collect())
}

/// Search clients from the search box.
///
/// Queries containing `:` go through shorthand rewriting and the query
/// compiler; anything else is a keyword lookup in the hostname/username
/// index.
pub fn search_clients(
    store: &ObjectStore,
    token: &Token,
    query: &str,
    window: QueryWindow,
) -> QueryResult<Vec<ClientSummary>> {
    let query = query.trim();
    if query.is_empty() {
        return Err(QueryError::invalid(0, "a query string must be provided"));
    }

    let telemetry = store.telemetry().clone();
    let _timer = telemetry.start_timer(SEARCH_TIMING);

    let clients = if query.contains(':') {
        let rewritten = shorthand::rewrite(query)?;
        tracing::debug!(query, rewritten = %rewritten, "Searching clients by predicate");
        query_type(store, token, types::CLIENT, &rewritten, window)?
    } else {
        tracing::debug!(query, "Searching client index");
        let hits = store.index().lookup(query).into_iter().filter_map(|urn| {
            match store.open(&urn, token, AccessMode::Read) {
                Ok(client) => Some(Ok(client)),
                Err(StoreError::AccessDenied { .. }) | Err(StoreError::NotFound(_)) => None,
                Err(e) => Some(Err(e)),
            }
        });
        window
            .apply(hits)
            .collect::<Result<Vec<_>, StoreError>>()?
    };

    let now = Utc::now();
    Ok(clients
        .iter()
        .map(|client| ClientSummary::from_object(client, now))
        .collect())
}
