//! Read-only client views for the front-end.

use crate::error::QueryResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use warden_store::{attrs, types, AccessMode, Aff4Object, ObjectStore, Token, Urn};

/// How recently a client was heard from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnlineState {
    /// Seen within the last 15 minutes.
    Online,
    /// Seen within the last day.
    SeenToday,
    Offline,
}

impl OnlineState {
    pub fn classify(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let Some(last_seen) = last_seen else {
            return Self::Offline;
        };
        let age = now - last_seen;
        if age < Duration::minutes(15) {
            Self::Online
        } else if age < Duration::days(1) {
            Self::SeenToday
        } else {
            Self::Offline
        }
    }
}

/// One row of a client listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub urn: Urn,
    pub client_id: String,
    pub hostname: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub online: OnlineState,
    pub version: Option<String>,
    pub mac: Option<String>,
    pub usernames: Option<String>,
    pub install: Option<DateTime<Utc>>,
}

impl ClientSummary {
    pub fn from_object(object: &Aff4Object, now: DateTime<Utc>) -> Self {
        let text = |name: &str| object.get(name).map(|v| v.to_text());
        let time = |name: &str| object.get(name).and_then(|v| v.as_timestamp());
        let last_seen = time(attrs::CLOCK);

        Self {
            urn: object.urn().clone(),
            client_id: object.urn().basename().to_string(),
            hostname: text(attrs::HOST),
            last_seen,
            online: OnlineState::classify(last_seen, now),
            version: text(attrs::VERSION),
            mac: text(attrs::MAC),
            usernames: text(attrs::USERNAMES),
            install: time(attrs::INSTALL),
        }
    }

    /// "42 seconds", "3 hours", ... since last contact.
    pub fn last_seen_text(&self, now: DateTime<Utc>) -> Option<String> {
        let secs = (now - self.last_seen?).num_seconds().max(0);
        Some(if secs < 60 {
            format!("{} seconds", secs)
        } else if secs < 60 * 60 {
            format!("{} minutes", secs / 60)
        } else if secs < 60 * 60 * 24 {
            format!("{} hours", secs / (60 * 60))
        } else {
            format!("{} days", secs / (60 * 60 * 24))
        })
    }
}

/// Summary of one client. The token must also pass the client's
/// `acl_check` checkpoint, so callers without an approval get
/// `AccessDenied` rather than partial data.
pub fn client_summary(store: &ObjectStore, token: &Token, client_id: &str) -> QueryResult<ClientSummary> {
    let urn = Urn::new(client_id);
    let client = store.open_as(&urn, types::CLIENT, token, AccessMode::Read)?;
    store.authorize(&urn.add("acl_check"), token, AccessMode::Read)?;
    Ok(ClientSummary::from_object(&client, Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_state_thresholds() {
        let now = Utc::now();
        assert_eq!(OnlineState::classify(None, now), OnlineState::Offline);
        assert_eq!(
            OnlineState::classify(Some(now - Duration::minutes(14)), now),
            OnlineState::Online
        );
        assert_eq!(
            OnlineState::classify(Some(now - Duration::hours(3)), now),
            OnlineState::SeenToday
        );
        assert_eq!(
            OnlineState::classify(Some(now - Duration::days(2)), now),
            OnlineState::Offline
        );
    }

    #[test]
    fn test_summary_reads_declared_attributes() {
        let store = ObjectStore::in_memory();
        let token = Token::system();
        let seen = Utc::now() - Duration::minutes(5);
        let mut client = store
            .create(&Urn::new("C.00aa"), types::CLIENT, AccessMode::Write, &token)
            .unwrap();
        client.set(attrs::HOST, "web-01").unwrap();
        client.set(attrs::MAC, "aa:bb:cc").unwrap();
        client.set(attrs::CLOCK, seen).unwrap();
        client.close().unwrap();

        let summary = client_summary(&store, &token, "C.00aa").unwrap();
        assert_eq!(summary.client_id, "C.00aa");
        assert_eq!(summary.hostname.as_deref(), Some("web-01"));
        assert_eq!(summary.mac.as_deref(), Some("aa:bb:cc"));
        assert_eq!(summary.online, OnlineState::Online);
        assert!(summary.version.is_none());
        assert_eq!(summary.last_seen_text(seen + Duration::hours(2)).unwrap(), "2 hours");
    }
}
