//! Access tokens and the policies that check them.

use crate::error::{StoreError, StoreResult};
use crate::urn::Urn;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Authorization credential carried through every store operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub username: String,
    /// Justification for the access.
    pub reason: String,
    #[serde(default)]
    pub supervisor: bool,
    /// Client ids this token holds an approval for.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub approvals: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl Token {
    pub fn new(username: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            reason: reason.into(),
            supervisor: false,
            approvals: BTreeSet::new(),
            expiry: None,
        }
    }

    /// Supervisor token used by internal flows.
    pub fn system() -> Self {
        Self::new("system", "internal").as_supervisor()
    }

    pub fn as_supervisor(mut self) -> Self {
        self.supervisor = true;
        self
    }

    pub fn with_approval(mut self, client_id: impl Into<String>) -> Self {
        self.approvals.insert(client_id.into());
        self
    }

    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }

    pub fn has_approval(&self, client_id: &str) -> bool {
        self.approvals.contains(client_id)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.username, self.reason)
    }
}

/// Requested access on open/create.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub fn can_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

impl std::str::FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(Self::Read),
            "w" => Ok(Self::Write),
            "rw" => Ok(Self::ReadWrite),
            other => Err(format!("unknown access mode: {}", other)),
        }
    }
}

/// Decides whether a token may access a URN.
pub trait AccessPolicy: Send + Sync {
    fn check(&self, urn: &Urn, token: &Token, mode: AccessMode) -> StoreResult<()>;
}

/// Grants everything. For tests and trusted internal wiring.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn check(&self, _urn: &Urn, _token: &Token, _mode: AccessMode) -> StoreResult<()> {
        Ok(())
    }
}

/// Approval-based access control.
///
/// Client objects themselves are readable by any named token so client
/// lists can be rendered. Anything below a client, including the
/// `acl_check` checkpoint, needs a supervisor token or an approval for
/// that client with a stated reason. Writes need the same.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApprovalPolicy;

impl ApprovalPolicy {
    fn deny(urn: &Urn, reason: impl Into<String>) -> StoreError {
        StoreError::AccessDenied {
            urn: urn.clone(),
            reason: reason.into(),
        }
    }
}

impl AccessPolicy for ApprovalPolicy {
    fn check(&self, urn: &Urn, token: &Token, mode: AccessMode) -> StoreResult<()> {
        if token.is_expired(Utc::now()) {
            return Err(Self::deny(urn, "token expired"));
        }
        if token.supervisor {
            return Ok(());
        }
        if token.username.is_empty() {
            return Err(Self::deny(urn, "anonymous token"));
        }

        let client_id = urn.client_id();
        let below_client = client_id.is_some() && urn.depth() > 1;
        if !below_client && !mode.can_write() {
            return Ok(());
        }

        match client_id {
            Some(client_id) if token.has_approval(client_id) => {
                if token.reason.trim().is_empty() {
                    Err(Self::deny(urn, "approval requires a reason"))
                } else {
                    Ok(())
                }
            }
            Some(client_id) => Err(Self::deny(
                urn,
                format!("no approval for client {}", client_id),
            )),
            None => Err(Self::deny(urn, "write requires supervisor")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_client_object_readable_by_named_token() {
        let token = Token::new("analyst", "");
        assert!(ApprovalPolicy
            .check(&Urn::new("C.1234"), &token, AccessMode::Read)
            .is_ok());
    }

    #[test]
    fn test_below_client_requires_approval() {
        let policy = ApprovalPolicy;
        let checkpoint = Urn::new("C.1234/acl_check");

        let plain = Token::new("analyst", "case 7");
        assert!(matches!(
            policy.check(&checkpoint, &plain, AccessMode::Read),
            Err(StoreError::AccessDenied { .. })
        ));

        let approved = plain.clone().with_approval("C.1234");
        assert!(policy.check(&checkpoint, &approved, AccessMode::Read).is_ok());

        let no_reason = Token::new("analyst", " ").with_approval("C.1234");
        assert!(policy.check(&checkpoint, &no_reason, AccessMode::Read).is_err());
    }

    #[test]
    fn test_writes_and_expiry() {
        let policy = ApprovalPolicy;
        let token = Token::new("analyst", "case 7");
        assert!(policy.check(&Urn::new("C.1"), &token, AccessMode::Write).is_err());
        assert!(policy.check(&Urn::new("config"), &token, AccessMode::Write).is_err());
        assert!(policy
            .check(&Urn::new("C.1"), &Token::system(), AccessMode::ReadWrite)
            .is_ok());

        let expired = Token::system().with_expiry(Utc::now() - Duration::seconds(1));
        assert!(policy.check(&Urn::new("C.1"), &expired, AccessMode::Read).is_err());
    }

    #[test]
    fn test_access_mode_parse() {
        assert_eq!("rw".parse::<AccessMode>(), Ok(AccessMode::ReadWrite));
        assert!("x".parse::<AccessMode>().is_err());
        assert!(AccessMode::ReadWrite.can_read() && AccessMode::ReadWrite.can_write());
    }
}
