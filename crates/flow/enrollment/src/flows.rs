//! `CAEnroler` issues a certificate for one client; `Interrogate` collects
//! its first host facts once the client has stored that certificate.

use crate::certificate::CertificateMessage;
use crate::oracle::SigningOracle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use warden_flow_engine::{Flow, FlowContext, StateTable};
use warden_flow_types::{FlowError, FlowResult, ReplyStatus, Responses};
use warden_store::{attrs, types, AccessMode, AttributeValue};

// ── CA Enrolment ─────────────────────────────────────────────────────

/// Signs a client's CSR, records the certificate, and hands it back to the
/// client. Started by the [`Enroler`](crate::Enroler) well-known flow.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CaEnroler {
    /// Consumed by `Start`.
    pub csr: Option<CertificateMessage>,
}

impl CaEnroler {
    pub fn new(csr: CertificateMessage) -> Self {
        Self { csr: Some(csr) }
    }

    fn start(&mut self, ctx: &mut FlowContext, _: Responses) -> FlowResult<()> {
        let csr = self
            .csr
            .take()
            .ok_or_else(|| FlowError::MalformedRequest("must be started with a CSR".into()))?;
        let request = csr.signing_request()?;
        let client_id = request.validate()?;
        if ctx.require_client()? != &client_id {
            return Err(FlowError::MalformedRequest(format!(
                "CSR is for {} but the flow runs for {}",
                client_id,
                ctx.require_client()?
            )));
        }

        let oracle = ctx.service::<Arc<dyn SigningOracle>>()?.clone();
        let certificate = oracle.sign(&request, &client_id)?;
        let pem = certificate.to_pem()?;

        let mut client = ctx.store().create(
            &client_id.urn(),
            types::CLIENT,
            AccessMode::Write,
            ctx.token(),
        )?;
        if client.is_new() {
            client.set(attrs::FIRST_SEEN, Utc::now())?;
        }
        client.set(attrs::CERT, AttributeValue::Certificate(pem.clone()))?;
        client.close_with(true)?;
        ctx.telemetry().increment("certificates_issued");
        info!(
            session_id = %ctx.session_id(),
            client_id = %client_id,
            serial = certificate.serial,
            "Certificate issued"
        );

        ctx.call_client("SaveCert", CertificateMessage::crt(pem), "Done")?;
        Ok(())
    }

    fn done(&mut self, ctx: &mut FlowContext, responses: Responses) -> FlowResult<()> {
        if let ReplyStatus::Error(reason) = responses.status() {
            return Err(FlowError::Fatal(format!(
                "client could not save its certificate: {}",
                reason
            )));
        }
        let client_id = ctx.require_client()?.clone();
        ctx.start_flow(&Interrogate::default())?;
        ctx.log(format!("Enrolled {} successfully", client_id));
        info!(session_id = %ctx.session_id(), client_id = %client_id, "Client enrolled");
        Ok(())
    }
}

impl Flow for CaEnroler {
    const NAME: &'static str = "CAEnroler";

    fn state_table() -> StateTable<Self> {
        StateTable::new()
            .state("Start", Self::start)
            .state("Done", Self::done)
    }
}

// ── Interrogate ──────────────────────────────────────────────────────

/// Reply payload of `GetPlatformInfo`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub hostname: String,
    pub os_version: String,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub install_date: Option<DateTime<Utc>>,
}

/// One payload of an `EnumerateUsers` reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
}

/// Asks a newly enrolled client for its platform and users, both at once,
/// and writes what comes back onto the client object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Interrogate {
    pub hostname: Option<String>,
    pub usernames: Vec<String>,
}

impl Interrogate {
    fn start(&mut self, ctx: &mut FlowContext, _: Responses) -> FlowResult<()> {
        ctx.call_client("GetPlatformInfo", (), "Platform")?;
        ctx.call_client("EnumerateUsers", (), "Users")?;
        Ok(())
    }

    fn platform(&mut self, ctx: &mut FlowContext, responses: Responses) -> FlowResult<()> {
        if let ReplyStatus::Error(reason) = responses.status() {
            warn!(session_id = %ctx.session_id(), error = %reason, "GetPlatformInfo failed");
            ctx.log(format!("GetPlatformInfo failed: {}", reason));
            return Ok(());
        }
        let info: PlatformInfo = responses.first()?;
        let client_id = ctx.require_client()?.clone();

        let mut client = ctx.store().create(
            &client_id.urn(),
            types::CLIENT,
            AccessMode::Write,
            ctx.token(),
        )?;
        client.set(attrs::HOST, info.hostname.as_str())?;
        client.set(attrs::VERSION, info.os_version.as_str())?;
        if let Some(mac) = &info.mac_address {
            client.set(attrs::MAC, mac.as_str())?;
        }
        if let Some(installed) = info.install_date {
            client.set(attrs::INSTALL, installed)?;
        }
        client.set(attrs::CLOCK, Utc::now())?;
        client.close()?;

        self.hostname = Some(info.hostname);
        Ok(())
    }

    fn users(&mut self, ctx: &mut FlowContext, responses: Responses) -> FlowResult<()> {
        if let ReplyStatus::Error(reason) = responses.status() {
            warn!(session_id = %ctx.session_id(), error = %reason, "EnumerateUsers failed");
            ctx.log(format!("EnumerateUsers failed: {}", reason));
            return Ok(());
        }
        let users: Vec<UserInfo> = responses.decode_all()?;
        let client_id = ctx.require_client()?.clone();
        self.usernames = users.into_iter().map(|u| u.username).collect();

        let mut client = ctx.store().create(
            &client_id.urn(),
            types::CLIENT,
            AccessMode::Write,
            ctx.token(),
        )?;
        client.set(attrs::USERNAMES, self.usernames.join(" "))?;
        client.close()?;
        Ok(())
    }
}

impl Flow for Interrogate {
    const NAME: &'static str = "Interrogate";

    fn state_table() -> StateTable<Self> {
        StateTable::new()
            .state("Start", Self::start)
            .state("Platform", Self::platform)
            .state("Users", Self::users)
    }
}
