//! The well-known session agents send their CSRs to.

use crate::certificate::CertificateMessage;
use crate::flows::CaEnroler;
use tracing::{debug, info};
use warden_cache::FastStore;
use warden_flow_engine::{FlowLaunch, FlowLauncher, WellKnownFlow};
use warden_flow_types::{ClientId, ClientMessage, FlowError, FlowResult, SessionId};

pub const ENROLMENT_QUEUE: &str = "CA";
pub const ENROLMENT_NAME: &str = "Enrol";
pub const DEFAULT_CACHE_CAPACITY: usize = 500;

/// Starts one [`CaEnroler`] per client.
///
/// Agents resend their CSR until they get a certificate, so the same
/// request arrives many times, often concurrently. Clients seen recently
/// are remembered in a bounded cache and their repeats are dropped.
pub struct Enroler {
    session_id: SessionId,
    seen: FastStore<ClientId, ()>,
}

impl Enroler {
    pub fn new(session_id: SessionId, cache_capacity: usize) -> Self {
        Self {
            session_id,
            seen: FastStore::new(cache_capacity),
        }
    }

    /// Clients currently remembered.
    pub fn cached(&self) -> usize {
        self.seen.len()
    }

    pub fn is_cached(&self, client_id: &ClientId) -> bool {
        self.seen.contains(client_id)
    }
}

impl Default for Enroler {
    fn default() -> Self {
        Self::new(
            SessionId::well_known(ENROLMENT_QUEUE, ENROLMENT_NAME),
            DEFAULT_CACHE_CAPACITY,
        )
    }
}

impl WellKnownFlow for Enroler {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn process_message(
        &self,
        message: &ClientMessage,
        launcher: &dyn FlowLauncher,
    ) -> FlowResult<()> {
        let csr: CertificateMessage = message.payload()?;
        let client_id = csr.signing_request()?.validate()?;
        if let Some(source) = &message.source {
            if source != &client_id {
                return Err(FlowError::MalformedRequest(format!(
                    "{} sent a CSR for {}",
                    source, client_id
                )));
            }
        }

        if !self.seen.check_and_insert(client_id.clone(), ()) {
            launcher.telemetry().increment("enrolment_duplicates");
            debug!(client_id = %client_id, "Enrolment already under way, dropping CSR");
            return Ok(());
        }

        let launch = FlowLaunch::new(&CaEnroler::new(csr))?
            .with_client(client_id.clone())
            .with_queue(self.session_id.queue());
        match launcher.launch(launch) {
            Ok(session_id) => {
                info!(client_id = %client_id, session_id = %session_id, "Enrolment started");
                Ok(())
            }
            Err(e) => {
                self.seen.remove(&client_id);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Enroler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enroler")
            .field("session_id", &self.session_id)
            .field("cached", &self.seen.len())
            .field("capacity", &self.seen.capacity())
            .finish()
    }
}
