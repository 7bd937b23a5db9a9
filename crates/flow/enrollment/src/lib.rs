//! Client enrolment.
//!
//! A new agent generates a key pair and sends a self-signed CSR, unsolicited,
//! to the well-known `CA:Enrol` session. The [`Enroler`] checks that the
//! CSR's common name is the id derived from its public key, drops repeats,
//! and starts a [`CaEnroler`] flow. That flow signs the request through the
//! configured [`SigningOracle`], stores the certificate on the client object
//! and sends it back; once the client confirms, it starts [`Interrogate`].

#![deny(unsafe_code)]

pub mod certificate;
pub mod enroler;
pub mod error;
pub mod flows;
pub mod oracle;

pub use certificate::{
    client_id_for, serial_for, Certificate, CertificateMessage, CertificateType, SigningRequest,
    Subject,
};
pub use enroler::{Enroler, DEFAULT_CACHE_CAPACITY, ENROLMENT_NAME, ENROLMENT_QUEUE};
pub use error::{SigningError, SigningResult};
pub use flows::{CaEnroler, Interrogate, PlatformInfo, UserInfo};
pub use oracle::{Ed25519SigningOracle, SigningOracle, DEFAULT_CLOCK_SKEW_SECS, DEFAULT_VALIDITY_DAYS};

use warden_flow_engine::FlowRegistry;
use warden_flow_types::FlowResult;

/// Add the enrolment flows to `registry`.
pub fn register_flows(registry: FlowRegistry) -> FlowResult<FlowRegistry> {
    registry.register::<CaEnroler>()?.register::<Interrogate>()
}
