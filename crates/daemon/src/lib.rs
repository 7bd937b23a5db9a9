//! Warden daemon library
//!
//! This module provides the pieces `wardend` is assembled from:
//! - Layered configuration
//! - The JSON-lines agent transport
//! - Server wiring, the timeout sweeper, and shutdown

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod server;
pub mod transport;

pub use config::{DaemonConfig, EnrollmentConfig, LoggingConfig, PersistenceConfig};
pub use error::{DaemonError, DaemonResult};
pub use server::Server;
pub use transport::{Inbound, JsonLinesWriter, Outbound};
