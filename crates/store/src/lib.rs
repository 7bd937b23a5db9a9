//! Warden object store.
//!
//! Objects are addressed by [`Urn`], typed by a [`Schema`], and hold
//! timestamped versions of their attributes. Access goes through
//! [`ObjectStore::open`] / [`ObjectStore::create`], which check the caller's
//! [`Token`] against the configured [`AccessPolicy`] and return an
//! [`Aff4Object`] handle that buffers writes until it is flushed.
//!
//! ```rust
//! use warden_store::{attrs, types, AccessMode, ObjectStore, Token, Urn};
//!
//! let store = ObjectStore::in_memory();
//! let token = Token::system();
//! let urn = Urn::new("C.0000000000000001");
//!
//! let mut client = store.create(&urn, types::CLIENT, AccessMode::Write, &token)?;
//! client.set(attrs::HOST, "web-01")?;
//! client.close()?;
//!
//! let client = store.open(&urn, &token, AccessMode::Read)?;
//! assert_eq!(client.get(attrs::HOST).unwrap().to_text(), "web-01");
//! # Ok::<(), warden_store::StoreError>(())
//! ```

#![deny(unsafe_code)]

pub mod attribute;
pub mod backend;
pub mod error;
pub mod handle;
pub mod index;
pub mod object_store;
pub mod schema;
pub mod timeseries;
pub mod token;
pub mod urn;
pub mod value;

pub use attribute::{AttributeHistory, AttributeVersion};
pub use backend::{Commit, MemoryBackend, PendingWrite, StoreBackend, StoredObject};
pub use error::{StoreError, StoreResult};
pub use handle::Aff4Object;
pub use index::ClientIndex;
pub use object_store::{ObjectStore, ObjectStoreBuilder, Scan};
pub use schema::{attrs, types, AttributeSpec, Schema, SchemaRegistry, DEFAULT_HISTORY_LIMIT};
pub use timeseries::TimeSeries;
pub use token::{AccessMode, AccessPolicy, AllowAll, ApprovalPolicy, Token};
pub use urn::Urn;
pub use value::{AttributeValue, Event, Literal, ValueKind};
