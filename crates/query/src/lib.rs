//! Warden query layer.
//!
//! A small filter algebra over store objects and time-series events, a
//! compiler from query strings to filter trees, and the read-only search
//! and summary calls the front-end uses.
//!
//! ```rust
//! use warden_query::{compile, Filter};
//! use warden_store::{attrs, types, AccessMode, ObjectStore, Token, Urn};
//!
//! let store = ObjectStore::in_memory();
//! let token = Token::system();
//! let mut client = store.create(&Urn::new("C.1"), types::CLIENT, AccessMode::Write, &token)?;
//! client.set(attrs::HOST, "foo.example.com")?;
//! client.close()?;
//!
//! let filter = compile("Host contains 'foo' and type = Client")?;
//! let hits = filter.filter(store.scan(types::CLIENT, &token)?).count();
//! assert_eq!(hits, 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]

pub mod error;
pub mod filter;
pub mod lexer;
pub mod navigation;
pub mod parser;
pub mod search;
pub mod shorthand;
pub mod summary;
pub mod timeline;

pub use error::{QueryError, QueryResult};
pub use filter::{
    AndFilter, CompareOp, Filter, Filtered, HasPredicateFilter, IdentityFilter, OrFilter,
    PredicateCompareFilter, PredicateContainsFilter, Subject, SubjectContainsFilter,
};
pub use navigation::{Behaviour, Category, NavigationRegistry};
pub use parser::{compile, Expr, Parser};
pub use search::{query_type, root_query, search_clients, QueryWindow, SEARCH_TIMING};
pub use summary::{client_summary, ClientSummary, OnlineState};
pub use timeline::{EventQuery, TimeSeriesQuery};
