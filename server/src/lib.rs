//! Canopy is a network-facing gateway for a hierarchical key-value database.
//!
//! # Features
//!
//! - Path-based access control
//!		- declarative rule tree with wildcard/variable segments
//!		- string rules compiled by a closed-grammar expression evaluator
//!		- live reload of the rule document, atomic for readers
//!	- Authentication
//!		- username/email/password, bearer-token, and OAuth identity flows
//!		- HMAC-signed public tokens decodable without a database hit
//!		- bounded in-memory session cache
//!	- Realtime broker over WebSocket
//!		- per-connection subscription tracking with access re-checks on
//!		  every delivered event
//!		- brokered read-modify-write transactions with a fixed deadline
//!		- full reversal of storage registrations on disconnect
//!
//! The storage engine itself is a capability injected through
//! [`canopy_types::db_adapter::DbAdapter`]; Canopy never touches its
//! on-disk format.

#![forbid(unsafe_code)]

pub mod auth;
pub mod core;
pub mod prelude;
pub mod routes;
pub mod rules;
pub mod ws;

pub use crate::core::app::{App, AppState, DefaultAccessPolicy, RunOpts, ServerOpts};
pub use crate::core::bootstrap::{build_app, run};

// vim: ts=4
