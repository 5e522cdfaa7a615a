//! Authentication and account management: credential store, session cache,
//! token codec, sign-in flows, and the `/auth/{db}` HTTP surface.

pub mod account;
pub mod cache;
pub mod handler;
pub mod oauth;
pub mod password;
pub mod signin;
pub mod store;
pub mod token;

pub use self::account::{ADMIN_UID, AuthCtx, UserAccount};
pub use self::signin::{Credentials, sign_in};

// vim: ts=4
