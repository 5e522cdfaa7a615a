pub mod app;
pub mod audit;
pub mod bootstrap;
pub mod export;
pub mod extract;
pub mod middleware;

pub use self::extract::{Auth, OptionalAuth};

// vim: ts=4
