//! App state type

use std::{collections::HashMap, path::Path, sync::Arc};

use canopy_types::audit_adapter::AuditAdapter;
use canopy_types::db_adapter::DbAdapter;
use canopy_types::oauth_adapter::OAuthProvider;

use crate::auth::cache::SessionCache;
use crate::rules::RuleEngine;
use crate::ws::connection::ClientRegistry;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Access policy used when no rule document exists yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAccessPolicy {
	Deny,
	Allow,
	AllowAuthenticated,
}

impl std::str::FromStr for DefaultAccessPolicy {
	type Err = canopy_types::error::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"deny" => Ok(Self::Deny),
			"allow" => Ok(Self::Allow),
			"auth" => Ok(Self::AllowAuthenticated),
			other => Err(canopy_types::error::Error::ConfigError(format!(
				"unknown default access policy: {} (expected deny|allow|auth)",
				other
			))),
		}
	}
}

#[derive(Debug)]
pub struct ServerOpts {
	pub listen: Box<str>,
	/// Database name expected in the `{db}` segment of every route
	pub db_name: Box<str>,
	/// Rule document location, watched for external edits
	pub rules_file: Box<Path>,
	/// When false, every access check passes
	pub auth_enabled: bool,
	pub default_access: DefaultAccessPolicy,
	/// Password for the bootstrapped admin account
	pub admin_password: Option<Box<str>>,
	pub registration_enabled: bool,
}

impl Default for ServerOpts {
	fn default() -> Self {
		Self {
			listen: "127.0.0.1:5757".into(),
			db_name: "default".into(),
			rules_file: Path::new("./data/rules.json").into(),
			auth_enabled: true,
			default_access: DefaultAccessPolicy::Deny,
			admin_password: None,
			registration_enabled: true,
		}
	}
}

/// Adapters and options handed to [`crate::run`] by the embedding binary
pub struct RunOpts {
	pub opts: ServerOpts,
	pub db_adapter: Arc<dyn DbAdapter>,
	pub audit_adapter: Arc<dyn AuditAdapter>,
	pub oauth_providers: Vec<Arc<dyn OAuthProvider>>,
}

pub struct AppState {
	pub opts: ServerOpts,
	/// Process-wide token-signing salt; loaded before the listener starts
	pub server_salt: Box<str>,

	pub db_adapter: Arc<dyn DbAdapter>,
	pub audit_adapter: Arc<dyn AuditAdapter>,
	pub oauth_providers: HashMap<Box<str>, Arc<dyn OAuthProvider>>,

	pub rules: Arc<RuleEngine>,
	pub session_cache: SessionCache,
	pub clients: ClientRegistry,
}

pub type App = Arc<AppState>;

// vim: ts=4
