//! Server bootstrap.
//!
//! Order matters: the server salt is loaded (or generated) before anything
//! that could touch a token, then the admin account, then the rule engine,
//! and only then the listener. A missing salt aborts startup.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::auth::cache::SessionCache;
use crate::auth::store;
use crate::core::app::{AppState, RunOpts, VERSION};
use crate::prelude::*;
use crate::routes;
use crate::rules::RuleEngine;
use crate::ws::connection::ClientRegistry;

/// Initialize tracing from `RUST_LOG` (falls back to `info`)
pub fn init_logging() {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Read server options from `CANOPY_*` environment variables
pub fn opts_from_env() -> CnResult<crate::core::app::ServerOpts> {
	use crate::core::app::ServerOpts;
	use std::env;

	let mut opts = ServerOpts::default();
	if let Ok(listen) = env::var("CANOPY_LISTEN") {
		opts.listen = listen.into();
	}
	if let Ok(db_name) = env::var("CANOPY_DB_NAME") {
		opts.db_name = db_name.into();
	}
	if let Ok(data_dir) = env::var("CANOPY_DATA_DIR") {
		opts.rules_file = std::path::PathBuf::from(data_dir).join("rules.json").into();
	}
	if let Ok(rules_file) = env::var("CANOPY_RULES_FILE") {
		opts.rules_file = std::path::PathBuf::from(rules_file).into();
	}
	if let Ok(auth) = env::var("CANOPY_AUTH") {
		opts.auth_enabled = auth != "false" && auth != "0";
	}
	if let Ok(policy) = env::var("CANOPY_DEFAULT_ACCESS") {
		opts.default_access = policy.parse()?;
	}
	if let Ok(password) = env::var("CANOPY_ADMIN_PASSWORD") {
		opts.admin_password = Some(password.into());
	}
	if let Ok(registration) = env::var("CANOPY_REGISTRATION") {
		opts.registration_enabled = registration != "false" && registration != "0";
	}
	Ok(opts)
}

/// Build the shared app state, running the startup sequence
pub async fn build_app(run_opts: RunOpts) -> CnResult<App> {
	let RunOpts { opts, db_adapter, audit_adapter, oauth_providers } = run_opts;

	let server_salt = store::ensure_server_salt(db_adapter.as_ref()).await?;
	store::ensure_admin_account(
		db_adapter.as_ref(),
		audit_adapter.as_ref(),
		opts.admin_password.as_deref(),
	)
	.await?;

	let rules =
		RuleEngine::load(&opts.rules_file, opts.default_access, opts.auth_enabled).await?;

	let oauth_providers: HashMap<_, _> = oauth_providers
		.into_iter()
		.map(|provider| (Box::from(provider.name()), provider))
		.collect();

	Ok(Arc::new(AppState {
		opts,
		server_salt,
		db_adapter,
		audit_adapter,
		oauth_providers,
		rules,
		session_cache: SessionCache::new(),
		clients: ClientRegistry::new(),
	}))
}

/// Run the gateway until interrupted
pub async fn run(run_opts: RunOpts) -> CnResult<()> {
	let app = build_app(run_opts).await?;

	let listener = tokio::net::TcpListener::bind(app.opts.listen.as_ref()).await?;
	info!("Canopy v{} listening on {}", VERSION, app.opts.listen);

	let router = routes::init(app.clone());
	axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
		.with_graceful_shutdown(shutdown_signal())
		.await?;

	app.rules.stop();
	info!("Canopy stopped");
	Ok(())
}

async fn shutdown_signal() {
	if tokio::signal::ctrl_c().await.is_err() {
		error!("Failed to install interrupt handler");
		return;
	}
	info!("Interrupt received; shutting down");
}

// vim: ts=4
