//! Access rule engine.
//!
//! Loads the declarative rule tree from its backing document, compiles
//! string rules into predicates, answers `user_has_access` for every data
//! operation, and watches the document for external edits. Reload swaps
//! the compiled tree atomically: concurrent readers see either the old or
//! the new tree, never a partially built one.

pub mod expr;
pub mod tree;

use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

use crate::auth::account::AuthCtx;
use crate::core::app::DefaultAccessPolicy;
use crate::prelude::*;

pub use self::tree::{AccessResult, RuleTree};

const WATCH_INTERVAL: Duration = Duration::from_secs(2);

/// Paths whose first segment starts with this prefix are server-internal
const PRIVATE_PREFIX: &str = "__";

pub struct RuleEngine {
	/// When false, every check allows (authorization globally disabled)
	enabled: bool,
	file: Box<Path>,
	tree: RwLock<Arc<RuleTree>>,
	last_modified: Mutex<Option<SystemTime>>,
	watch: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RuleEngine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RuleEngine")
			.field("enabled", &self.enabled)
			.field("file", &self.file)
			.finish_non_exhaustive()
	}
}

fn default_document(policy: DefaultAccessPolicy) -> Value {
	let rule: Value = match policy {
		DefaultAccessPolicy::Deny => Value::Bool(false),
		DefaultAccessPolicy::Allow => Value::Bool(true),
		DefaultAccessPolicy::AllowAuthenticated => Value::String("auth !== null".into()),
	};
	json!({ "rules": { ".read": rule, ".write": rule } })
}

impl RuleEngine {
	/// Read the rule document, synthesizing and persisting a default tree
	/// when it is absent or malformed.
	pub async fn load(
		file: &Path,
		default_access: DefaultAccessPolicy,
		enabled: bool,
	) -> CnResult<Arc<RuleEngine>> {
		let (tree, modified) = Self::read_document(file, default_access).await?;

		let engine = Arc::new(RuleEngine {
			enabled,
			file: file.into(),
			tree: RwLock::new(Arc::new(tree)),
			last_modified: Mutex::new(modified),
			watch: Mutex::new(None),
		});
		engine.start_watch();
		Ok(engine)
	}

	async fn read_document(
		file: &Path,
		default_access: DefaultAccessPolicy,
	) -> CnResult<(RuleTree, Option<SystemTime>)> {
		match tokio::fs::read(file).await {
			Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)
				.map_err(Error::from)
				.and_then(|doc| RuleTree::from_document(&doc))
			{
				Ok(tree) => {
					let modified = tokio::fs::metadata(file).await.ok().and_then(|m| m.modified().ok());
					Ok((tree, modified))
				}
				Err(err) => {
					error!("Malformed rule document {}: {}; using default rules", file.display(), err);
					Self::write_default(file, default_access).await
				}
			},
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
				Self::write_default(file, default_access).await
			}
			Err(err) => Err(err.into()),
		}
	}

	async fn write_default(
		file: &Path,
		default_access: DefaultAccessPolicy,
	) -> CnResult<(RuleTree, Option<SystemTime>)> {
		let doc = default_document(default_access);
		let tree = RuleTree::from_document(&doc)?;

		if let Some(parent) = file.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		let pretty = serde_json::to_string_pretty(&doc)?;
		tokio::fs::write(file, pretty).await?;
		info!("Persisted default rule document to {}", file.display());

		let modified = tokio::fs::metadata(file).await.ok().and_then(|m| m.modified().ok());
		Ok((tree, modified))
	}

	/// Poll the backing file and swap the tree when it changes externally
	fn start_watch(self: &Arc<Self>) {
		let engine = Arc::clone(self);
		let handle = tokio::spawn(async move {
			let mut interval = tokio::time::interval(WATCH_INTERVAL);
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				interval.tick().await;
				let modified =
					tokio::fs::metadata(&engine.file).await.ok().and_then(|m| m.modified().ok());
				let changed = {
					let last = engine.last_modified.lock();
					modified.is_some() && modified != *last
				};
				if changed {
					engine.reload(modified).await;
				}
			}
		});
		*self.watch.lock() = Some(handle);
	}

	async fn reload(&self, modified: Option<SystemTime>) {
		match tokio::fs::read(&self.file).await {
			Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)
				.map_err(Error::from)
				.and_then(|doc| RuleTree::from_document(&doc))
			{
				Ok(tree) => {
					*self.tree.write() = Arc::new(tree);
					*self.last_modified.lock() = modified;
					info!("Reloaded rule document {}", self.file.display());
				}
				Err(err) => {
					// Keep serving the previous tree rather than dropping to
					// weaker or broken rules mid-flight
					error!("Failed to reload rule document {}: {}", self.file.display(), err);
					*self.last_modified.lock() = modified;
				}
			},
			Err(err) => {
				error!("Failed to read rule document {}: {}", self.file.display(), err);
			}
		}
	}

	/// Re-read the rule document immediately, without waiting for the
	/// watch interval
	pub async fn reload_now(&self) {
		let modified =
			tokio::fs::metadata(&self.file).await.ok().and_then(|m| m.modified().ok());
		self.reload(modified).await;
	}

	/// Cancel the file watch. Idempotent; called once at shutdown.
	pub fn stop(&self) {
		if let Some(handle) = self.watch.lock().take() {
			handle.abort();
			debug!("Rule watch stopped");
		}
	}

	pub fn current_tree(&self) -> Arc<RuleTree> {
		Arc::clone(&self.tree.read())
	}

	/// Answer the read/write authorization question for `(auth, path)`
	pub fn user_has_access(
		&self,
		auth: Option<&AuthCtx>,
		path: &str,
		write: bool,
	) -> AccessResult {
		if !self.enabled {
			return AccessResult::allow(None);
		}

		if auth.is_some_and(AuthCtx::is_admin) {
			return AccessResult::allow(None);
		}

		let first_segment = path.split('/').find(|s| !s.is_empty()).unwrap_or("");
		if first_segment.starts_with(PRIVATE_PREFIX) {
			let result =
				AccessResult::deny("private", "this path is for internal use only", None);
			self.log_denial(auth, path, &result, write);
			return result;
		}

		let tree = self.current_tree();
		let result = tree.check(auth, path, write);
		if !result.allow {
			self.log_denial(auth, path, &result, write);
		}
		result
	}

	fn log_denial(&self, auth: Option<&AuthCtx>, path: &str, result: &AccessResult, write: bool) {
		warn!(
			uid = auth.map(|a| a.uid.as_ref()).unwrap_or("anonymous"),
			path,
			write,
			code = result.code.as_deref().unwrap_or(""),
			rule_path = result.rule_path.as_deref().unwrap_or(""),
			"access denied"
		);
	}
}

impl Drop for RuleEngine {
	fn drop(&mut self) {
		self.stop();
	}
}

// vim: ts=4
