//! Shared test fixtures: an in-memory storage adapter with call
//! accounting, a recording audit sink, and an app builder wiring both into
//! the regular bootstrap path.

use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

use canopy::{App, DefaultAccessPolicy, RunOpts, ServerOpts, build_app};
use canopy_types::audit_adapter::AuditAdapter;
use canopy_types::db_adapter::{
	DataEvent, DbAdapter, DbTransaction, EventKind, FilterOp, QueryOptions, SubscribeOptions,
	Subscription,
};
use canopy_types::error::{CnResult, Error};

// In-memory storage adapter //
//***************************//

struct SubRecord {
	id: String,
	path: String,
	event: EventKind,
	sender: mpsc::UnboundedSender<DataEvent>,
}

#[derive(Default)]
struct Inner {
	root: Mutex<Value>,
	subs: Mutex<Vec<SubRecord>>,
	active_tx: Mutex<HashSet<String>>,
	next_id: AtomicUsize,
	subscribe_calls: AtomicUsize,
	unsubscribe_calls: AtomicUsize,
	commit_calls: AtomicUsize,
	rollback_calls: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemoryDb {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryDb {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MemoryDb").finish_non_exhaustive()
	}
}

fn segments(path: &str) -> Vec<&str> {
	path.split('/').filter(|s| !s.is_empty()).collect()
}

fn get_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
	let mut node = root;
	for segment in segments(path) {
		node = node.get(segment)?;
	}
	Some(node)
}

fn set_at(root: &mut Value, path: &str, value: Value) {
	let parts = segments(path);
	let mut node = root;
	for (index, segment) in parts.iter().enumerate() {
		if index == parts.len() - 1 {
			if !node.is_object() {
				*node = json!({});
			}
			if let Some(map) = node.as_object_mut() {
				map.insert((*segment).to_string(), value);
			}
			return;
		}
		if !node.get(*segment).is_some_and(Value::is_object) {
			if !node.is_object() {
				*node = json!({});
			}
			if let Some(map) = node.as_object_mut() {
				map.insert((*segment).to_string(), json!({}));
			}
		}
		node = match node.get_mut(*segment) {
			Some(child) => child,
			None => return,
		};
	}
}

fn remove_at(root: &mut Value, path: &str) {
	let parts = segments(path);
	let Some((last, parents)) = parts.split_last() else { return };
	let mut node = root;
	for segment in parents {
		match node.get_mut(*segment) {
			Some(child) => node = child,
			None => return,
		}
	}
	if let Some(map) = node.as_object_mut() {
		map.remove(*last);
	}
}

/// Segment-wise match allowing `*` and `$var` wildcards in the pattern
fn path_matches(pattern: &str, concrete: &str) -> bool {
	let pattern = segments(pattern);
	let concrete = segments(concrete);
	pattern.len() == concrete.len()
		&& pattern
			.iter()
			.zip(&concrete)
			.all(|(p, c)| *p == "*" || p.starts_with('$') || p == c)
}

fn parent_path(path: &str) -> Option<String> {
	let parts = segments(path);
	if parts.len() < 2 {
		if parts.len() == 1 { Some(String::new()) } else { None }
	} else {
		Some(parts[..parts.len() - 1].join("/"))
	}
}

impl MemoryDb {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn subscribe_calls(&self) -> usize {
		self.inner.subscribe_calls.load(Ordering::Relaxed)
	}

	pub fn unsubscribe_calls(&self) -> usize {
		self.inner.unsubscribe_calls.load(Ordering::Relaxed)
	}

	pub fn commit_calls(&self) -> usize {
		self.inner.commit_calls.load(Ordering::Relaxed)
	}

	pub fn rollback_calls(&self) -> usize {
		self.inner.rollback_calls.load(Ordering::Relaxed)
	}

	pub fn active_subscriptions(&self) -> usize {
		self.inner.subs.lock().len()
	}

	fn write(&self, path: &str, value: Value, context: Value) {
		{
			let mut root = self.inner.root.lock();
			set_at(&mut root, path, value.clone());
		}
		self.emit(path, value, context);
	}

	fn emit(&self, path: &str, value: Value, context: Value) {
		let parent = parent_path(path);
		let subs = self.inner.subs.lock();
		for sub in subs.iter() {
			let matches = match sub.event {
				EventKind::Value => path_matches(&sub.path, path),
				EventKind::ChildAdded | EventKind::ChildChanged | EventKind::Mutated => {
					parent.as_deref().is_some_and(|parent| path_matches(&sub.path, parent))
						|| path_matches(&sub.path, path)
				}
				EventKind::ChildRemoved => false,
			};
			if matches {
				let _ = sub.sender.send(DataEvent {
					path: path.into(),
					event: sub.event,
					value: value.clone(),
					context: context.clone(),
				});
			}
		}
	}
}

#[async_trait]
impl DbAdapter for MemoryDb {
	async fn get(&self, path: &str) -> CnResult<Option<Value>> {
		Ok(get_at(&self.inner.root.lock(), path).cloned())
	}

	async fn set(&self, path: &str, value: Value, context: Value) -> CnResult<()> {
		self.write(path, value, context);
		Ok(())
	}

	async fn update(&self, path: &str, value: Value, context: Value) -> CnResult<()> {
		let merged = {
			let root = self.inner.root.lock();
			match (get_at(&root, path), value.as_object()) {
				(Some(Value::Object(existing)), Some(patch)) => {
					let mut merged = existing.clone();
					for (key, member) in patch {
						merged.insert(key.clone(), member.clone());
					}
					Value::Object(merged)
				}
				_ => value,
			}
		};
		self.write(path, merged, context);
		Ok(())
	}

	async fn remove(&self, path: &str, _context: Value) -> CnResult<()> {
		remove_at(&mut self.inner.root.lock(), path);
		Ok(())
	}

	async fn exists(&self, path: &str) -> CnResult<bool> {
		Ok(get_at(&self.inner.root.lock(), path).is_some())
	}

	async fn query(&self, path: &str, opts: QueryOptions) -> CnResult<Vec<(Box<str>, Value)>> {
		let root = self.inner.root.lock();
		let Some(Value::Object(children)) = get_at(&root, path) else {
			return Ok(Vec::new());
		};

		let mut results = Vec::new();
		for (key, child) in children {
			let matches = opts.filters.iter().all(|filter| {
				let actual = child.get(&filter.field).unwrap_or(&Value::Null);
				match filter.op {
					FilterOp::Eq => actual == &filter.value,
					FilterOp::Ne => actual != &filter.value,
					FilterOp::Gt => as_f64(actual) > as_f64(&filter.value),
					FilterOp::Lt => as_f64(actual) < as_f64(&filter.value),
				}
			});
			if matches {
				results.push((format!("{}/{}", path, key).into(), child.clone()));
			}
			if let Some(limit) = opts.limit {
				if results.len() >= limit as usize {
					break;
				}
			}
		}
		Ok(results)
	}

	async fn subscribe(&self, opts: SubscribeOptions) -> CnResult<Subscription> {
		self.inner.subscribe_calls.fetch_add(1, Ordering::Relaxed);
		let id = format!("sub-{}", self.inner.next_id.fetch_add(1, Ordering::Relaxed));
		let (sender, receiver) = mpsc::unbounded_channel();
		self.inner.subs.lock().push(SubRecord {
			id: id.clone(),
			path: opts.path.to_string(),
			event: opts.event,
			sender,
		});

		let stream: Pin<Box<dyn Stream<Item = DataEvent> + Send>> =
			Box::pin(futures::stream::unfold(receiver, |mut receiver| async move {
				receiver.recv().await.map(|event| (event, receiver))
			}));
		Ok(Subscription { id: id.into(), stream })
	}

	async fn unsubscribe(&self, _path: &str, _event: EventKind, sub_id: &str) -> CnResult<()> {
		self.inner.unsubscribe_calls.fetch_add(1, Ordering::Relaxed);
		self.inner.subs.lock().retain(|sub| sub.id != sub_id);
		Ok(())
	}

	async fn transaction(&self, path: &str, context: Value) -> CnResult<Box<dyn DbTransaction>> {
		{
			let mut active = self.inner.active_tx.lock();
			if !active.insert(path.to_string()) {
				// One transaction slot per path
				return Err(Error::DbError);
			}
		}
		let current = get_at(&self.inner.root.lock(), path).cloned().unwrap_or(Value::Null);
		Ok(Box::new(MemTransaction {
			db: self.clone(),
			path: path.to_string(),
			context,
			current,
			open: true,
		}))
	}
}

fn as_f64(value: &Value) -> f64 {
	value.as_f64().unwrap_or(f64::NAN)
}

struct MemTransaction {
	db: MemoryDb,
	path: String,
	context: Value,
	current: Value,
	open: bool,
}

#[async_trait]
impl DbTransaction for MemTransaction {
	async fn current(&self) -> CnResult<Value> {
		Ok(self.current.clone())
	}

	async fn commit(&mut self, value: Value) -> CnResult<Box<str>> {
		if !self.open {
			return Err(Error::Internal("transaction already finished".into()));
		}
		self.open = false;
		self.db.inner.active_tx.lock().remove(&self.path);
		self.db.inner.commit_calls.fetch_add(1, Ordering::Relaxed);
		self.db.write(&self.path, value, self.context.clone());
		let cursor = format!("cursor-{}", self.db.inner.next_id.fetch_add(1, Ordering::Relaxed));
		Ok(cursor.into())
	}

	async fn rollback(&mut self) -> CnResult<()> {
		if !self.open {
			return Err(Error::Internal("transaction already finished".into()));
		}
		self.open = false;
		self.db.inner.active_tx.lock().remove(&self.path);
		self.db.inner.rollback_calls.fetch_add(1, Ordering::Relaxed);
		Ok(())
	}
}

// Recording audit sink //
//**********************//

#[derive(Debug, Clone)]
pub struct AuditEntry {
	pub level: &'static str,
	pub action: String,
	pub code: Option<String>,
	pub details: Value,
}

#[derive(Debug, Default)]
pub struct RecordingAudit {
	entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAudit {
	pub fn entries(&self) -> Vec<AuditEntry> {
		self.entries.lock().clone()
	}

	pub fn count(&self, action: &str, code: Option<&str>) -> usize {
		self.entries
			.lock()
			.iter()
			.filter(|e| e.action == action && e.code.as_deref() == code)
			.count()
	}
}

#[async_trait]
impl AuditAdapter for RecordingAudit {
	async fn event(&self, action: &str, details: Value) {
		self.entries.lock().push(AuditEntry {
			level: "event",
			action: action.to_string(),
			code: None,
			details,
		});
	}

	async fn warning(&self, action: &str, code: &str, details: Value) {
		self.entries.lock().push(AuditEntry {
			level: "warning",
			action: action.to_string(),
			code: Some(code.to_string()),
			details,
		});
	}

	async fn error(&self, action: &str, code: &str, details: Value) {
		self.entries.lock().push(AuditEntry {
			level: "error",
			action: action.to_string(),
			code: Some(code.to_string()),
			details,
		});
	}
}

/// Blank account record for seeding test fixtures
pub fn blank_account(uid: &str) -> canopy::auth::UserAccount {
	canopy::auth::UserAccount {
		uid: uid.into(),
		username: None,
		email: None,
		password: None,
		password_salt: None,
		access_token: None,
		access_token_created: None,
		display_name: uid.into(),
		picture: None,
		settings: std::collections::BTreeMap::new(),
		is_disabled: false,
		email_verified: false,
		password_reset_code: None,
		created: canopy_types::types::Timestamp::now(),
		created_ip: None,
		last_signin: None,
		last_signin_ip: None,
		prev_signin: None,
		prev_signin_ip: None,
	}
}

// App builder //
//*************//

pub struct TestApp {
	pub app: App,
	pub db: MemoryDb,
	pub audit: Arc<RecordingAudit>,
	// Holds the rules file alive for the app's lifetime
	_dir: tempfile::TempDir,
}

impl TestApp {
	pub fn rules_file(&self) -> &std::path::Path {
		&self.app.opts.rules_file
	}
}

/// Build an app against the in-memory adapter. `rules` replaces the rule
/// document; without it the default policy synthesizes one.
pub async fn test_app(rules: Option<Value>, policy: DefaultAccessPolicy) -> TestApp {
	let dir = tempfile::tempdir().expect("tempdir");
	let rules_file = dir.path().join("rules.json");
	if let Some(rules) = rules {
		std::fs::write(&rules_file, rules.to_string()).expect("write rules");
	}

	let db = MemoryDb::new();
	let audit = Arc::new(RecordingAudit::default());
	let opts = ServerOpts {
		rules_file: rules_file.into(),
		default_access: policy,
		admin_password: Some("admin-secret-pw".into()),
		..ServerOpts::default()
	};

	let app = build_app(RunOpts {
		opts,
		db_adapter: Arc::new(db.clone()),
		audit_adapter: audit.clone(),
		oauth_providers: Vec::new(),
	})
	.await
	.expect("build app");

	TestApp { app, db, audit, _dir: dir }
}

// vim: ts=4
