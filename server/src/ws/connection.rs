//! Connection manager.
//!
//! One [`ConnectedClient`] record per live persistent connection, owned by
//! the [`ClientRegistry`]. All mutation of a client's sub-maps goes through
//! the methods here and is only ever triggered by that connection's own
//! events, the timers it armed, or the disconnect handler — the
//! single-writer-per-connection invariant holds by construction.

use axum::extract::ws::Message;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::auth::account::{AuthCtx, UserAccount};
use crate::prelude::*;
use canopy_types::db_adapter::{DbTransaction, EventKind};

/// One storage-engine registration on a subscribed path
pub struct SubEntry {
	pub event: EventKind,
	/// Adapter-assigned subscription id, needed to reverse the registration
	pub sub_id: Box<str>,
	/// Forward task draining the adapter's event stream
	pub task: Option<JoinHandle<()>>,
	/// Set once the client has been told its access was revoked
	pub denial_notified: Arc<AtomicBool>,
}

/// Realtime query registration tracked for cleanup; the underlying query
/// subscription is the storage layer's concern
#[derive(Debug, Clone)]
pub struct QueryRegistration {
	pub query_id: Box<str>,
	pub path: Box<str>,
}

/// A brokered transaction waiting for `transaction-finish` or its timeout
pub struct PendingTx {
	pub path: Box<str>,
	pub context: Value,
	pub txn: Box<dyn DbTransaction>,
	pub timer: Option<JoinHandle<()>>,
	pub started: Timestamp,
}

/// Outcome of looking up a pending transaction for finishing
pub enum TxTake {
	NotFound,
	/// The id exists but against another path; left pending for its timer
	PathMismatch,
	Taken(PendingTx),
}

pub struct ConnectedClient {
	pub id: Box<str>,
	pub connected_at: Timestamp,
	identity: RwLock<Option<UserAccount>>,
	sender: mpsc::UnboundedSender<Message>,
	subscriptions: Mutex<HashMap<Box<str>, Vec<SubEntry>>>,
	queries: Mutex<HashMap<Box<str>, QueryRegistration>>,
	transactions: Mutex<HashMap<Box<str>, PendingTx>>,
}

impl std::fmt::Debug for ConnectedClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConnectedClient")
			.field("id", &self.id)
			.field("connected_at", &self.connected_at)
			.finish_non_exhaustive()
	}
}

impl ConnectedClient {
	pub fn new(sender: mpsc::UnboundedSender<Message>) -> Self {
		Self {
			id: uuid::Uuid::new_v4().to_string().into(),
			connected_at: Timestamp::now(),
			identity: RwLock::new(None),
			sender,
			subscriptions: Mutex::new(HashMap::new()),
			queries: Mutex::new(HashMap::new()),
			transactions: Mutex::new(HashMap::new()),
		}
	}

	/// Queue a protocol message for delivery on this connection
	pub fn send(&self, msg: &crate::ws::protocol::ServerMessage) {
		match msg.to_ws_message() {
			Ok(ws_msg) => self.send_raw(ws_msg),
			Err(err) => error!("Failed to serialize message for {}: {}", self.id, err),
		}
	}

	pub fn send_raw(&self, msg: Message) {
		if self.sender.send(msg).is_err() {
			debug!("Client {} gone; dropping outbound message", self.id);
		}
	}

	// Identity //

	pub fn identity(&self) -> Option<UserAccount> {
		self.identity.read().clone()
	}

	pub fn auth_ctx(&self) -> Option<AuthCtx> {
		self.identity.read().as_ref().map(UserAccount::auth_ctx)
	}

	pub fn bind_identity(&self, account: UserAccount) {
		*self.identity.write() = Some(account);
	}

	pub fn clear_identity(&self) {
		*self.identity.write() = None;
	}

	// Subscriptions //

	pub async fn has_subscription(&self, path: &str, event: EventKind) -> bool {
		self.subscriptions
			.lock()
			.await
			.get(path)
			.is_some_and(|entries| entries.iter().any(|e| e.event == event))
	}

	pub async fn add_subscription(&self, path: &str, entry: SubEntry) {
		self.subscriptions.lock().await.entry(Box::from(path)).or_default().push(entry);
	}

	pub async fn set_subscription_task(&self, path: &str, event: EventKind, task: JoinHandle<()>) {
		if let Some(entry) = self
			.subscriptions
			.lock()
			.await
			.get_mut(path)
			.and_then(|entries| entries.iter_mut().find(|e| e.event == event))
		{
			entry.task = Some(task);
		} else {
			// Unsubscribed before the forward task was registered
			task.abort();
		}
	}

	/// Remove registrations for a path (one event kind, or all of them).
	/// Returns the removed entries so the caller can reverse them at the
	/// storage engine.
	pub async fn remove_subscriptions(
		&self,
		path: &str,
		event: Option<EventKind>,
	) -> Vec<SubEntry> {
		let mut subs = self.subscriptions.lock().await;
		match event {
			None => subs.remove(path).unwrap_or_default(),
			Some(event) => {
				let Some(entries) = subs.get_mut(path) else {
					return Vec::new();
				};
				let mut removed = Vec::new();
				let mut index = 0;
				while index < entries.len() {
					if entries[index].event == event {
						removed.push(entries.remove(index));
					} else {
						index += 1;
					}
				}
				if entries.is_empty() {
					subs.remove(path);
				}
				removed
			}
		}
	}

	pub async fn take_all_subscriptions(&self) -> Vec<(Box<str>, SubEntry)> {
		let mut subs = self.subscriptions.lock().await;
		let mut out = Vec::new();
		for (path, entries) in subs.drain() {
			for entry in entries {
				out.push((path.clone(), entry));
			}
		}
		out
	}

	pub async fn subscription_count(&self) -> usize {
		self.subscriptions.lock().await.values().map(Vec::len).sum()
	}

	// Realtime queries //

	pub async fn register_query(&self, registration: QueryRegistration) {
		self.queries.lock().await.insert(registration.query_id.clone(), registration);
	}

	pub async fn remove_query(&self, query_id: &str) -> Option<QueryRegistration> {
		self.queries.lock().await.remove(query_id)
	}

	pub async fn query_count(&self) -> usize {
		self.queries.lock().await.len()
	}

	// Transactions //

	pub async fn add_transaction(&self, id: &str, tx: PendingTx) {
		self.transactions.lock().await.insert(Box::from(id), tx);
	}

	pub async fn set_transaction_timer(&self, id: &str, timer: JoinHandle<()>) {
		if let Some(tx) = self.transactions.lock().await.get_mut(id) {
			tx.timer = Some(timer);
		} else {
			// Finished before the timer was registered
			timer.abort();
		}
	}

	pub async fn take_transaction(&self, id: &str) -> Option<PendingTx> {
		self.transactions.lock().await.remove(id)
	}

	/// Take a pending transaction for finishing, requiring the path to
	/// match what the transaction was started on
	pub async fn take_transaction_matching(&self, id: &str, path: &str) -> TxTake {
		let mut txs = self.transactions.lock().await;
		let path_matches = match txs.get(id) {
			None => return TxTake::NotFound,
			Some(tx) => tx.path.as_ref() == path,
		};
		if !path_matches {
			return TxTake::PathMismatch;
		}
		match txs.remove(id) {
			Some(tx) => TxTake::Taken(tx),
			None => TxTake::NotFound,
		}
	}

	pub async fn take_all_transactions(&self) -> Vec<(Box<str>, PendingTx)> {
		self.transactions.lock().await.drain().collect()
	}

	pub async fn transaction_count(&self) -> usize {
		self.transactions.lock().await.len()
	}
}

/// Registry of live connections, keyed by connection id
#[derive(Debug, Default)]
pub struct ClientRegistry {
	clients: RwLock<HashMap<Box<str>, Arc<ConnectedClient>>>,
}

impl ClientRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add(&self, client: Arc<ConnectedClient>) {
		self.clients.write().insert(client.id.clone(), client);
	}

	pub fn remove(&self, id: &str) -> Option<Arc<ConnectedClient>> {
		self.clients.write().remove(id)
	}

	pub fn get(&self, id: &str) -> Option<Arc<ConnectedClient>> {
		self.clients.read().get(id).cloned()
	}

	pub fn len(&self) -> usize {
		self.clients.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.clients.read().is_empty()
	}
}

// vim: ts=4
