//! Subscription/transaction broker.
//!
//! Translates connection-level protocol events into storage-engine
//! subscription and transaction calls, applying the access rule engine
//! before registering or delivering anything, and guarantees that every
//! storage-side registration is reversed when the connection drops.

use futures::StreamExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::auth::token::decode_public_token;
use crate::prelude::*;
use crate::ws::connection::{ConnectedClient, PendingTx, SubEntry, TxTake};
use crate::ws::protocol::{ClientMessage, ServerMessage};
use canopy_types::db_adapter::{DataEvent, EventKind, SubscribeOptions};
use canopy_types::value::TypedValue;

/// Fixed deadline for brokered read-modify-write transactions
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle one inbound protocol event. Events for the same connection are
/// dispatched sequentially, so responses keep request order.
pub async fn dispatch(app: &App, client: &Arc<ConnectedClient>, msg: ClientMessage) {
	match msg {
		ClientMessage::Signin { token } => handle_signin(app, client, &token),
		ClientMessage::Signout => {
			client.clear_identity();
			debug!("Client {} signed out", client.id);
		}
		ClientMessage::Subscribe { path, event, req_id } => {
			handle_subscribe(app, client, &path, &event, &req_id).await;
		}
		ClientMessage::Unsubscribe { path, event, req_id } => {
			handle_unsubscribe(app, client, &path, event.as_deref(), &req_id).await;
		}
		ClientMessage::QueryUnsubscribe { query_id, req_id } => {
			// No storage-engine side effect: cleanup of the underlying
			// query subscription is the storage layer's concern
			client.remove_query(&query_id).await;
			client.send(&ServerMessage::ok(req_id));
		}
		ClientMessage::TransactionStart { id, path, context } => {
			handle_transaction_start(app, client, &id, &path, context).await;
		}
		ClientMessage::TransactionFinish { id, path, value } => {
			handle_transaction_finish(app, client, &id, &path, value).await;
		}
	}
}

/// Bind the connection identity from a public token and the session cache
/// only — no database hit. An unknown uid leaves the identity unbound.
fn handle_signin(app: &App, client: &Arc<ConnectedClient>, token: &str) {
	let payload = match decode_public_token(token, &app.server_salt) {
		Ok(payload) => payload,
		Err(err) => {
			debug!("Client {} signin with undecodable token: {}", client.id, err);
			return;
		}
	};

	match app.session_cache.get(&payload.uid) {
		Some(account)
			if account.access_token.as_deref() == Some(payload.token.as_ref())
				&& !account.is_disabled =>
		{
			debug!("Client {} bound to {}", client.id, account.uid);
			client.bind_identity(account);
		}
		_ => debug!("Client {} signin: uid {} not cached", client.id, payload.uid),
	}
}

fn is_wildcard_path(path: &str) -> bool {
	path.contains('*') || path.contains('$')
}

async fn handle_subscribe(
	app: &App,
	client: &Arc<ConnectedClient>,
	path: &str,
	event: &str,
	req_id: &str,
) {
	let Ok(event) = event.parse::<EventKind>() else {
		client.send(&ServerMessage::fail(req_id, "invalid_event"));
		return;
	};

	// Idempotent: an existing registration for (path, event) just acks
	if client.has_subscription(path, event).await {
		client.send(&ServerMessage::ok(req_id));
		return;
	}

	let auth = client.auth_ctx();
	let access = app.rules.user_has_access(auth.as_ref(), path, false);
	if !access.allow {
		client.send(&ServerMessage::fail(req_id, "access_denied"));
		return;
	}

	let subscription =
		match app.db_adapter.subscribe(SubscribeOptions::new(path, event)).await {
			Ok(subscription) => subscription,
			Err(err) => {
				warn!("Subscribe {} on {} failed: {}", event, path, err);
				client.send(&ServerMessage::fail(req_id, "unexpected"));
				return;
			}
		};

	let denial_notified = Arc::new(AtomicBool::new(false));
	let entry = SubEntry {
		event,
		sub_id: subscription.id.clone(),
		task: None,
		denial_notified: Arc::clone(&denial_notified),
	};
	client.add_subscription(path, entry).await;

	let task = tokio::spawn(forward_events(
		app.clone(),
		Arc::clone(client),
		Box::from(path),
		event,
		subscription.stream,
		denial_notified,
	));
	client.set_subscription_task(path, event, task).await;

	debug!("Client {} subscribed to {} ({})", client.id, path, event);
	client.send(&ServerMessage::ok(req_id));
}

/// Drain one subscription's event stream into the connection.
///
/// Access is re-checked on every delivered event against the current
/// identity and rule tree; subscription-time checks go stale when either
/// changes.
async fn forward_events(
	app: App,
	client: Arc<ConnectedClient>,
	subscr_path: Box<str>,
	event: EventKind,
	stream: std::pin::Pin<Box<dyn futures::Stream<Item = DataEvent> + Send>>,
	denial_notified: Arc<AtomicBool>,
) {
	let mut stream = stream;
	while let Some(data_event) = stream.next().await {
		// Unsubscribed since the event was queued: stop silently
		if !client.has_subscription(&subscr_path, event).await {
			break;
		}

		let auth = client.auth_ctx();
		let access = app.rules.user_has_access(auth.as_ref(), &data_event.path, false);
		if !access.allow {
			// Revoked access on a concrete path is reported once; wildcard
			// subscriptions skip silently
			if !is_wildcard_path(&subscr_path) && !denial_notified.swap(true, Ordering::Relaxed) {
				client.send(&ServerMessage::fail(subscr_path.as_ref(), "access_denied"));
			}
			continue;
		}

		client.send(&ServerMessage::DataEvent {
			subscr_path: subscr_path.clone(),
			path: data_event.path,
			event: data_event.event.as_str().into(),
			val: data_event.value,
			context: data_event.context,
		});
	}
}

async fn handle_unsubscribe(
	app: &App,
	client: &Arc<ConnectedClient>,
	path: &str,
	event: Option<&str>,
	req_id: &str,
) {
	let event = match event {
		Some(name) => match name.parse::<EventKind>() {
			Ok(kind) => Some(kind),
			Err(_) => {
				client.send(&ServerMessage::fail(req_id, "invalid_event"));
				return;
			}
		},
		None => None,
	};

	let removed = client.remove_subscriptions(path, event).await;
	for entry in removed {
		if let Err(err) = app.db_adapter.unsubscribe(path, entry.event, &entry.sub_id).await {
			warn!("Unsubscribe {} on {} failed: {}", entry.event, path, err);
		}
		if let Some(task) = entry.task {
			task.abort();
		}
	}

	// Idempotent no-op when nothing was registered
	client.send(&ServerMessage::ok(req_id));
}

async fn handle_transaction_start(
	app: &App,
	client: &Arc<ConnectedClient>,
	id: &str,
	path: &str,
	context: Value,
) {
	let auth = client.auth_ctx();
	let access = app.rules.user_has_access(auth.as_ref(), path, true);
	if !access.allow {
		client.send(&ServerMessage::TxError { id: id.into(), reason: "access_denied".into() });
		return;
	}

	let txn = match app.db_adapter.transaction(path, context.clone()).await {
		Ok(txn) => txn,
		Err(err) => {
			warn!("Failed to start transaction on {}: {}", path, err);
			client.send(&ServerMessage::TxError { id: id.into(), reason: "unexpected".into() });
			return;
		}
	};

	let value = match txn.current().await {
		Ok(value) => value,
		Err(err) => {
			warn!("Failed to read transaction value on {}: {}", path, err);
			let mut txn = txn;
			if let Err(err) = txn.rollback().await {
				warn!("Rollback after failed read on {} failed: {}", path, err);
			}
			client.send(&ServerMessage::TxError { id: id.into(), reason: "unexpected".into() });
			return;
		}
	};

	let pending = PendingTx {
		path: path.into(),
		context,
		txn,
		timer: None,
		started: Timestamp::now(),
	};
	client.add_transaction(id, pending).await;

	let timer_app = app.clone();
	let timer_client = Arc::clone(client);
	let timer_id: Box<str> = id.into();
	let timer = tokio::spawn(async move {
		tokio::time::sleep(TRANSACTION_TIMEOUT).await;
		timeout_transaction(&timer_app, &timer_client, &timer_id).await;
	});
	client.set_transaction_timer(id, timer).await;

	client.send(&ServerMessage::TxStarted { id: id.into(), value });
}

async fn handle_transaction_finish(
	app: &App,
	client: &Arc<ConnectedClient>,
	id: &str,
	path: &str,
	value: Value,
) {
	let mut pending = match client.take_transaction_matching(id, path).await {
		TxTake::Taken(pending) => pending,
		TxTake::NotFound | TxTake::PathMismatch => {
			client.send(&ServerMessage::TxError {
				id: id.into(),
				reason: "transaction_not_found".into(),
			});
			return;
		}
	};
	if let Some(timer) = pending.timer.take() {
		timer.abort();
	}

	// Rules may have changed since transaction-start
	let auth = client.auth_ctx();
	let access = app.rules.user_has_access(auth.as_ref(), path, true);
	if !access.allow {
		if let Err(err) = pending.txn.rollback().await {
			warn!("Rollback of denied transaction {} failed: {}", id, err);
		}
		client.send(&ServerMessage::TxError { id: id.into(), reason: "access_denied".into() });
		return;
	}

	// A value that does not deserialize still releases the slot
	if TypedValue::from_wire(&value).is_err() {
		if let Err(err) = pending.txn.rollback().await {
			warn!("Rollback of transaction {} failed: {}", id, err);
		}
		client.send(&ServerMessage::TxError { id: id.into(), reason: "invalid_value".into() });
		return;
	}

	match pending.txn.commit(value).await {
		Ok(cursor) => {
			let mut context = pending.context;
			match context.as_object_mut() {
				Some(map) => {
					map.insert("cursor".to_string(), Value::String(cursor.to_string()));
				}
				None => context = json!({ "cursor": cursor.as_ref() }),
			}
			client.send(&ServerMessage::TxCompleted { id: id.into(), context });
		}
		Err(err) => {
			warn!("Commit of transaction {} on {} failed: {}", id, path, err);
			client.send(&ServerMessage::TxError { id: id.into(), reason: "unexpected".into() });
		}
	}
}

/// Deadline hit: abort the transaction, log it, and tell the client
async fn timeout_transaction(app: &App, client: &Arc<ConnectedClient>, id: &str) {
	let Some(mut pending) = client.take_transaction(id).await else {
		return;
	};

	if let Err(err) = pending.txn.rollback().await {
		warn!("Rollback of timed-out transaction {} failed: {}", id, err);
	}
	app.audit_adapter
		.error(
			"transaction",
			"timeout",
			json!({
				"id": id,
				"path": pending.path.as_ref(),
				"client": client.id.as_ref(),
				"started": pending.started,
			}),
		)
		.await;
	client.send(&ServerMessage::TxError { id: id.into(), reason: "timeout".into() });
}

/// Reverse everything this connection registered against the storage
/// engine and abort its pending transactions.
///
/// Transactions are rolled back immediately rather than left to their
/// timers: the connection that could finish them is gone, and holding the
/// path slot longer only blocks other writers.
pub async fn cleanup_connection(app: &App, client: &Arc<ConnectedClient>) {
	for (path, entry) in client.take_all_subscriptions().await {
		if let Err(err) = app.db_adapter.unsubscribe(&path, entry.event, &entry.sub_id).await {
			warn!("Unsubscribe {} on {} during cleanup failed: {}", entry.event, path, err);
		}
		if let Some(task) = entry.task {
			task.abort();
		}
	}

	for (id, mut pending) in client.take_all_transactions().await {
		if let Some(timer) = pending.timer.take() {
			timer.abort();
		}
		if let Err(err) = pending.txn.rollback().await {
			warn!("Rollback of transaction {} on disconnect failed: {}", id, err);
		}
		debug!("Aborted pending transaction {} on disconnect", id);
	}
}

// vim: ts=4
