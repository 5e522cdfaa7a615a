//! Integration tests for the realtime connection manager and broker.

mod common;

use axum::extract::ws::Message;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use canopy::DefaultAccessPolicy;
use canopy::auth::token::create_public_token;
use canopy::ws::broker;
use canopy::ws::connection::{ConnectedClient, QueryRegistration};
use canopy::ws::protocol::ClientMessage;

use common::{blank_account, test_app};

fn new_client() -> (Arc<ConnectedClient>, mpsc::UnboundedReceiver<Message>) {
	let (tx, rx) = mpsc::unbounded_channel();
	(Arc::new(ConnectedClient::new(tx)), rx)
}

async fn recv_msg(rx: &mut mpsc::UnboundedReceiver<Message>) -> Value {
	let msg = tokio::time::timeout(Duration::from_secs(30), rx.recv())
		.await
		.expect("timed out waiting for a message")
		.expect("channel closed");
	match msg {
		Message::Text(text) => serde_json::from_str(&text).expect("valid json"),
		other => panic!("unexpected frame: {:?}", other),
	}
}

async fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) {
	tokio::time::sleep(Duration::from_millis(50)).await;
	while rx.try_recv().is_ok() {}
}

fn assert_no_message(rx: &mut mpsc::UnboundedReceiver<Message>) {
	assert!(rx.try_recv().is_err(), "expected no further messages");
}

fn open_rules() -> Value {
	json!({ "rules": { ".read": true, ".write": true } })
}

fn subscribe_msg(path: &str, event: &str, req_id: &str) -> ClientMessage {
	ClientMessage::Subscribe { path: path.into(), event: event.into(), req_id: req_id.into() }
}

// Subscriptions //
//***************//

#[tokio::test]
async fn test_subscribe_and_receive_events() {
	let fixture = test_app(Some(open_rules()), DefaultAccessPolicy::Allow).await;
	let app = &fixture.app;
	let (client, mut rx) = new_client();

	broker::dispatch(app, &client, subscribe_msg("chat", "child_added", "r1")).await;
	let ack = recv_msg(&mut rx).await;
	assert_eq!(ack["type"], "result");
	assert_eq!(ack["success"], true);
	assert_eq!(ack["req_id"], "r1");

	app.db_adapter.set("chat/m1", json!({ "text": "hi" }), Value::Null).await.unwrap();

	let event = recv_msg(&mut rx).await;
	assert_eq!(event["type"], "data-event");
	assert_eq!(event["subscr_path"], "chat");
	assert_eq!(event["path"], "chat/m1");
	assert_eq!(event["event"], "child_added");
	assert_eq!(event["val"]["text"], "hi");
}

#[tokio::test]
async fn test_subscribe_is_idempotent() {
	let fixture = test_app(Some(open_rules()), DefaultAccessPolicy::Allow).await;
	let app = &fixture.app;
	let (client, mut rx) = new_client();

	broker::dispatch(app, &client, subscribe_msg("chat", "child_added", "r1")).await;
	broker::dispatch(app, &client, subscribe_msg("chat", "child_added", "r2")).await;

	let first = recv_msg(&mut rx).await;
	let second = recv_msg(&mut rx).await;
	assert_eq!(first["success"], true);
	assert_eq!(second["success"], true);

	// Exactly one live registration at the storage engine
	assert_eq!(fixture.db.subscribe_calls(), 1);
	assert_eq!(client.subscription_count().await, 1);
}

#[tokio::test]
async fn test_subscribe_denied_registers_nothing() {
	let fixture = test_app(None, DefaultAccessPolicy::Deny).await;
	let app = &fixture.app;
	let (client, mut rx) = new_client();

	broker::dispatch(app, &client, subscribe_msg("chat", "child_added", "r1")).await;
	let ack = recv_msg(&mut rx).await;
	assert_eq!(ack["success"], false);
	assert_eq!(ack["reason"], "access_denied");

	assert_eq!(fixture.db.subscribe_calls(), 0);
	assert_eq!(client.subscription_count().await, 0);
}

#[tokio::test]
async fn test_subscribe_invalid_event_rejected() {
	let fixture = test_app(Some(open_rules()), DefaultAccessPolicy::Allow).await;
	let (client, mut rx) = new_client();

	broker::dispatch(&fixture.app, &client, subscribe_msg("chat", "bogus", "r1")).await;
	let ack = recv_msg(&mut rx).await;
	assert_eq!(ack["success"], false);
	assert_eq!(ack["reason"], "invalid_event");
}

#[tokio::test]
async fn test_unsubscribe_reverses_registration() {
	let fixture = test_app(Some(open_rules()), DefaultAccessPolicy::Allow).await;
	let app = &fixture.app;
	let (client, mut rx) = new_client();

	broker::dispatch(app, &client, subscribe_msg("chat", "child_added", "r1")).await;
	broker::dispatch(
		app,
		&client,
		ClientMessage::Unsubscribe { path: "chat".into(), event: None, req_id: "r2".into() },
	)
	.await;
	drain(&mut rx).await;

	assert_eq!(fixture.db.unsubscribe_calls(), 1);
	assert_eq!(fixture.db.active_subscriptions(), 0);

	// No delivery after unsubscribe
	app.db_adapter.set("chat/m1", json!({ "text": "hi" }), Value::Null).await.unwrap();
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert_no_message(&mut rx);

	// Unsubscribing again is an acknowledged no-op
	broker::dispatch(
		app,
		&client,
		ClientMessage::Unsubscribe { path: "chat".into(), event: None, req_id: "r3".into() },
	)
	.await;
	let ack = recv_msg(&mut rx).await;
	assert_eq!(ack["success"], true);
	assert_eq!(fixture.db.unsubscribe_calls(), 1);
}

#[tokio::test]
async fn test_access_recheck_on_delivery_notifies_once() {
	// Reads require a signed-in identity
	let rules = json!({ "rules": { "notes": { ".read": "auth !== null", ".write": true } } });
	let fixture = test_app(Some(rules), DefaultAccessPolicy::Deny).await;
	let app = &fixture.app;
	let (client, mut rx) = new_client();

	client.bind_identity(blank_account("u1"));
	broker::dispatch(app, &client, subscribe_msg("notes/n1", "value", "r1")).await;
	assert_eq!(recv_msg(&mut rx).await["success"], true);

	app.db_adapter.set("notes/n1", json!({ "v": 1 }), Value::Null).await.unwrap();
	assert_eq!(recv_msg(&mut rx).await["type"], "data-event");

	// Identity goes away: the subscription-time check is stale now
	broker::dispatch(app, &client, ClientMessage::Signout).await;

	app.db_adapter.set("notes/n1", json!({ "v": 2 }), Value::Null).await.unwrap();
	let denial = recv_msg(&mut rx).await;
	assert_eq!(denial["type"], "result");
	assert_eq!(denial["success"], false);
	assert_eq!(denial["reason"], "access_denied");

	// Denied exactly once; later events are skipped silently
	app.db_adapter.set("notes/n1", json!({ "v": 3 }), Value::Null).await.unwrap();
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert_no_message(&mut rx);
}

#[tokio::test]
async fn test_wildcard_subscription_denial_is_silent() {
	let rules = json!({ "rules": { "notes": { "$id": { ".read": "auth !== null", ".write": true } } } });
	let fixture = test_app(Some(rules), DefaultAccessPolicy::Deny).await;
	let app = &fixture.app;
	let (client, mut rx) = new_client();

	client.bind_identity(blank_account("u1"));
	broker::dispatch(app, &client, subscribe_msg("notes/$id", "value", "r1")).await;
	assert_eq!(recv_msg(&mut rx).await["success"], true);

	broker::dispatch(app, &client, ClientMessage::Signout).await;
	app.db_adapter.set("notes/n1", json!({ "v": 1 }), Value::Null).await.unwrap();
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert_no_message(&mut rx);
}

// Realtime queries //
//******************//

#[tokio::test]
async fn test_query_unsubscribe_removes_registration_only() {
	let fixture = test_app(Some(open_rules()), DefaultAccessPolicy::Allow).await;
	let (client, mut rx) = new_client();

	client
		.register_query(QueryRegistration { query_id: "q1".into(), path: "items".into() })
		.await;
	assert_eq!(client.query_count().await, 1);

	broker::dispatch(
		&fixture.app,
		&client,
		ClientMessage::QueryUnsubscribe { query_id: "q1".into(), req_id: "r1".into() },
	)
	.await;
	assert_eq!(recv_msg(&mut rx).await["success"], true);
	assert_eq!(client.query_count().await, 0);
	// No storage-engine side effect
	assert_eq!(fixture.db.unsubscribe_calls(), 0);
}

// Transactions //
//**************//

#[tokio::test]
async fn test_transaction_lifecycle_commits_once() {
	let fixture = test_app(Some(open_rules()), DefaultAccessPolicy::Allow).await;
	let app = &fixture.app;
	let (client, mut rx) = new_client();

	app.db_adapter.set("counters/a", json!(1), Value::Null).await.unwrap();

	broker::dispatch(
		app,
		&client,
		ClientMessage::TransactionStart {
			id: "tx1".into(),
			path: "counters/a".into(),
			context: json!({ "who": "u1" }),
		},
	)
	.await;
	let started = recv_msg(&mut rx).await;
	assert_eq!(started["type"], "tx_started");
	assert_eq!(started["id"], "tx1");
	assert_eq!(started["value"], 1);

	broker::dispatch(
		app,
		&client,
		ClientMessage::TransactionFinish {
			id: "tx1".into(),
			path: "counters/a".into(),
			value: json!(2),
		},
	)
	.await;
	let completed = recv_msg(&mut rx).await;
	assert_eq!(completed["type"], "tx_completed");
	assert_eq!(completed["id"], "tx1");
	assert_eq!(completed["context"]["who"], "u1");
	assert!(completed["context"]["cursor"].is_string());

	assert_eq!(fixture.db.commit_calls(), 1);
	assert_eq!(fixture.db.rollback_calls(), 0);
	assert_eq!(client.transaction_count().await, 0);
	assert_eq!(app.db_adapter.get("counters/a").await.unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn test_transaction_start_denied_by_rules() {
	let rules = json!({ "rules": { ".read": true, ".write": false } });
	let fixture = test_app(Some(rules), DefaultAccessPolicy::Deny).await;
	let (client, mut rx) = new_client();

	broker::dispatch(
		&fixture.app,
		&client,
		ClientMessage::TransactionStart {
			id: "tx1".into(),
			path: "counters/a".into(),
			context: Value::Null,
		},
	)
	.await;
	let err = recv_msg(&mut rx).await;
	assert_eq!(err["type"], "tx_error");
	assert_eq!(err["reason"], "access_denied");
	assert_eq!(client.transaction_count().await, 0);
	assert_eq!(fixture.db.rollback_calls(), 0);
}

#[tokio::test]
async fn test_transaction_finish_unknown_id() {
	let fixture = test_app(Some(open_rules()), DefaultAccessPolicy::Allow).await;
	let (client, mut rx) = new_client();

	broker::dispatch(
		&fixture.app,
		&client,
		ClientMessage::TransactionFinish {
			id: "nope".into(),
			path: "counters/a".into(),
			value: json!(1),
		},
	)
	.await;
	let err = recv_msg(&mut rx).await;
	assert_eq!(err["type"], "tx_error");
	assert_eq!(err["reason"], "transaction_not_found");
}

#[tokio::test]
async fn test_transaction_finish_path_mismatch() {
	let fixture = test_app(Some(open_rules()), DefaultAccessPolicy::Allow).await;
	let app = &fixture.app;
	let (client, mut rx) = new_client();

	broker::dispatch(
		app,
		&client,
		ClientMessage::TransactionStart {
			id: "tx1".into(),
			path: "counters/a".into(),
			context: Value::Null,
		},
	)
	.await;
	assert_eq!(recv_msg(&mut rx).await["type"], "tx_started");

	broker::dispatch(
		app,
		&client,
		ClientMessage::TransactionFinish {
			id: "tx1".into(),
			path: "counters/b".into(),
			value: json!(1),
		},
	)
	.await;
	let err = recv_msg(&mut rx).await;
	assert_eq!(err["reason"], "transaction_not_found");
	// The transaction stays pending for its own timer
	assert_eq!(client.transaction_count().await, 1);
}

#[tokio::test]
async fn test_transaction_finish_recheck_denies_and_rolls_back() {
	let rules = json!({ "rules": { "counters": { ".read": true, ".write": "auth !== null" } } });
	let fixture = test_app(Some(rules), DefaultAccessPolicy::Deny).await;
	let app = &fixture.app;
	let (client, mut rx) = new_client();

	client.bind_identity(blank_account("u1"));
	broker::dispatch(
		app,
		&client,
		ClientMessage::TransactionStart {
			id: "tx1".into(),
			path: "counters/a".into(),
			context: Value::Null,
		},
	)
	.await;
	assert_eq!(recv_msg(&mut rx).await["type"], "tx_started");

	// Identity vanishes between start and finish
	broker::dispatch(app, &client, ClientMessage::Signout).await;
	broker::dispatch(
		app,
		&client,
		ClientMessage::TransactionFinish {
			id: "tx1".into(),
			path: "counters/a".into(),
			value: json!(5),
		},
	)
	.await;
	let err = recv_msg(&mut rx).await;
	assert_eq!(err["reason"], "access_denied");
	assert_eq!(fixture.db.rollback_calls(), 1);
	assert_eq!(fixture.db.commit_calls(), 0);
	assert_eq!(client.transaction_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_transaction_timeout_aborts() {
	let fixture = test_app(Some(open_rules()), DefaultAccessPolicy::Allow).await;
	let app = &fixture.app;
	let (client, mut rx) = new_client();

	broker::dispatch(
		app,
		&client,
		ClientMessage::TransactionStart {
			id: "tx1".into(),
			path: "counters/a".into(),
			context: Value::Null,
		},
	)
	.await;
	assert_eq!(recv_msg(&mut rx).await["type"], "tx_started");

	// The 10 second deadline passes without a finish
	let err = recv_msg(&mut rx).await;
	assert_eq!(err["type"], "tx_error");
	assert_eq!(err["reason"], "timeout");

	assert_eq!(fixture.db.rollback_calls(), 1);
	assert_eq!(fixture.db.commit_calls(), 0);
	assert_eq!(client.transaction_count().await, 0);
	assert_eq!(fixture.audit.count("transaction", Some("timeout")), 1);
}

// Sign-in over the socket //
//*************************//

#[tokio::test]
async fn test_ws_signin_binds_from_cache_only() {
	let fixture = test_app(Some(open_rules()), DefaultAccessPolicy::Allow).await;
	let app = &fixture.app;
	let (client, _rx) = new_client();

	let mut account = blank_account("u1");
	account.access_token = Some("private-secret".into());
	app.session_cache.put(account);

	let token = create_public_token("u1", "10.0.0.1", "private-secret", &app.server_salt).unwrap();
	broker::dispatch(app, &client, ClientMessage::Signin { token: token.into() }).await;
	assert_eq!(client.auth_ctx().map(|a| a.uid), Some("u1".into()));

	broker::dispatch(app, &client, ClientMessage::Signout).await;
	assert!(client.auth_ctx().is_none());
}

#[tokio::test]
async fn test_ws_signin_unknown_uid_stays_unbound() {
	let fixture = test_app(Some(open_rules()), DefaultAccessPolicy::Allow).await;
	let app = &fixture.app;
	let (client, _rx) = new_client();

	// Valid signature, but the uid is not in the session cache
	let token = create_public_token("ghost", "10.0.0.1", "secret", &app.server_salt).unwrap();
	broker::dispatch(app, &client, ClientMessage::Signin { token: token.into() }).await;
	assert!(client.auth_ctx().is_none());
}

// Disconnect //
//************//

#[tokio::test]
async fn test_disconnect_reverses_everything() {
	let fixture = test_app(Some(open_rules()), DefaultAccessPolicy::Allow).await;
	let app = &fixture.app;
	let (client, mut rx) = new_client();

	broker::dispatch(app, &client, subscribe_msg("chat", "child_added", "r1")).await;
	broker::dispatch(app, &client, subscribe_msg("chat", "value", "r2")).await;
	broker::dispatch(app, &client, subscribe_msg("presence", "child_changed", "r3")).await;
	broker::dispatch(
		app,
		&client,
		ClientMessage::TransactionStart {
			id: "tx1".into(),
			path: "counters/a".into(),
			context: Value::Null,
		},
	)
	.await;
	drain(&mut rx).await;
	assert_eq!(client.subscription_count().await, 3);

	broker::cleanup_connection(app, &client).await;

	// Every subscription reversed at the storage engine, transaction
	// rolled back immediately
	assert_eq!(fixture.db.unsubscribe_calls(), 3);
	assert_eq!(fixture.db.active_subscriptions(), 0);
	assert_eq!(fixture.db.rollback_calls(), 1);
	assert_eq!(client.subscription_count().await, 0);
	assert_eq!(client.transaction_count().await, 0);

	// No further delivery, even for writes that race the teardown
	app.db_adapter.set("chat/m9", json!({ "text": "late" }), Value::Null).await.unwrap();
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert_no_message(&mut rx);
}

#[tokio::test]
async fn test_registry_add_remove() {
	let fixture = test_app(Some(open_rules()), DefaultAccessPolicy::Allow).await;
	let (client, _rx) = new_client();
	let id = client.id.clone();

	fixture.app.clients.add(client);
	assert_eq!(fixture.app.clients.len(), 1);
	assert!(fixture.app.clients.get(&id).is_some());

	let removed = fixture.app.clients.remove(&id);
	assert!(removed.is_some());
	assert!(fixture.app.clients.is_empty());
}

// vim: ts=4
