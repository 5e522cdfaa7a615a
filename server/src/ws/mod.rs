//! WebSocket endpoint and per-connection event loop.

pub mod broker;
pub mod connection;
pub mod protocol;

use axum::{
	extract::{
		Path, State,
		ws::{Message, WebSocket, WebSocketUpgrade},
	},
	response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::core::app::VERSION;
use crate::prelude::*;
use self::connection::ConnectedClient;
use self::protocol::ServerMessage;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub async fn get_ws(
	ws: WebSocketUpgrade,
	Path(db): Path<String>,
	State(app): State<App>,
) -> CnResult<Response> {
	if db != app.opts.db_name.as_ref() {
		return Err(Error::NotFound);
	}
	Ok(ws.on_upgrade(move |socket| handle_connection(socket, app)))
}

async fn handle_connection(socket: WebSocket, app: App) {
	let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
	let client = Arc::new(ConnectedClient::new(outbound_tx));
	app.clients.add(Arc::clone(&client));
	info!("Client {} connected", client.id);

	client.send(&ServerMessage::Welcome { client_id: client.id.clone(), version: VERSION.into() });

	let (mut ws_tx, mut ws_rx) = socket.split();

	// Single writer drains the outbound queue; per-connection ordering
	// follows from the sequential dispatch below feeding one queue
	let send_task = tokio::spawn(async move {
		while let Some(msg) = outbound_rx.recv().await {
			if ws_tx.send(msg).await.is_err() {
				debug!("Client disconnected while sending");
				break;
			}
		}
	});

	let heartbeat_client = Arc::clone(&client);
	let heartbeat_task = tokio::spawn(async move {
		let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
		interval.tick().await;
		loop {
			interval.tick().await;
			heartbeat_client.send_raw(Message::Ping(vec![].into()));
		}
	});

	// Inbound events are handled one at a time: a response is always sent
	// before the next request on this connection is looked at
	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(ws_msg) => {
				let parsed = match protocol::parse_client_message(&ws_msg) {
					Ok(Some(parsed)) => parsed,
					Ok(None) => continue,
					Err(err) => {
						warn!("Client {} sent an unparseable message: {}", client.id, err);
						continue;
					}
				};
				broker::dispatch(&app, &client, parsed).await;
			}
			Err(err) => {
				debug!("Client {} connection error: {}", client.id, err);
				break;
			}
		}
	}

	app.clients.remove(&client.id);
	broker::cleanup_connection(&app, &client).await;
	heartbeat_task.abort();
	send_task.abort();
	info!("Client {} disconnected", client.id);
}

// vim: ts=4
