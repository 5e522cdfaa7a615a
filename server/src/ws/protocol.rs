//! Persistent-connection protocol messages.
//!
//! Client→server events: `signin`, `signout`, `subscribe`, `unsubscribe`,
//! `query-unsubscribe`, `transaction-start`, `transaction-finish`.
//! Server→client events: `welcome`, `result`, `data-event`, `tx_started`,
//! `tx_completed`, `tx_error`.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::prelude::*;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
	Signin {
		token: Box<str>,
	},
	Signout,
	Subscribe {
		path: Box<str>,
		event: Box<str>,
		req_id: Box<str>,
	},
	Unsubscribe {
		path: Box<str>,
		event: Option<Box<str>>,
		req_id: Box<str>,
	},
	QueryUnsubscribe {
		query_id: Box<str>,
		req_id: Box<str>,
	},
	TransactionStart {
		id: Box<str>,
		path: Box<str>,
		#[serde(default)]
		context: Value,
	},
	TransactionFinish {
		id: Box<str>,
		path: Box<str>,
		#[serde(default)]
		value: Value,
	},
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
	Welcome {
		client_id: Box<str>,
		version: Box<str>,
	},
	Result {
		success: bool,
		#[serde(skip_serializing_if = "Option::is_none")]
		reason: Option<Box<str>>,
		req_id: Box<str>,
	},
	#[serde(rename = "data-event")]
	DataEvent {
		subscr_path: Box<str>,
		path: Box<str>,
		event: Box<str>,
		val: Value,
		context: Value,
	},
	TxStarted {
		id: Box<str>,
		value: Value,
	},
	TxCompleted {
		id: Box<str>,
		context: Value,
	},
	TxError {
		id: Box<str>,
		reason: Box<str>,
	},
}

impl ServerMessage {
	pub fn ok(req_id: impl Into<Box<str>>) -> Self {
		ServerMessage::Result { success: true, reason: None, req_id: req_id.into() }
	}

	pub fn fail(req_id: impl Into<Box<str>>, reason: &str) -> Self {
		ServerMessage::Result {
			success: false,
			reason: Some(Box::from(reason)),
			req_id: req_id.into(),
		}
	}

	/// Serialize to JSON and wrap in a WebSocket text message
	pub fn to_ws_message(&self) -> CnResult<Message> {
		let json = serde_json::to_string(self)?;
		Ok(Message::Text(json.into()))
	}
}

/// Parse an inbound WebSocket message. Non-text frames yield `None`.
pub fn parse_client_message(msg: &Message) -> CnResult<Option<ClientMessage>> {
	match msg {
		Message::Text(text) => Ok(Some(serde_json::from_str::<ClientMessage>(text)?)),
		Message::Close(_) | Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => Ok(None),
	}
}


// vim: ts=4
