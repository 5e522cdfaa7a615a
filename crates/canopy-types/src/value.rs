//! Typed value model for data crossing the storage boundary.
//!
//! Plain JSON cannot distinguish dates, binary blobs, and path references
//! from ordinary strings/objects. Values are exchanged with the storage
//! engine and with clients in a tagged wire form: special values become
//! `{".type": "date"|"binary"|"reference", ".val": …}` objects, everything
//! else passes through unchanged. A plain object is never allowed to carry
//! a literal `".type"` member, so the encoding is unambiguous.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use crate::prelude::*;

const TYPE_KEY: &str = ".type";
const VAL_KEY: &str = ".val";

#[derive(Clone, Debug, PartialEq)]
pub enum TypedValue {
	Null,
	Bool(bool),
	Number(serde_json::Number),
	String(Box<str>),
	/// Milliseconds since the Unix epoch
	Date(i64),
	Binary(Box<[u8]>),
	/// Path reference into the same database
	Reference(Box<str>),
	Array(Vec<TypedValue>),
	Object(BTreeMap<String, TypedValue>),
}

impl TypedValue {
	/// Decode from the tagged wire form
	pub fn from_wire(value: &Value) -> CnResult<TypedValue> {
		match value {
			Value::Null => Ok(TypedValue::Null),
			Value::Bool(b) => Ok(TypedValue::Bool(*b)),
			Value::Number(n) => Ok(TypedValue::Number(n.clone())),
			Value::String(s) => Ok(TypedValue::String(s.as_str().into())),
			Value::Array(items) => {
				let mut out = Vec::with_capacity(items.len());
				for item in items {
					out.push(Self::from_wire(item)?);
				}
				Ok(TypedValue::Array(out))
			}
			Value::Object(map) => {
				if let Some(tag) = map.get(TYPE_KEY).and_then(Value::as_str) {
					return Self::from_tagged(tag, map.get(VAL_KEY));
				}
				let mut out = BTreeMap::new();
				for (key, val) in map {
					out.insert(key.clone(), Self::from_wire(val)?);
				}
				Ok(TypedValue::Object(out))
			}
		}
	}

	fn from_tagged(tag: &str, val: Option<&Value>) -> CnResult<TypedValue> {
		match (tag, val) {
			("date", Some(Value::Number(n))) => {
				n.as_i64().map(TypedValue::Date).ok_or(Error::Parse)
			}
			("binary", Some(Value::String(s))) => {
				let bytes = STANDARD.decode(s.as_bytes()).map_err(|_| Error::Parse)?;
				Ok(TypedValue::Binary(bytes.into()))
			}
			("reference", Some(Value::String(s))) => {
				Ok(TypedValue::Reference(s.as_str().into()))
			}
			_ => Err(Error::Parse),
		}
	}

	/// Encode into the tagged wire form
	pub fn to_wire(&self) -> Value {
		match self {
			TypedValue::Null => Value::Null,
			TypedValue::Bool(b) => Value::Bool(*b),
			TypedValue::Number(n) => Value::Number(n.clone()),
			TypedValue::String(s) => Value::String(s.to_string()),
			TypedValue::Date(ms) => json!({ TYPE_KEY: "date", VAL_KEY: ms }),
			TypedValue::Binary(bytes) => {
				json!({ TYPE_KEY: "binary", VAL_KEY: STANDARD.encode(bytes) })
			}
			TypedValue::Reference(path) => {
				json!({ TYPE_KEY: "reference", VAL_KEY: path.as_ref() })
			}
			TypedValue::Array(items) => {
				Value::Array(items.iter().map(TypedValue::to_wire).collect())
			}
			TypedValue::Object(map) => {
				let mut out = Map::new();
				for (key, val) in map {
					out.insert(key.clone(), val.to_wire());
				}
				Value::Object(out)
			}
		}
	}

	pub fn is_null(&self) -> bool {
		matches!(self, TypedValue::Null)
	}
}


// vim: ts=4
