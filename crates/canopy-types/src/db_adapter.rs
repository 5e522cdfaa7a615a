//! Storage engine adapter boundary.
//!
//! The gateway treats the hierarchical database as a capability behind this
//! narrow trait: path-keyed reads and writes, simple filtered queries,
//! event subscriptions delivered as streams, and read-modify-write
//! transactions holding one slot per path until committed or rolled back.
//! On-disk format, query planning, and indexing are the adapter's concern.
//!
//! Values cross this boundary in the tagged wire form of
//! [`crate::value::TypedValue`] so dates, binary blobs, and references
//! survive the trip.

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::pin::Pin;

use crate::prelude::*;

/// Data-change event kinds a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
	Value,
	ChildAdded,
	ChildChanged,
	ChildRemoved,
	Mutated,
}

impl EventKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			EventKind::Value => "value",
			EventKind::ChildAdded => "child_added",
			EventKind::ChildChanged => "child_changed",
			EventKind::ChildRemoved => "child_removed",
			EventKind::Mutated => "mutated",
		}
	}
}

impl std::str::FromStr for EventKind {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"value" => Ok(EventKind::Value),
			"child_added" => Ok(EventKind::ChildAdded),
			"child_changed" => Ok(EventKind::ChildChanged),
			"child_removed" => Ok(EventKind::ChildRemoved),
			"mutated" => Ok(EventKind::Mutated),
			other => Err(Error::ValidationError(format!("unknown event kind: {}", other))),
		}
	}
}

impl std::fmt::Display for EventKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A single delivered data-change event.
#[derive(Debug, Clone)]
pub struct DataEvent {
	/// Concrete path the change happened at
	pub path: Box<str>,
	pub event: EventKind,
	/// Wire-encoded value after the change (null for removals)
	pub value: Value,
	/// Context attached by the write that caused the change
	pub context: Value,
}

/// Options for registering a subscription.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
	/// Path to watch; may contain `*` / `$var` wildcard segments
	pub path: Box<str>,
	pub event: EventKind,
}

impl SubscribeOptions {
	pub fn new(path: impl Into<Box<str>>, event: EventKind) -> Self {
		Self { path: path.into(), event }
	}
}

/// An active subscription: the adapter-assigned id plus the event stream.
///
/// The id is what [`DbAdapter::unsubscribe`] needs to reverse the
/// registration; dropping the stream alone does not release adapter-side
/// resources.
pub struct Subscription {
	pub id: Box<str>,
	pub stream: Pin<Box<dyn Stream<Item = DataEvent> + Send>>,
}

impl Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription").field("id", &self.id).finish_non_exhaustive()
	}
}

/// Filter operators for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
	Eq,
	Ne,
	Gt,
	Lt,
}

/// A single field constraint; a record matches when all constraints hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryFilter {
	pub field: String,
	pub op: FilterOp,
	pub value: Value,
}

/// Options for querying child records at a path.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
	pub filters: Vec<QueryFilter>,
	pub limit: Option<u32>,
}

impl QueryOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_filter(mut self, field: impl Into<String>, op: FilterOp, value: Value) -> Self {
		self.filters.push(QueryFilter { field: field.into(), op, value });
		self
	}

	pub fn with_limit(mut self, limit: u32) -> Self {
		self.limit = Some(limit);
		self
	}
}

/// A pending read-modify-write transaction on one path.
///
/// Opening a transaction acquires the storage engine's transaction slot for
/// the path; the slot is released by exactly one `commit` or `rollback`.
#[async_trait]
pub trait DbTransaction: Send + Sync {
	/// The value at the transaction's path when the slot was acquired,
	/// wire-encoded
	async fn current(&self) -> CnResult<Value>;

	/// Commit `value` as the new value; returns a cursor identifying the
	/// committed mutation
	async fn commit(&mut self, value: Value) -> CnResult<Box<str>>;

	/// Abort without writing
	async fn rollback(&mut self) -> CnResult<()>;
}

/// Hierarchical database capability consumed by the gateway.
#[async_trait]
pub trait DbAdapter: Debug + Send + Sync {
	/// Read the value at a path. Returns None if nothing is stored there.
	async fn get(&self, path: &str) -> CnResult<Option<Value>>;

	/// Overwrite the value at a path.
	async fn set(&self, path: &str, value: Value, context: Value) -> CnResult<()>;

	/// Merge `value`'s members into the object at a path.
	async fn update(&self, path: &str, value: Value, context: Value) -> CnResult<()>;

	/// Remove the value at a path (no-op if absent).
	async fn remove(&self, path: &str, context: Value) -> CnResult<()>;

	async fn exists(&self, path: &str) -> CnResult<bool>;

	/// Query child records at a path. Returns `(child path, value)` pairs.
	async fn query(&self, path: &str, opts: QueryOptions) -> CnResult<Vec<(Box<str>, Value)>>;

	/// Register a change subscription. The returned stream yields events
	/// until `unsubscribe` is called with the subscription's id.
	async fn subscribe(&self, opts: SubscribeOptions) -> CnResult<Subscription>;

	/// Reverse a registration made by `subscribe`.
	async fn unsubscribe(&self, path: &str, event: EventKind, sub_id: &str) -> CnResult<()>;

	/// Open a read-modify-write transaction on a path. `context` is
	/// attached to the eventual committed mutation.
	async fn transaction(&self, path: &str, context: Value) -> CnResult<Box<dyn DbTransaction>>;
}


// vim: ts=4
