//! Append-only audit log sink.
//!
//! Every sign-in attempt, authorization denial, and transaction timeout is
//! reported here. Writes are best-effort by construction: the methods
//! cannot fail, and implementations must never block or abort the
//! operation that produced the entry.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;

#[async_trait]
pub trait AuditAdapter: Debug + Send + Sync {
	/// Record a normal event (successful sign-in, signup, …)
	async fn event(&self, action: &str, details: Value);

	/// Record a suspicious or failed event with its outcome code
	async fn warning(&self, action: &str, code: &str, details: Value);

	/// Record a failure with its outcome code
	async fn error(&self, action: &str, code: &str, details: Value);
}

// vim: ts=4
